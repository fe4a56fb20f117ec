//! Streams driving stateful executors with the fetch-and-consume loop.
//!
//! The loop pulls while the executor wants input and has nothing to emit. Each input
//! side gets its end signal exactly once; asking for input on a side that already
//! ended is an executor bug and fails the stream.

use arrow_schema::SchemaRef;
use pfq_common::{PfqError, Result};

use crate::batch::Batch;
use crate::close::{Close, CloseChain, close_quietly};
use crate::context::ExecutorContext;
use crate::executor::{
    BinaryExecutorFactory, StatefulBinaryExecutor, StatefulUnaryExecutor, UnaryExecutorFactory,
};
use crate::stream::{BatchStream, SendableBatchStream};

pub struct UnarySinkStream {
    source: SendableBatchStream,
    executor: Box<dyn StatefulUnaryExecutor>,
    schema: SchemaRef,
    source_ended: bool,
    closed: bool,
}

impl UnarySinkStream {
    /// On initialization failure `source` is closed before the error is returned.
    pub fn try_new(
        ctx: &ExecutorContext,
        mut source: SendableBatchStream,
        factory: &dyn UnaryExecutorFactory,
    ) -> Result<Self> {
        match source
            .schema()
            .and_then(|schema| factory.initialize(ctx, schema))
        {
            Ok(executor) => Ok(Self {
                schema: executor.output_schema(),
                source,
                executor,
                source_ended: false,
                closed: false,
            }),
            Err(e) => {
                let mut chain = CloseChain::after(e);
                chain.close(&mut source);
                Err(chain.into_error())
            }
        }
    }

    /// Feed the executor until it can produce or wants no more input.
    pub fn fetch_and_consume(&mut self) -> Result<()> {
        while !self.executor.can_produce() && self.executor.need_consume() {
            if self.source_ended {
                return Err(input_after_end(self.executor.name(), "input"));
            }
            if self.source.has_next()? {
                let batch = self.source.next_batch()?;
                self.executor.consume(batch)?;
            } else {
                self.source_ended = true;
                self.executor.consume_end()?;
            }
        }
        Ok(())
    }
}

fn input_after_end(executor: &str, side: &str) -> PfqError {
    PfqError::Execution(format!("{executor} requested {side} after its end"))
}

impl BatchStream for UnarySinkStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.fetch_and_consume()?;
        Ok(self.executor.can_produce())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next()? {
            return Err(PfqError::StreamExhausted);
        }
        self.executor.produce()
    }
}

impl Close for UnarySinkStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut chain = CloseChain::new();
        chain.record(self.executor.close());
        chain.close(&mut self.source);
        chain.finish()
    }
}

impl Drop for UnarySinkStream {
    fn drop(&mut self) {
        close_quietly(self, "unary sink stream");
    }
}

pub struct BinarySinkStream {
    left: SendableBatchStream,
    right: SendableBatchStream,
    executor: Box<dyn StatefulBinaryExecutor>,
    schema: SchemaRef,
    left_ended: bool,
    right_ended: bool,
    closed: bool,
}

impl BinarySinkStream {
    /// On initialization failure both inputs are closed, right first.
    pub fn try_new(
        ctx: &ExecutorContext,
        mut left: SendableBatchStream,
        mut right: SendableBatchStream,
        factory: &dyn BinaryExecutorFactory,
    ) -> Result<Self> {
        let init = left.schema().and_then(|left_schema| {
            let right_schema = right.schema()?;
            factory.initialize(ctx, left_schema, right_schema)
        });
        match init {
            Ok(executor) => Ok(Self {
                schema: executor.output_schema(),
                left,
                right,
                executor,
                left_ended: false,
                right_ended: false,
                closed: false,
            }),
            Err(e) => {
                let mut chain = CloseChain::after(e);
                chain.close(&mut right).close(&mut left);
                Err(chain.into_error())
            }
        }
    }

    /// Feed the executor until it can produce or neither side wants input.
    ///
    /// Each round offers one batch (or the end signal) to the left side, then to
    /// the right side, each only if the executor still asks for it.
    pub fn fetch_and_consume(&mut self) -> Result<()> {
        while !self.executor.can_produce() {
            let mut progressed = false;
            if self.executor.need_consume_left() {
                self.pull_left()?;
                progressed = true;
            }
            if !self.executor.can_produce() && self.executor.need_consume_right() {
                self.pull_right()?;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    fn pull_left(&mut self) -> Result<()> {
        if self.left_ended {
            return Err(input_after_end(self.executor.name(), "left input"));
        }
        if self.left.has_next()? {
            let batch = self.left.next_batch()?;
            self.executor.consume_left(batch)
        } else {
            self.left_ended = true;
            self.executor.consume_left_end()
        }
    }

    fn pull_right(&mut self) -> Result<()> {
        if self.right_ended {
            return Err(input_after_end(self.executor.name(), "right input"));
        }
        if self.right.has_next()? {
            let batch = self.right.next_batch()?;
            self.executor.consume_right(batch)
        } else {
            self.right_ended = true;
            self.executor.consume_right_end()
        }
    }
}

impl BatchStream for BinarySinkStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.fetch_and_consume()?;
        Ok(self.executor.can_produce())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next()? {
            return Err(PfqError::StreamExhausted);
        }
        self.executor.produce()
    }
}

impl Close for BinarySinkStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut chain = CloseChain::new();
        chain.record(self.executor.close());
        chain.close(&mut self.right).close(&mut self.left);
        chain.finish()
    }
}

impl Drop for BinarySinkStream {
    fn drop(&mut self) {
        close_quietly(self, "binary sink stream");
    }
}
