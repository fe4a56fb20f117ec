//! Stream wrapping a chain of stateless executors over one upstream.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use pfq_common::{PfqError, Result};

use crate::batch::Batch;
use crate::close::{Close, CloseChain, close_quietly};
use crate::context::ExecutorContext;
use crate::executor::{StatelessExecutor, StatelessExecutorFactory};
use crate::stream::{BatchStream, SendableBatchStream};

pub struct PipelineStream {
    source: SendableBatchStream,
    executors: Vec<Box<dyn StatelessExecutor>>,
    schema: SchemaRef,
    closed: bool,
}

impl PipelineStream {
    /// Initialize every executor in order, each from the previous output schema.
    ///
    /// On failure the executors initialized so far and `source` are closed, and the
    /// initialization error is returned with any close failure attached.
    pub fn try_new(
        ctx: &ExecutorContext,
        mut source: SendableBatchStream,
        factories: &[Arc<dyn StatelessExecutorFactory>],
    ) -> Result<Self> {
        let mut executors: Vec<Box<dyn StatelessExecutor>> = Vec::with_capacity(factories.len());
        let init = (|| -> Result<SchemaRef> {
            let mut schema = source.schema()?;
            for factory in factories {
                let executor = factory.initialize(ctx, schema)?;
                schema = executor.output_schema();
                executors.push(executor);
            }
            Ok(schema)
        })();
        match init {
            Ok(schema) => Ok(Self {
                source,
                executors,
                schema,
                closed: false,
            }),
            Err(e) => {
                let mut chain = CloseChain::after(e);
                for executor in executors.iter_mut().rev() {
                    chain.record(executor.close());
                }
                chain.close(&mut source);
                Err(chain.into_error())
            }
        }
    }

    fn short_circuited(&self) -> bool {
        self.executors.iter().any(|e| e.is_empty())
    }
}

impl BatchStream for PipelineStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed || self.short_circuited() {
            return Ok(false);
        }
        self.source.has_next()
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next()? {
            return Err(PfqError::StreamExhausted);
        }
        let mut batch = self.source.next_batch()?;
        for executor in &mut self.executors {
            batch = executor.compute(batch)?;
        }
        Ok(batch)
    }
}

impl Close for PipelineStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut chain = CloseChain::new();
        for executor in self.executors.iter_mut().rev() {
            chain.record(executor.close());
        }
        chain.close(&mut self.source);
        chain.finish()
    }
}

impl Drop for PipelineStream {
    fn drop(&mut self) {
        close_quietly(self, "pipeline stream");
    }
}
