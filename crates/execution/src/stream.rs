//! Pull-based batch streams between tasks, plus the async adapter handed to callers.
//!
//! Protocol of [`BatchStream`]:
//! - `schema()` is computed on first need and cached;
//! - `has_next()` may do real work and is idempotent until the next `next_batch()`;
//! - `next_batch()` without a pending batch fails with [`PfqError::StreamExhausted`];
//! - `close()` is idempotent and releases everything upstream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use futures::Stream;
use futures::channel::mpsc;
use pfq_common::{MemoryPool, PfqError, Result};
use tracing::debug;

use crate::batch::Batch;
use crate::close::{Close, CloseChain, close_quietly};

/// Ordered, finite sequence of batches with a known schema.
pub trait BatchStream: Close + Send {
    fn schema(&mut self) -> Result<SchemaRef>;

    fn has_next(&mut self) -> Result<bool>;

    fn next_batch(&mut self) -> Result<Batch>;
}

/// The stream type tasks hand to each other.
pub type SendableBatchStream = Box<dyn BatchStream>;

/// Stream over batches already in memory.
pub struct MemoryStream {
    schema: SchemaRef,
    batches: std::vec::IntoIter<RecordBatch>,
    pool: Arc<MemoryPool>,
    closed: bool,
}

impl MemoryStream {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>, pool: Arc<MemoryPool>) -> Self {
        Self {
            schema,
            batches: batches.into_iter(),
            pool,
            closed: false,
        }
    }
}

impl BatchStream for MemoryStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && !self.batches.as_slice().is_empty())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if self.closed {
            return Err(PfqError::StreamExhausted);
        }
        let rb = self.batches.next().ok_or(PfqError::StreamExhausted)?;
        Batch::try_new(rb, &self.pool)
    }
}

impl Close for MemoryStream {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.batches = Vec::new().into_iter();
        Ok(())
    }
}

/// Stream with a schema and no rows, e.g. a fragment that exists but was never written.
pub fn empty_stream(schema: SchemaRef) -> SendableBatchStream {
    Box::new(MemoryStream::new(schema, vec![], MemoryPool::unbounded()))
}

/// Inputs read one after the other; backs multi-input union tasks.
pub struct ConcatStream {
    inputs: Vec<SendableBatchStream>,
    current: usize,
    schema: SchemaRef,
    closed: bool,
}

impl ConcatStream {
    /// Takes ownership of `inputs`; on a schema mismatch every input is closed.
    pub fn try_new(mut inputs: Vec<SendableBatchStream>) -> Result<Self> {
        match common_schema(&mut inputs) {
            Ok(schema) => Ok(Self {
                inputs,
                current: 0,
                schema,
                closed: false,
            }),
            Err(e) => {
                let mut chain = CloseChain::after(e);
                chain.close_all_rev(&mut inputs);
                Err(chain.into_error())
            }
        }
    }
}

fn common_schema(inputs: &mut [SendableBatchStream]) -> Result<SchemaRef> {
    let mut schemas = Vec::with_capacity(inputs.len());
    for input in inputs.iter_mut() {
        schemas.push(input.schema()?);
    }
    let first = schemas
        .first()
        .cloned()
        .ok_or_else(|| PfqError::InvalidArgument("union needs at least one input".to_string()))?;
    for other in &schemas[1..] {
        if !same_columns(&first, other) {
            return Err(PfqError::InvalidArgument(format!(
                "union inputs disagree on schema: {:?} vs {:?}",
                column_names(&first),
                column_names(other)
            )));
        }
    }
    Ok(first)
}

/// Field names and types match; nullability and metadata may differ.
pub(crate) fn same_columns(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

pub(crate) fn column_names(schema: &Schema) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

impl BatchStream for ConcatStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        while self.current < self.inputs.len() {
            if self.inputs[self.current].has_next()? {
                return Ok(true);
            }
            self.current += 1;
        }
        Ok(false)
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next()? {
            return Err(PfqError::StreamExhausted);
        }
        let batch = self.inputs[self.current].next_batch()?;
        if Arc::ptr_eq(&batch.schema(), &self.schema) {
            return Ok(batch);
        }
        // inputs may differ in nullability or metadata
        batch.with_schema(self.schema.clone())
    }
}

impl Close for ConcatStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut chain = CloseChain::new();
        chain.close_all_rev(&mut self.inputs);
        chain.finish()
    }
}

impl Drop for ConcatStream {
    fn drop(&mut self) {
        close_quietly(self, "concat stream");
    }
}

/// Drain `stream` into record batches, closing it on every path.
pub fn collect_batches(mut stream: SendableBatchStream) -> Result<Vec<RecordBatch>> {
    let mut out = Vec::new();
    let drained = (|| -> Result<()> {
        while stream.has_next()? {
            out.push(stream.next_batch()?.into_record_batch());
        }
        Ok(())
    })();
    let mut chain = match drained {
        Ok(()) => CloseChain::new(),
        Err(e) => CloseChain::after(e),
    };
    chain.close(&mut stream);
    chain.finish()?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Async side: how results leave the engine.
// ---------------------------------------------------------------------------

/// A stream of RecordBatches that also knows its output schema.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> + Send {
    /// Output schema for every batch yielded by this stream.
    fn schema(&self) -> SchemaRef;
}

/// The async stream handed to callers of the engine.
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream>>;

/// Adapter that attaches a schema to any `Stream<Item = Result<RecordBatch>>`.
pub struct StreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> StreamAdapter<S> {
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> RecordBatchStream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Send + Unpin + 'static,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create a stream backed by a bounded channel.
///
/// Backpressure: when the receiver is slow and the buffer fills up,
/// `sender.send_batch(..)` waits until there is capacity again.
pub fn bounded_batch_channel(
    schema: SchemaRef,
    capacity: usize,
) -> (BatchSender, SendableRecordBatchStream) {
    let (tx, rx) = mpsc::channel::<Result<RecordBatch>>(capacity);
    let stream = Box::pin(StreamAdapter::new(schema, rx));
    (BatchSender { tx }, stream)
}

/// Sender side for `bounded_batch_channel`.
#[derive(Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Result<RecordBatch>>,
}

impl BatchSender {
    /// Send a batch (awaits if the channel buffer is full).
    pub async fn send_batch(&mut self, batch: RecordBatch) -> Result<()> {
        use futures::SinkExt;
        self.tx
            .send(Ok(batch))
            .await
            .map_err(|e| PfqError::Execution(format!("batch channel closed: {e}")))
    }

    /// Send an error and terminate downstream consumption.
    pub async fn send_error(&mut self, err: PfqError) -> Result<()> {
        use futures::SinkExt;
        self.tx
            .send(Err(err))
            .await
            .map_err(|e| PfqError::Execution(format!("batch channel closed: {e}")))
    }
}

/// Pump `stream` into an async stream from a blocking thread of `handle`.
///
/// Dropping the returned stream stops the pump at the next batch; the source is
/// closed either way.
pub fn into_record_batch_stream(
    mut stream: SendableBatchStream,
    handle: &tokio::runtime::Handle,
    capacity: usize,
) -> Result<SendableRecordBatchStream> {
    let schema = match stream.schema() {
        Ok(schema) => schema,
        Err(e) => {
            let mut chain = CloseChain::after(e);
            chain.close(&mut stream);
            return Err(chain.into_error());
        }
    };
    let (mut tx, rx) = bounded_batch_channel(schema, capacity.max(1));
    handle.spawn_blocking(move || {
        let pumped = (|| -> Result<()> {
            while stream.has_next()? {
                let rb = stream.next_batch()?.into_record_batch();
                if futures::executor::block_on(tx.send_batch(rb)).is_err() {
                    debug!("result receiver dropped; stopping pump");
                    return Ok(());
                }
            }
            Ok(())
        })();
        let mut chain = match pumped {
            Ok(()) => CloseChain::new(),
            Err(e) => CloseChain::after(e),
        };
        chain.close(&mut stream);
        if let Err(e) = chain.finish() {
            let _ = futures::executor::block_on(tx.send_error(e));
        }
    });
    Ok(rx)
}
