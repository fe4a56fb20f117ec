use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use arrow_schema::SchemaRef;
use pfq_common::{MetricsRegistry, QueryId, Result, TaskId};

use crate::batch::Batch;
use crate::close::{Close, close_quietly};
use crate::stream::{BatchStream, SendableBatchStream};

/// Per-task counters, flushed to the registry once the task's output is closed.
#[derive(Debug, Default)]
pub struct TaskMetrics {
    rows_in: AtomicU64,
    batches_in: AtomicU64,
    rows_out: AtomicU64,
    batches_out: AtomicU64,
    cpu_nanos: AtomicU64,
    flushed: AtomicBool,
}

impl TaskMetrics {
    pub fn rows_in(&self) -> u64 {
        self.rows_in.load(Ordering::Relaxed)
    }

    pub fn rows_out(&self) -> u64 {
        self.rows_out.load(Ordering::Relaxed)
    }

    pub fn batches_out(&self) -> u64 {
        self.batches_out.load(Ordering::Relaxed)
    }

    pub fn cpu_secs(&self) -> f64 {
        self.cpu_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }

    pub(crate) fn add_cpu(&self, since: Instant) {
        let nanos = u64::try_from(since.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.cpu_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Push the counters to `registry`; only the first call has an effect.
    pub(crate) fn flush(
        &self,
        registry: &MetricsRegistry,
        query_id: QueryId,
        task_id: TaskId,
        operator: &str,
    ) {
        if self.flushed.swap(true, Ordering::AcqRel) {
            return;
        }
        registry.record_operator(
            &query_id.to_string(),
            task_id.0,
            operator,
            self.rows_in.load(Ordering::Relaxed),
            self.rows_out.load(Ordering::Relaxed),
            self.batches_in.load(Ordering::Relaxed),
            self.batches_out.load(Ordering::Relaxed),
            self.cpu_secs(),
        );
    }
}

/// Which counters a [`MeteredStream`] feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Input,
    Output,
}

/// Counts the batches crossing a task boundary.
pub(crate) struct MeteredStream {
    inner: SendableBatchStream,
    metrics: Arc<TaskMetrics>,
    side: Side,
    on_close: Option<Box<dyn FnOnce(&TaskMetrics) + Send>>,
    closed: bool,
}

impl MeteredStream {
    pub(crate) fn input(inner: SendableBatchStream, metrics: Arc<TaskMetrics>) -> Self {
        Self {
            inner,
            metrics,
            side: Side::Input,
            on_close: None,
            closed: false,
        }
    }

    /// Output side; `on_close` runs once when the stream is closed or dropped.
    pub(crate) fn output(
        inner: SendableBatchStream,
        metrics: Arc<TaskMetrics>,
        on_close: Box<dyn FnOnce(&TaskMetrics) + Send>,
    ) -> Self {
        Self {
            inner,
            metrics,
            side: Side::Output,
            on_close: Some(on_close),
            closed: false,
        }
    }
}

impl BatchStream for MeteredStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        self.inner.schema()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let start = Instant::now();
        let out = self.inner.has_next();
        if self.side == Side::Output {
            self.metrics.add_cpu(start);
        }
        out
    }

    fn next_batch(&mut self) -> Result<Batch> {
        let start = Instant::now();
        let batch = self.inner.next_batch()?;
        let rows = batch.num_rows() as u64;
        match self.side {
            Side::Input => {
                self.metrics.rows_in.fetch_add(rows, Ordering::Relaxed);
                self.metrics.batches_in.fetch_add(1, Ordering::Relaxed);
            }
            Side::Output => {
                self.metrics.rows_out.fetch_add(rows, Ordering::Relaxed);
                self.metrics.batches_out.fetch_add(1, Ordering::Relaxed);
                self.metrics.add_cpu(start);
            }
        }
        Ok(batch)
    }
}

impl Close for MeteredStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let out = self.inner.close();
        if let Some(on_close) = self.on_close.take() {
            on_close(&self.metrics);
        }
        out
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        close_quietly(self, "task output stream");
    }
}
