#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::{Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use pfq_common::{EngineConfig, MemoryPool, MetricsRegistry, PfqError, QueryId, Result};
use pfq_execution::{
    Batch, BatchStream, Close, ExecutorContext, PhysicalOptimizer, RequestContext, RequestParts,
    Scheduler, SendableBatchStream, SourceFactory, Task, UdfRegistry,
};
use pfq_planner::{
    ColumnsInterval, CompletenessChecker, ConstraintChecker, FragmentLookup, KeyInterval,
    MetadataService, Operator,
};

/// Shared counters of a [`CountingStream`].
#[derive(Debug, Default)]
pub struct StreamProbe {
    pub pulled: AtomicUsize,
    pub closes: AtomicUsize,
}

impl StreamProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-memory stream that records how often it was pulled and released, and can
/// fail on a given pull or on close.
pub struct CountingStream {
    schema: SchemaRef,
    batches: std::vec::IntoIter<RecordBatch>,
    probe: Arc<StreamProbe>,
    fail_at: Option<usize>,
    fail_close: bool,
    closed: bool,
}

impl CountingStream {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>, probe: Arc<StreamProbe>) -> Self {
        Self {
            schema,
            batches: batches.into_iter(),
            probe,
            fail_at: None,
            fail_close: false,
            closed: false,
        }
    }

    pub fn failing_at(mut self, pull: usize) -> Self {
        self.fail_at = Some(pull);
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl BatchStream for CountingStream {
    fn schema(&mut self) -> Result<SchemaRef> {
        Ok(self.schema.clone())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && !self.batches.as_slice().is_empty())
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if !self.has_next()? {
            return Err(PfqError::StreamExhausted);
        }
        let n = self.probe.pulled.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(n) {
            return Err(PfqError::Storage(format!("pull {n} failed")));
        }
        let rb = self
            .batches
            .next()
            .ok_or(PfqError::StreamExhausted)?;
        Ok(Batch::unaccounted(rb))
    }
}

impl Close for CountingStream {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(PfqError::Storage("close failed".to_string()));
        }
        Ok(())
    }
}

/// Source task body handing out a prepared stream once.
pub struct OnceSource {
    stream: std::sync::Mutex<Option<Result<SendableBatchStream>>>,
}

impl OnceSource {
    pub fn new(stream: impl BatchStream + 'static) -> Arc<Self> {
        Arc::new(Self {
            stream: std::sync::Mutex::new(Some(Ok(Box::new(stream)))),
        })
    }

    pub fn failing(error: PfqError) -> Arc<Self> {
        Arc::new(Self {
            stream: std::sync::Mutex::new(Some(Err(error))),
        })
    }
}

impl SourceFactory for OnceSource {
    fn name(&self) -> &str {
        "TestSource"
    }

    fn open(&self, _ctx: &ExecutorContext) -> Result<SendableBatchStream> {
        self.stream
            .lock()
            .expect("source lock")
            .take()
            .unwrap_or_else(|| Err(PfqError::Execution("source opened twice".to_string())))
    }
}

pub struct NoMetadata;

impl MetadataService for NoMetadata {
    fn lookup_fragments(&self, _: &ColumnsInterval, _: &KeyInterval) -> Result<FragmentLookup> {
        Err(PfqError::Metadata("no metadata in this test".to_string()))
    }

    fn has_fragment(&self) -> bool {
        false
    }

    fn create_initial_fragments(&self, _: &ColumnsInterval, _: &KeyInterval) -> Result<bool> {
        Ok(false)
    }
}

pub struct NoOptimizer;

impl PhysicalOptimizer for NoOptimizer {
    fn name(&self) -> &str {
        "none"
    }

    fn optimize(&self, _: &Operator, _: &Arc<RequestContext>) -> Result<Arc<Task>> {
        Err(PfqError::Planning("no optimizer in this test".to_string()))
    }
}

pub struct RejectAll;

impl ConstraintChecker for RejectAll {
    fn name(&self) -> &str {
        "reject_all"
    }

    fn check(&self, _: &Operator) -> bool {
        false
    }
}

pub struct ContextBuilder {
    pub config: EngineConfig,
    pub pool: Arc<MemoryPool>,
    pub optimizer: Arc<dyn PhysicalOptimizer>,
    pub checker: Arc<dyn ConstraintChecker>,
    pub metrics: MetricsRegistry,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            pool: MemoryPool::unbounded(),
            optimizer: Arc::new(NoOptimizer),
            checker: Arc::new(CompletenessChecker),
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn optimizer(mut self, optimizer: Arc<dyn PhysicalOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn checker(mut self, checker: Arc<dyn ConstraintChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn pool(mut self, pool: Arc<MemoryPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<RequestContext> {
        let scheduler = Scheduler::new(
            tokio::runtime::Handle::current(),
            self.config.max_concurrent_tasks,
            self.metrics.clone(),
        );
        RequestContext::new(RequestParts {
            query_id: QueryId(1),
            config: self.config,
            pool: self.pool,
            metrics: self.metrics,
            udfs: Arc::new(UdfRegistry::new()),
            optimizer: self.optimizer,
            metadata: Arc::new(NoMetadata),
            checker: self.checker,
            scheduler,
        })
    }
}

pub fn int_schema(name: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(name, DataType::Int64, true)]))
}

pub fn int_batch(schema: &SchemaRef, values: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))])
        .expect("int batch")
}

pub fn keyed_schema(column: &str) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Int64, false),
        Field::new(column, DataType::Int64, true),
    ]))
}

pub fn keyed_batch(schema: &SchemaRef, keys: Vec<i64>, values: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(Int64Array::from(values)),
        ],
    )
    .expect("keyed batch")
}

pub fn path_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        "selected_path",
        DataType::Utf8,
        true,
    )]))
}

pub fn path_batch(paths: &[&str]) -> RecordBatch {
    RecordBatch::try_new(
        path_schema(),
        vec![Arc::new(StringArray::from(paths.to_vec()))],
    )
    .expect("path batch")
}

pub fn column_i64(batches: &[RecordBatch], column: &str) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|b| {
            let idx = b.schema().index_of(column).expect("column");
            b.column(idx)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64")
                .iter()
                .map(|v| v.unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect()
}
