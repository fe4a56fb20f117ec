use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use pfq_common::{
    EngineConfig, IdSequence, MemoryPool, MetricsRegistry, QueryId, Result, TaskId,
};
use pfq_planner::{ConstraintChecker, MetadataService};

use crate::batch::Batch;
use crate::optimizer::PhysicalOptimizer;
use crate::scheduler::Scheduler;
use crate::udf::UdfRegistry;

/// What an executor may see while it runs inside one task.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    pub query_id: QueryId,
    pub task_id: TaskId,
    /// Target batch size for operators that coalesce/split.
    pub batch_size_rows: usize,
    pub pool: Arc<MemoryPool>,
    pub udfs: Arc<UdfRegistry>,
}

impl ExecutorContext {
    /// Account `data` against the query's memory pool.
    pub fn batch(&self, data: RecordBatch) -> Result<Batch> {
        Batch::try_new(data, &self.pool)
    }
}

/// Query-scoped state shared by every task of one request.
///
/// Collaborators are carried here instead of living in process-wide statics, so a
/// fold can reach the optimizer, metadata and checker of its own query.
pub struct RequestContext {
    pub query_id: QueryId,
    pub config: EngineConfig,
    pub pool: Arc<MemoryPool>,
    pub metrics: MetricsRegistry,
    pub udfs: Arc<UdfRegistry>,
    pub optimizer: Arc<dyn PhysicalOptimizer>,
    pub metadata: Arc<dyn MetadataService>,
    pub checker: Arc<dyn ConstraintChecker>,
    pub scheduler: Arc<Scheduler>,
    task_ids: IdSequence,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("query_id", &self.query_id)
            .field("config", &self.config)
            .field("checker", &self.checker.name())
            .finish_non_exhaustive()
    }
}

/// Everything needed to build a [`RequestContext`].
pub struct RequestParts {
    pub query_id: QueryId,
    pub config: EngineConfig,
    pub pool: Arc<MemoryPool>,
    pub metrics: MetricsRegistry,
    pub udfs: Arc<UdfRegistry>,
    pub optimizer: Arc<dyn PhysicalOptimizer>,
    pub metadata: Arc<dyn MetadataService>,
    pub checker: Arc<dyn ConstraintChecker>,
    pub scheduler: Arc<Scheduler>,
}

impl RequestContext {
    pub fn new(parts: RequestParts) -> Arc<Self> {
        Arc::new(Self {
            query_id: parts.query_id,
            config: parts.config,
            pool: parts.pool,
            metrics: parts.metrics,
            udfs: parts.udfs,
            optimizer: parts.optimizer,
            metadata: parts.metadata,
            checker: parts.checker,
            scheduler: parts.scheduler,
            task_ids: IdSequence::new(),
        })
    }

    pub fn next_task_id(&self) -> TaskId {
        self.task_ids.next_task()
    }

    pub fn executor_context(&self, task_id: TaskId) -> ExecutorContext {
        ExecutorContext {
            query_id: self.query_id,
            task_id,
            batch_size_rows: self.config.batch_size_rows,
            pool: Arc::clone(&self.pool),
            udfs: Arc::clone(&self.udfs),
        }
    }
}
