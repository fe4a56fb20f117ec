use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use pfq_common::{EngineConfig, IdSequence, MemoryPool, MetricsRegistry, PfqError, Result};
use pfq_execution::{
    PhysicalOptimizer, RequestContext, RequestParts, ResultHandle, Scheduler,
    SendableRecordBatchStream, UdfRegistry, collect_batches, explain_tasks,
    into_record_batch_stream,
};
use pfq_planner::{ConstraintChecker, MetadataService, Operator, explain_operator};
use tokio::runtime::Handle;
use tracing::info;

pub type SharedSession = Arc<Session>;

/// Batches buffered between the engine and an async result reader.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Engine-wide collaborators; each query gets its own [`RequestContext`] on top.
pub struct Session {
    pub config: EngineConfig,
    pub pool: Arc<MemoryPool>,
    pub metrics: MetricsRegistry,
    pub udfs: Arc<UdfRegistry>,
    pub metadata: Arc<dyn MetadataService>,
    pub checker: Arc<dyn ConstraintChecker>,
    pub optimizer: Arc<dyn PhysicalOptimizer>,
    pub scheduler: Arc<Scheduler>,
    pub runtime: Handle,
    query_ids: IdSequence,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("optimizer", &self.optimizer.name())
            .field("checker", &self.checker.name())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Collaborators a [`Session`] is assembled from.
pub struct SessionParts {
    pub config: EngineConfig,
    pub metadata: Arc<dyn MetadataService>,
    pub checker: Arc<dyn ConstraintChecker>,
    pub optimizer: Arc<dyn PhysicalOptimizer>,
    pub runtime: Handle,
}

impl Session {
    pub fn new(parts: SessionParts) -> Result<Self> {
        parts.config.validate()?;
        let metrics = MetricsRegistry::new();
        let scheduler = Scheduler::new(
            parts.runtime.clone(),
            parts.config.max_concurrent_tasks,
            metrics.clone(),
        );
        Ok(Self {
            pool: MemoryPool::new(parts.config.mem_budget_bytes),
            config: parts.config,
            metrics,
            udfs: Arc::new(UdfRegistry::new()),
            metadata: parts.metadata,
            checker: parts.checker,
            optimizer: parts.optimizer,
            scheduler,
            runtime: parts.runtime,
            query_ids: IdSequence::new(),
        })
    }

    pub fn request_context(&self) -> Arc<RequestContext> {
        RequestContext::new(RequestParts {
            query_id: self.query_ids.next_query(),
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            metrics: self.metrics.clone(),
            udfs: Arc::clone(&self.udfs),
            optimizer: Arc::clone(&self.optimizer),
            metadata: Arc::clone(&self.metadata),
            checker: Arc::clone(&self.checker),
            scheduler: Arc::clone(&self.scheduler),
        })
    }

    /// Validate, lower and submit `plan`.
    pub fn submit(&self, plan: &Operator) -> Result<ResultHandle> {
        if !self.checker.check(plan) {
            return Err(PfqError::Planning(format!(
                "plan rejected by checker '{}':\n{}",
                self.checker.name(),
                explain_operator(plan)
            )));
        }
        let ctx = self.request_context();
        let root = self.optimizer.optimize(plan, &ctx)?;
        info!(
            query_id = %ctx.query_id,
            root = %root.id(),
            optimizer = self.optimizer.name(),
            "query submitted"
        );
        Ok(ctx.scheduler.submit(&root))
    }

    pub async fn collect(&self, plan: &Operator) -> Result<Vec<RecordBatch>> {
        let stream = self.submit(plan)?.wait().await?;
        self.runtime
            .spawn_blocking(move || collect_batches(stream))
            .await
            .map_err(|e| PfqError::Execution(format!("result collector failed: {e}")))?
    }

    pub async fn execute_stream(&self, plan: &Operator) -> Result<SendableRecordBatchStream> {
        let stream = self.submit(plan)?.wait().await?;
        into_record_batch_stream(stream, &self.runtime, RESULT_CHANNEL_CAPACITY)
    }

    /// Logical tree followed by the task DAG it lowers to. Nothing is executed.
    pub fn explain(&self, plan: &Operator) -> Result<String> {
        let ctx = self.request_context();
        let root = self.optimizer.optimize(plan, &ctx)?;
        Ok(format!(
            "== operators ==\n{}== tasks ==\n{}",
            explain_operator(plan),
            explain_tasks(&root)
        ))
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }
}
