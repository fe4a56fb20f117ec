use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use pfq_common::{EngineConfig, MemoryPool, PfqError, Result};
use pfq_execution::{ResultHandle, ScalarUdf, SendableRecordBatchStream};
use pfq_planner::{
    ColumnsInterval, CompletenessChecker, ConstraintChecker, KeyInterval, MetadataService,
    Operator, TagFilter, fragments_for_interval, merge_and_sort_paths, merge_raw_data,
    path_ordering,
};
use pfq_storage::{InMemoryMetadata, ProviderRegistry, StorageProvider};
use tokio::runtime::Handle;

use crate::DataFrame;
use crate::optimizer::NaivePhysicalOptimizer;
use crate::session::{Session, SessionParts, SharedSession};

#[derive(Clone, Debug)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    /// Engine over an empty in-memory directory. Must be called inside a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Register or replace a scalar UDF. Returns `true` when one was replaced.
    pub fn register_udf(&self, udf: Arc<dyn ScalarUdf>) -> bool {
        self.session.udfs.register(udf)
    }

    /// Start from an arbitrary operator tree.
    pub fn plan(&self, plan: Operator) -> DataFrame {
        DataFrame::new(self.session.clone(), plan)
    }

    /// Read `paths` over `keys` from every fragment that holds them.
    ///
    /// Wildcard paths are merged the same way a fold merges harvested paths.
    pub fn read(
        &self,
        paths: &[String],
        keys: KeyInterval,
        tag_filter: Option<TagFilter>,
    ) -> Result<DataFrame> {
        let ordering = path_ordering(self.session.config.path_ordering);
        let sorted = merge_and_sort_paths(paths, ordering.as_ref());
        let Some(columns) = ColumnsInterval::spanning(&sorted) else {
            return Err(PfqError::InvalidArgument("read needs at least one path".to_string()));
        };
        let lookup = fragments_for_interval(
            self.session.metadata.as_ref(),
            &columns,
            &keys,
            self.session.config.create_initial_fragments,
        )?;
        let plan = merge_raw_data(&lookup, &sorted, tag_filter.as_ref())?;
        Ok(self.plan(plan))
    }

    pub fn submit(&self, plan: &Operator) -> Result<ResultHandle> {
        self.session.submit(plan)
    }

    pub async fn collect(&self, plan: &Operator) -> Result<Vec<RecordBatch>> {
        self.session.collect(plan).await
    }

    pub async fn execute_stream(&self, plan: &Operator) -> Result<SendableRecordBatchStream> {
        self.session.execute_stream(plan).await
    }

    pub fn explain(&self, plan: &Operator) -> Result<String> {
        self.session.explain(plan)
    }

    pub fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.session.pool
    }

    pub fn prometheus_metrics(&self) -> String {
        self.session.prometheus_metrics()
    }
}

/// Wires the collaborators of an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    metadata: Option<Arc<dyn MetadataService>>,
    providers: ProviderRegistry,
    checker: Arc<dyn ConstraintChecker>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metadata: None,
            providers: ProviderRegistry::new(),
            checker: Arc::new(CompletenessChecker),
            runtime: None,
        }
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Serve `storage_unit` with `provider`.
    pub fn provider(
        mut self,
        storage_unit: impl Into<String>,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        self.providers.register(storage_unit, provider);
        self
    }

    pub fn checker(mut self, checker: Arc<dyn ConstraintChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Runtime whose blocking pool runs the tasks; defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                PfqError::InvalidConfig(format!("engine needs a tokio runtime: {e}"))
            })?,
        };
        let session = Session::new(SessionParts {
            config: self.config,
            metadata: self
                .metadata
                .unwrap_or_else(|| Arc::new(InMemoryMetadata::new())),
            checker: self.checker,
            optimizer: Arc::new(NaivePhysicalOptimizer::new(self.providers)),
            runtime,
        })?;
        Ok(Engine {
            session: Arc::new(session),
        })
    }
}
