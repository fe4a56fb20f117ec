use std::sync::Arc;

use pfq_common::Result;
use pfq_execution::{ExecutorContext, SendableBatchStream, SourceFactory};
use pfq_planner::FragmentScan;
use tracing::debug;

use crate::provider::StorageProvider;

/// Source task body reading one fragment through the provider of its storage unit.
pub struct FragmentScanSource {
    provider: Arc<dyn StorageProvider>,
    scan: FragmentScan,
}

impl FragmentScanSource {
    pub fn new(provider: Arc<dyn StorageProvider>, scan: FragmentScan) -> Self {
        Self { provider, scan }
    }
}

impl SourceFactory for FragmentScanSource {
    fn name(&self) -> &str {
        "FragmentScan"
    }

    fn open(&self, ctx: &ExecutorContext) -> Result<SendableBatchStream> {
        debug!(
            query_id = %ctx.query_id,
            task_id = %ctx.task_id,
            fragment = %self.scan.fragment.id,
            storage_unit = %self.scan.fragment.storage_unit,
            provider = self.provider.name(),
            "opening fragment scan"
        );
        self.provider.scan(
            ctx,
            &self.scan.fragment,
            &self.scan.patterns,
            self.scan.tag_filter.as_ref(),
        )
    }
}
