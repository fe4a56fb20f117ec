use std::collections::HashMap;
use std::sync::Arc;

use pfq_common::{PfqError, Result};
use pfq_execution::{ExecutorContext, SendableBatchStream};
use pfq_planner::{FragmentMeta, TagFilter};

/// Lightweight statistics about one fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Estimated row count, if known.
    pub estimated_rows: Option<u64>,
    /// Estimated in-memory bytes, if known.
    pub estimated_bytes: Option<u64>,
}

/// Storage abstraction serving fragment scans.
///
/// Implementations are backend-specific. Every scan keeps the `key` column first
/// and then the columns selected by `patterns` whose tags pass `tag_filter`.
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn estimate_stats(&self, fragment: &FragmentMeta) -> Stats;

    /// Open a stream over the rows of `fragment`.
    ///
    /// # Errors
    /// Returns a storage error when the fragment cannot be read.
    fn scan(
        &self,
        ctx: &ExecutorContext,
        fragment: &FragmentMeta,
        patterns: &[String],
        tag_filter: Option<&TagFilter>,
    ) -> Result<SendableBatchStream>;
}

/// Storage units known to the engine, each served by one provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    units: HashMap<String, Arc<dyn StorageProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut units = self
            .units
            .iter()
            .map(|(unit, p)| format!("{unit}={}", p.name()))
            .collect::<Vec<_>>();
        units.sort();
        f.debug_struct("ProviderRegistry")
            .field("units", &units)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, storage_unit: impl Into<String>, provider: Arc<dyn StorageProvider>) {
        self.units.insert(storage_unit.into(), provider);
    }

    pub fn get(&self, storage_unit: &str) -> Result<Arc<dyn StorageProvider>> {
        self.units.get(storage_unit).cloned().ok_or_else(|| {
            PfqError::Storage(format!("no provider serves storage unit '{storage_unit}'"))
        })
    }
}
