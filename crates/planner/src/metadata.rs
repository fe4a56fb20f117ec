//! Contract with the metadata directory that owns cluster-wide fragment state.

use std::collections::BTreeMap;

use pfq_common::Result;
use tracing::info;

use crate::fragment::{ColumnsInterval, FragmentMeta, KeyInterval};

/// Fragments overlapping a lookup, grouped by key interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentLookup {
    /// Writable fragments, grouped by key interval.
    pub by_key_interval: BTreeMap<KeyInterval, Vec<FragmentMeta>>,
    /// Read-only fragments exposing pre-existing data under a schema prefix.
    pub dummy: Vec<FragmentMeta>,
}

impl FragmentLookup {
    pub fn is_empty(&self) -> bool {
        self.by_key_interval.values().all(Vec::is_empty) && self.dummy.is_empty()
    }
}

/// Metadata collaborator. The only place the engine touches partition state.
pub trait MetadataService: Send + Sync {
    /// Fragments whose column and key ranges overlap the given intervals.
    fn lookup_fragments(
        &self,
        columns: &ColumnsInterval,
        keys: &KeyInterval,
    ) -> Result<FragmentLookup>;

    /// Whether any writable fragment exists yet.
    fn has_fragment(&self) -> bool;

    /// Create the first fragments of an empty cluster so that `columns` is covered.
    ///
    /// Returns `false` when no writable storage is available to host them.
    fn create_initial_fragments(&self, columns: &ColumnsInterval, keys: &KeyInterval)
    -> Result<bool>;
}

/// Look up fragments for `columns`, creating first fragments on an empty cluster.
pub fn fragments_for_interval(
    metadata: &dyn MetadataService,
    columns: &ColumnsInterval,
    keys: &KeyInterval,
    allow_initial_creation: bool,
) -> Result<FragmentLookup> {
    let lookup = metadata.lookup_fragments(columns, keys)?;
    if metadata.has_fragment() || !allow_initial_creation {
        return Ok(lookup);
    }
    if metadata.create_initial_fragments(columns, keys)? {
        info!(columns = %columns, keys = %keys, "created initial fragments");
    }
    metadata.lookup_fragments(columns, keys)
}
