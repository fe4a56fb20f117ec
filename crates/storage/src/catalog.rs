use std::collections::BTreeMap;
use std::fs;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use pfq_common::{PfqError, Result};
use pfq_planner::{ColumnsInterval, FragmentLookup, FragmentMeta, KeyInterval, MetadataService};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnitDef {
    pub id: String,
    /// Read-only units only expose pre-existing data through dummy fragments.
    #[serde(default = "default_writable")]
    pub writable: bool,
}

fn default_writable() -> bool {
    true
}

/// On-disk layout read by [`InMemoryMetadata::load_from_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub storage_units: Vec<StorageUnitDef>,
    #[serde(default)]
    pub fragments: Vec<FragmentMeta>,
}

#[derive(Debug, Default)]
struct Directory {
    units: Vec<StorageUnitDef>,
    fragments: Vec<FragmentMeta>,
}

/// Single-process fragment directory.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    state: RwLock<Directory>,
    next_fragment: AtomicU64,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_storage_unit(&self, unit: StorageUnitDef) {
        let mut state = self.state.write().expect("metadata lock poisoned");
        state.units.retain(|u| u.id != unit.id);
        state.units.push(unit);
    }

    /// Register a fragment hosted by an already known storage unit.
    pub fn register_fragment(&self, fragment: FragmentMeta) -> Result<()> {
        let mut state = self.state.write().expect("metadata lock poisoned");
        if !state.units.iter().any(|u| u.id == fragment.storage_unit) {
            return Err(PfqError::Metadata(format!(
                "fragment {} refers to unknown storage unit '{}'",
                fragment.id, fragment.storage_unit
            )));
        }
        if state.fragments.iter().any(|f| f.id == fragment.id) {
            return Err(PfqError::Metadata(format!(
                "fragment {} is already registered",
                fragment.id
            )));
        }
        state.fragments.push(fragment);
        Ok(())
    }

    pub fn storage_units(&self) -> Vec<StorageUnitDef> {
        self.state
            .read()
            .expect("metadata lock poisoned")
            .units
            .clone()
    }

    pub fn fragments(&self) -> Vec<FragmentMeta> {
        self.state
            .read()
            .expect("metadata lock poisoned")
            .fragments
            .clone()
    }

    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let file: CatalogFile =
            serde_json::from_str(&s).map_err(|e| PfqError::InvalidConfig(e.to_string()))?;
        let catalog = Self::new();
        for unit in file.storage_units {
            catalog.register_storage_unit(unit);
        }
        for fragment in file.fragments {
            catalog.register_fragment(fragment)?;
        }
        Ok(catalog)
    }

    fn next_fragment_id(&self) -> String {
        format!("initial-{}", self.next_fragment.fetch_add(1, Ordering::Relaxed))
    }
}

impl MetadataService for InMemoryMetadata {
    fn lookup_fragments(
        &self,
        columns: &ColumnsInterval,
        keys: &KeyInterval,
    ) -> Result<FragmentLookup> {
        let state = self.state.read().expect("metadata lock poisoned");
        let mut lookup = FragmentLookup {
            by_key_interval: BTreeMap::new(),
            dummy: vec![],
        };
        for fragment in state.fragments.iter().filter(|f| f.keys.intersects(keys)) {
            if fragment.dummy {
                // dummy columns live under a schema prefix; paths are matched later
                lookup.dummy.push(fragment.clone());
            } else if fragment.valid && fragment.columns.intersects(columns) {
                lookup
                    .by_key_interval
                    .entry(fragment.keys)
                    .or_default()
                    .push(fragment.clone());
            }
        }
        Ok(lookup)
    }

    fn has_fragment(&self) -> bool {
        self.state
            .read()
            .expect("metadata lock poisoned")
            .fragments
            .iter()
            .any(|f| !f.dummy)
    }

    /// Split the column space at the bounds of `columns` and spread the pieces
    /// over the writable units. Every initial fragment spans all keys.
    fn create_initial_fragments(
        &self,
        columns: &ColumnsInterval,
        _keys: &KeyInterval,
    ) -> Result<bool> {
        let mut state = self.state.write().expect("metadata lock poisoned");
        if state.fragments.iter().any(|f| !f.dummy) {
            return Ok(true);
        }
        let writable = state
            .units
            .iter()
            .filter(|u| u.writable)
            .map(|u| u.id.clone())
            .collect::<Vec<_>>();
        if writable.is_empty() {
            return Ok(false);
        }

        let mut cuts = [columns.start.clone(), columns.end.clone()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        cuts.dedup();
        let mut bounds = vec![None];
        bounds.extend(cuts.into_iter().map(Some));
        bounds.push(None);
        let created = bounds
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                FragmentMeta::new(
                    self.next_fragment_id(),
                    ColumnsInterval::new(w[0].clone(), w[1].clone()),
                    KeyInterval::full(),
                    writable[i % writable.len()].clone(),
                )
            })
            .collect::<Vec<_>>();
        info!(
            fragments = created.len(),
            units = writable.len(),
            "initial fragments created"
        );
        state.fragments.extend(created);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, writable: bool) -> StorageUnitDef {
        StorageUnitDef {
            id: id.to_string(),
            writable,
        }
    }

    #[test]
    fn lookup_groups_by_key_interval() {
        let md = InMemoryMetadata::new();
        md.register_storage_unit(unit("u0", true));
        let k1 = KeyInterval::new(0, 10);
        let k2 = KeyInterval::new(10, 20);
        for (id, start, keys) in [("f1", "a", k1), ("f2", "m", k1), ("f3", "a", k2)] {
            md.register_fragment(FragmentMeta::new(
                id,
                ColumnsInterval::new(Some(start.to_string()), None),
                keys,
                "u0",
            ))
            .expect("register");
        }
        let lookup = md
            .lookup_fragments(&ColumnsInterval::covering("a.b", "x.y"), &KeyInterval::full())
            .expect("lookup");
        assert_eq!(lookup.by_key_interval[&k1].len(), 2);
        assert_eq!(lookup.by_key_interval[&k2].len(), 1);
        assert!(lookup.dummy.is_empty());
    }

    #[test]
    fn fragments_need_a_known_unit() {
        let md = InMemoryMetadata::new();
        let err = md
            .register_fragment(FragmentMeta::new(
                "f1",
                ColumnsInterval::unbounded(),
                KeyInterval::full(),
                "missing",
            ))
            .expect_err("unknown unit");
        assert!(matches!(err, PfqError::Metadata(_)));
    }

    #[test]
    fn initial_fragments_cover_the_whole_column_space() {
        let md = InMemoryMetadata::new();
        md.register_storage_unit(unit("u0", true));
        md.register_storage_unit(unit("u1", true));
        assert!(!md.has_fragment());
        let columns = ColumnsInterval::covering("a.b", "a.c");
        assert!(md
            .create_initial_fragments(&columns, &KeyInterval::full())
            .expect("create"));
        assert!(md.has_fragment());

        let fragments = md.fragments();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].columns.start, None);
        assert_eq!(fragments[2].columns.end, None);
        assert_eq!(fragments[0].storage_unit, "u0");
        assert_eq!(fragments[1].storage_unit, "u1");
        for path in ["", "a.b", "a.c", "zzz"] {
            assert_eq!(
                fragments.iter().filter(|f| f.columns.contains(path)).count(),
                1,
                "{path}"
            );
        }
    }

    #[test]
    fn no_writable_unit_means_no_initial_fragments() {
        let md = InMemoryMetadata::new();
        md.register_storage_unit(unit("ro", false));
        let created = md
            .create_initial_fragments(&ColumnsInterval::unbounded(), &KeyInterval::full())
            .expect("create");
        assert!(!created);
        assert!(md.fragments().is_empty());
    }

    #[test]
    fn catalog_file_parses_with_defaults() {
        let file: CatalogFile = serde_json::from_str(
            r#"{
                "storage_units": [{"id": "u0"}],
                "fragments": [{
                    "id": "f1",
                    "columns": {"start": "a", "end": null},
                    "keys": {"start": 0, "end": 100},
                    "storage_unit": "u0"
                }]
            }"#,
        )
        .expect("parse");
        assert!(file.storage_units[0].writable);
        assert!(file.fragments[0].valid);
        assert!(!file.fragments[0].dummy);
    }
}
