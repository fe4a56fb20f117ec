use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{PfqError, Result};

/// Ordering applied to harvested paths before a folded subtree is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathOrderingKind {
    /// Plain byte-wise string order.
    #[default]
    Lexicographic,
    /// Dot-separated segments compared one by one; `*` sorts before any literal segment.
    SegmentWise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_size_rows: usize,
    pub mem_budget_bytes: usize,
    /// Upper bound on tasks running at the same time.
    pub max_concurrent_tasks: usize,
    pub path_ordering: PathOrderingKind,
    /// Let the metadata directory create first fragments when a lookup finds none.
    pub create_initial_fragments: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size_rows: 8192,
            mem_budget_bytes: 512 * 1024 * 1024,
            max_concurrent_tasks: 8,
            path_ordering: PathOrderingKind::Lexicographic,
            create_initial_fragments: true,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing fields keep their defaults.
    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: EngineConfig =
            serde_json::from_str(&s).map_err(|e| PfqError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size_rows == 0 {
            return Err(PfqError::InvalidConfig(
                "batch_size_rows must be positive".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(PfqError::InvalidConfig(
                "max_concurrent_tasks must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
