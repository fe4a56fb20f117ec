//! Partition metadata shared between the planner and the metadata directory.
//!
//! A fragment is bounded by a column-path range and a key range. Column ranges are
//! half-open `[start, end)` over path strings, with `None` meaning unbounded.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnsInterval {
    pub start: Option<String>,
    pub end: Option<String>,
    /// Prefix prepended to every column of a read-only (dummy) fragment.
    #[serde(default)]
    pub schema_prefix: Option<String>,
}

impl ColumnsInterval {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self {
            start,
            end,
            schema_prefix: None,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Closed interval spanning `first..=last`, with wildcard suffixes widened so that
    /// `a.*` covers every path under `a.`.
    pub fn covering(first: &str, last: &str) -> Self {
        let start = match first.find('*') {
            Some(0) => None,
            Some(idx) => Some(first[..idx].to_string()),
            None => Some(first.to_string()),
        };
        let end = match last.find('*') {
            Some(0) => None,
            Some(idx) => Some(format!("{}{}", &last[..idx], char::MAX)),
            None => Some(format!("{last}\0")),
        };
        Self::new(start, end)
    }

    /// Smallest interval holding every path in `paths`, whatever order they come in.
    ///
    /// Bounds compare byte-wise like [`ColumnsInterval::contains`], so a list sorted
    /// by another [`crate::PathOrdering`] still gets a correct hull. `None` when
    /// `paths` is empty.
    pub fn spanning(paths: &[String]) -> Option<Self> {
        let mut hull: Option<Self> = None;
        for path in paths {
            let one = Self::covering(path, path);
            hull = Some(match hull {
                None => one,
                Some(acc) => Self::new(
                    match (acc.start, one.start) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        _ => None,
                    },
                    match (acc.end, one.end) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        _ => None,
                    },
                ),
            });
        }
        hull
    }

    pub fn with_schema_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.schema_prefix = Some(prefix.into());
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        let after_start = self.start.as_deref().is_none_or(|s| s <= path);
        let before_end = self.end.as_deref().is_none_or(|e| path < e);
        after_start && before_end
    }

    pub fn intersects(&self, other: &ColumnsInterval) -> bool {
        let starts_before_other_ends = match (&self.start, &other.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        let other_starts_before_end = match (&other.start, &self.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        starts_before_other_ends && other_starts_before_end
    }
}

impl fmt::Display for ColumnsInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.as_deref().unwrap_or("-inf"),
            self.end.as_deref().unwrap_or("+inf")
        )
    }
}

/// Half-open key range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyInterval {
    pub start: i64,
    pub end: i64,
}

impl KeyInterval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn full() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn intersects(&self, other: &KeyInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for KeyInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentMeta {
    pub id: String,
    pub columns: ColumnsInterval,
    pub keys: KeyInterval,
    pub storage_unit: String,
    /// Read-only fragment exposed from pre-existing data under a schema prefix.
    #[serde(default)]
    pub dummy: bool,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl FragmentMeta {
    pub fn new(
        id: impl Into<String>,
        columns: ColumnsInterval,
        keys: KeyInterval,
        storage_unit: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            columns,
            keys,
            storage_unit: storage_unit.into(),
            dummy: false,
            valid: true,
        }
    }
}

/// Tag predicate attached to a scan; matched against per-column tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagFilter {
    /// `key=value`; a value of `*` accepts any value for the key.
    Base { key: String, value: String },
    And(Vec<TagFilter>),
    Or(Vec<TagFilter>),
}

impl TagFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        TagFilter::Base {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        match self {
            TagFilter::Base { key, value } => tags
                .get(key)
                .is_some_and(|v| value == "*" || v == value),
            TagFilter::And(children) => children.iter().all(|c| c.matches(tags)),
            TagFilter::Or(children) => children.iter().any(|c| c.matches(tags)),
        }
    }
}
