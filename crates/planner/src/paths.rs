//! Path merging and ordering applied before a folded subtree is rebuilt.
//!
//! Merge rules:
//! - a bare `*` subsumes every other path;
//! - a wildcard path `p*...` subsumes every concrete path starting with `p`;
//! - duplicates are dropped; the survivors are sorted with a [`PathOrdering`].

use std::cmp::Ordering;
use std::collections::HashSet;

use pfq_common::PathOrderingKind;

/// Total order over column paths.
pub trait PathOrdering: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// Byte-wise string order; `*` (0x2a) already sorts before `.` and alphanumerics.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicographicOrder;

impl PathOrdering for LexicographicOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// Compares dot-separated segments one at a time.
///
/// Ties: a `*` segment sorts before any literal segment at the same depth, and a
/// path that is a segment-prefix of another sorts first. Two paths that differ only
/// in which wildcard segments they carry fall back to byte-wise order, so the
/// ordering stays total.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentWiseOrder;

impl PathOrdering for SegmentWiseOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        let mut left = a.split('.');
        let mut right = b.split('.');
        loop {
            match (left.next(), right.next()) {
                (None, None) => return a.cmp(b),
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(l), Some(r)) => {
                    let ord = match (l == "*", r == "*") {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        (false, false) => l.cmp(r),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

pub fn path_ordering(kind: PathOrderingKind) -> Box<dyn PathOrdering> {
    match kind {
        PathOrderingKind::Lexicographic => Box::new(LexicographicOrder),
        PathOrderingKind::SegmentWise => Box::new(SegmentWiseOrder),
    }
}

pub fn merge_and_sort_paths(paths: &[String], ordering: &dyn PathOrdering) -> Vec<String> {
    if paths.iter().any(|p| p == "*") {
        return vec!["*".to_string()];
    }
    let prefixes = paths
        .iter()
        .filter_map(|p| p.find('*').map(|idx| &p[..idx]))
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    let mut merged = paths
        .iter()
        .filter(|p| {
            p.contains('*') || !prefixes.iter().any(|prefix| p.starts_with(prefix))
        })
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    merged.sort_by(|a, b| ordering.compare(a, b));
    merged
}

/// Whether `path` is selected by `pattern`, where `*` matches any run of characters.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == path;
    }
    let parts = pattern.split('*').collect::<Vec<_>>();
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !path.starts_with(first) || path.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &path[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
