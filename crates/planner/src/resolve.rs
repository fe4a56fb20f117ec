//! Turn fragment lookups into scan subtrees.

use pfq_common::{PfqError, Result};

use crate::fragment::{ColumnsInterval, TagFilter};
use crate::metadata::FragmentLookup;
use crate::operator::{
    AddSchemaPrefix, FragmentScan, Operator, join_by_key, union_all,
};

/// Build the operator reading `paths` from every fragment in `lookup`.
///
/// Fragments sharing a key interval are key-joined (they hold different columns of
/// the same rows); key intervals are then unioned. Valid dummy fragments are
/// scanned with their schema prefix stripped, re-prefixed, and key-joined with the
/// rest.
pub fn merge_raw_data(
    lookup: &FragmentLookup,
    paths: &[String],
    tag_filter: Option<&TagFilter>,
) -> Result<Operator> {
    let mut unions = Vec::with_capacity(lookup.by_key_interval.len());
    for fragments in lookup.by_key_interval.values() {
        let scans = fragments
            .iter()
            .map(|fragment| {
                Operator::FragmentScan(FragmentScan {
                    fragment: fragment.clone(),
                    patterns: paths.to_vec(),
                    tag_filter: tag_filter.cloned(),
                })
            })
            .collect::<Vec<_>>();
        if let Some(joined) = join_by_key(scans) {
            unions.push(joined);
        }
    }
    let mut operator = union_all(unions);

    if !lookup.dummy.is_empty() {
        let mut joins = Vec::new();
        for fragment in lookup.dummy.iter().filter(|f| f.valid) {
            let prefix = fragment.columns.schema_prefix.clone().unwrap_or_default();
            let patterns = path_match_prefix(paths, &fragment.columns, &prefix);
            if patterns.is_empty() {
                continue;
            }
            let scan = Operator::FragmentScan(FragmentScan {
                fragment: fragment.clone(),
                patterns,
                tag_filter: tag_filter.cloned(),
            });
            joins.push(if prefix.is_empty() {
                scan
            } else {
                Operator::AddSchemaPrefix(AddSchemaPrefix {
                    input: Box::new(scan),
                    prefix,
                })
            });
        }
        if let Some(op) = operator {
            joins.push(op);
        }
        operator = join_by_key(joins);
    }

    operator.ok_or_else(|| {
        PfqError::Metadata(format!("no fragment covers paths {paths:?}"))
    })
}

/// Paths of `paths` that fall under a dummy fragment, with its schema prefix removed.
pub fn path_match_prefix(
    paths: &[String],
    columns: &ColumnsInterval,
    schema_prefix: &str,
) -> Vec<String> {
    let mut out = Vec::new();
    for path in paths {
        if path == "*" || path == "*.*" {
            out.push(path.clone());
            continue;
        }
        let stripped = if schema_prefix.is_empty() {
            path.as_str()
        } else if let Some(rest) = path
            .strip_prefix(schema_prefix)
            .and_then(|r| r.strip_prefix('.'))
        {
            rest
        } else if let Some(rest) = path.strip_prefix("*.") {
            rest
        } else {
            continue;
        };
        if stripped.contains('*') || columns.contains(stripped) {
            out.push(stripped.to_string());
        }
    }
    out
}
