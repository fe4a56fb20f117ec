//! Logical side of the engine: operator trees, fragment metadata, path handling and
//! the checks a tree must pass before it is lowered into tasks.

pub mod constraint;
pub mod explain;
pub mod expr;
pub mod fragment;
pub mod metadata;
pub mod operator;
pub mod paths;
pub mod resolve;

pub use constraint::{AllOf, CompletenessChecker, ConstraintChecker};
pub use explain::explain_operator;
pub use expr::*;
pub use fragment::{ColumnsInterval, FragmentMeta, KeyInterval, TagFilter};
pub use metadata::{FragmentLookup, MetadataService, fragments_for_interval};
pub use operator::*;
pub use paths::{
    LexicographicOrder, PathOrdering, SegmentWiseOrder, merge_and_sort_paths, path_matches,
    path_ordering,
};
pub use resolve::{merge_raw_data, path_match_prefix};
