use pfq_common::Result;
use serde::{Deserialize, Serialize};

use crate::expr::{AggExpr, Expr};
use crate::fragment::{FragmentMeta, KeyInterval, TagFilter};

/// Name of the key column every fragment scan emits first.
pub const KEY_COLUMN: &str = "key";

/// Name of the marker column produced by [`ValueToSelectedPath`].
pub const SELECTED_PATH_FIELD: &str = "selected_path";

/// Logical operator tree handed to the physical optimizer.
///
/// Placeholders ([`Operator::ProjectWaitingForPath`] and `need_selected_path` flags)
/// must be resolved before the tree passes a [`crate::ConstraintChecker`]; a nested
/// [`Operator::Folded`] keeps its own placeholders until it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    /// Read selected paths of one fragment.
    FragmentScan(FragmentScan),
    Project(Project),
    /// Output columns in pattern order.
    Reorder(Reorder),
    /// Row filter.
    Select(Select),
    Limit(Limit),
    Sort(Sort),
    Aggregate(Aggregate),
    Distinct(Distinct),
    AddSchemaPrefix(AddSchemaPrefix),
    /// Turn the values of one column into path names in the marker column.
    ValueToSelectedPath(ValueToSelectedPath),
    /// Full outer join on [`KEY_COLUMN`], stitching column-partitioned fragments.
    KeyJoin(KeyJoin),
    /// Equi inner join on named columns.
    InnerJoin(InnerJoin),
    Union(Union),
    /// Scan whose paths are only known once a folded subtree has run.
    ProjectWaitingForPath(ProjectWaitingForPath),
    /// Deferred subtree rebuilt from the paths its inputs select at runtime.
    Folded(Folded),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentScan {
    pub fragment: FragmentMeta,
    pub patterns: Vec<String>,
    pub tag_filter: Option<TagFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub input: Box<Operator>,
    pub patterns: Vec<String>,
    /// Patterns are completed with the harvested paths of an enclosing fold.
    pub need_selected_path: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reorder {
    pub input: Box<Operator>,
    pub patterns: Vec<String>,
    pub need_selected_path: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub input: Box<Operator>,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub input: Box<Operator>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub input: Box<Operator>,
    pub keys: Vec<SortKey>,
}

/// Whole-input aggregate producing a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub input: Box<Operator>,
    pub aggs: Vec<(AggExpr, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distinct {
    pub input: Box<Operator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSchemaPrefix {
    pub input: Box<Operator>,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueToSelectedPath {
    pub input: Box<Operator>,
    pub column: String,
    /// Prepended as `prefix.value`; empty keeps the raw value.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyJoin {
    pub left: Box<Operator>,
    pub right: Box<Operator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerJoin {
    pub left: Box<Operator>,
    pub right: Box<Operator>,
    pub left_on: String,
    pub right_on: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Union {
    pub inputs: Vec<Operator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectWaitingForPath {
    pub keys: KeyInterval,
    pub tag_filter: Option<TagFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folded {
    /// Subtrees producing the [`SELECTED_PATH_FIELD`] marker column.
    pub inputs: Vec<Operator>,
    pub folded_root: Box<Operator>,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::FragmentScan(_) => "FragmentScan",
            Operator::Project(_) => "Project",
            Operator::Reorder(_) => "Reorder",
            Operator::Select(_) => "Select",
            Operator::Limit(_) => "Limit",
            Operator::Sort(_) => "Sort",
            Operator::Aggregate(_) => "Aggregate",
            Operator::Distinct(_) => "Distinct",
            Operator::AddSchemaPrefix(_) => "AddSchemaPrefix",
            Operator::ValueToSelectedPath(_) => "ValueToSelectedPath",
            Operator::KeyJoin(_) => "KeyJoin",
            Operator::InnerJoin(_) => "InnerJoin",
            Operator::Union(_) => "Union",
            Operator::ProjectWaitingForPath(_) => "ProjectWaitingForPath",
            Operator::Folded(_) => "Folded",
        }
    }

    /// Returns direct child operators.
    ///
    /// The folded root of [`Operator::Folded`] is not a child: it only exists as a
    /// template until the fold resolves it.
    pub fn children(&self) -> Vec<&Operator> {
        match self {
            Operator::FragmentScan(_) | Operator::ProjectWaitingForPath(_) => vec![],
            Operator::KeyJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            Operator::InnerJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            Operator::Union(x) => x.inputs.iter().collect(),
            Operator::Folded(x) => x.inputs.iter().collect(),
            other => other.unary_input().into_iter().collect(),
        }
    }

    pub fn unary_input(&self) -> Option<&Operator> {
        match self {
            Operator::Project(x) => Some(&x.input),
            Operator::Reorder(x) => Some(&x.input),
            Operator::Select(x) => Some(&x.input),
            Operator::Limit(x) => Some(&x.input),
            Operator::Sort(x) => Some(&x.input),
            Operator::Aggregate(x) => Some(&x.input),
            Operator::Distinct(x) => Some(&x.input),
            Operator::AddSchemaPrefix(x) => Some(&x.input),
            Operator::ValueToSelectedPath(x) => Some(&x.input),
            _ => None,
        }
    }

    pub fn unary_input_mut(&mut self) -> Option<&mut Box<Operator>> {
        match self {
            Operator::Project(x) => Some(&mut x.input),
            Operator::Reorder(x) => Some(&mut x.input),
            Operator::Select(x) => Some(&mut x.input),
            Operator::Limit(x) => Some(&mut x.input),
            Operator::Sort(x) => Some(&mut x.input),
            Operator::Aggregate(x) => Some(&mut x.input),
            Operator::Distinct(x) => Some(&mut x.input),
            Operator::AddSchemaPrefix(x) => Some(&mut x.input),
            Operator::ValueToSelectedPath(x) => Some(&mut x.input),
            _ => None,
        }
    }

    pub fn is_unary(&self) -> bool {
        self.unary_input().is_some()
    }

    /// Rebuild this operator with every direct child replaced by `f(child)`.
    ///
    /// Like [`Operator::children`], the folded root of [`Operator::Folded`] is left
    /// untouched.
    pub fn map_children<F>(self, mut f: F) -> Result<Operator>
    where
        F: FnMut(Operator) -> Result<Operator>,
    {
        Ok(match self {
            Operator::KeyJoin(mut x) => {
                x.left = Box::new(f(*x.left)?);
                x.right = Box::new(f(*x.right)?);
                Operator::KeyJoin(x)
            }
            Operator::InnerJoin(mut x) => {
                x.left = Box::new(f(*x.left)?);
                x.right = Box::new(f(*x.right)?);
                Operator::InnerJoin(x)
            }
            Operator::Union(x) => Operator::Union(Union {
                inputs: x.inputs.into_iter().map(&mut f).collect::<Result<_>>()?,
            }),
            Operator::Folded(x) => Operator::Folded(Folded {
                inputs: x.inputs.into_iter().map(&mut f).collect::<Result<_>>()?,
                folded_root: x.folded_root,
            }),
            mut other => {
                if let Some(input) = other.unary_input_mut() {
                    let child = std::mem::replace(
                        input.as_mut(),
                        Operator::Union(Union { inputs: vec![] }),
                    );
                    **input = f(child)?;
                }
                other
            }
        })
    }
}

/// Full outer key join over `operators`, folded left to right.
pub fn join_by_key(operators: Vec<Operator>) -> Option<Operator> {
    operators.into_iter().reduce(|left, right| {
        Operator::KeyJoin(KeyJoin {
            left: Box::new(left),
            right: Box::new(right),
        })
    })
}

/// Union of `operators`; a single operator is returned unchanged.
pub fn union_all(mut operators: Vec<Operator>) -> Option<Operator> {
    match operators.len() {
        0 => None,
        1 => operators.pop(),
        _ => Some(Operator::Union(Union { inputs: operators })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{ColumnsInterval, KeyInterval};

    fn scan(id: &str) -> Operator {
        Operator::FragmentScan(FragmentScan {
            fragment: FragmentMeta::new(id, ColumnsInterval::unbounded(), KeyInterval::full(), "u"),
            patterns: vec!["*".to_string()],
            tag_filter: None,
        })
    }

    #[test]
    fn join_and_union_helpers_collapse_singletons() {
        assert!(join_by_key(vec![]).is_none());
        assert_eq!(union_all(vec![scan("a")]), Some(scan("a")));
        let joined = join_by_key(vec![scan("a"), scan("b"), scan("c")]).expect("join");
        let Operator::KeyJoin(outer) = &joined else {
            panic!("expected key join");
        };
        assert!(matches!(outer.left.as_ref(), Operator::KeyJoin(_)));
        assert_eq!(joined.children().len(), 2);
    }

    #[test]
    fn map_children_rewrites_unary_and_leaves_fold_template() {
        let tree = Operator::Limit(Limit {
            input: Box::new(Operator::Folded(Folded {
                inputs: vec![scan("a")],
                folded_root: Box::new(scan("template")),
            })),
            limit: 1,
            offset: 0,
        });
        let rewritten = tree
            .map_children(|child| {
                child.map_children(|_| Ok(scan("b")))
            })
            .expect("rewrite");
        let Operator::Limit(limit) = rewritten else {
            panic!("expected limit");
        };
        let Operator::Folded(fold) = limit.input.as_ref() else {
            panic!("expected fold");
        };
        assert_eq!(fold.inputs, vec![scan("b")]);
        assert_eq!(fold.folded_root.as_ref(), &scan("template"));
    }

    #[test]
    fn plan_file_parses_with_fragment_defaults() {
        let json = r#"{"Limit": {
            "input": {"FragmentScan": {
                "fragment": {
                    "id": "f1",
                    "columns": {"start": "a", "end": null},
                    "keys": {"start": 0, "end": 10},
                    "storage_unit": "u0"
                },
                "patterns": ["a.b"],
                "tag_filter": null
            }},
            "limit": 5,
            "offset": 0
        }}"#;
        let plan: Operator = serde_json::from_str(json).expect("parse plan");
        let Operator::Limit(limit) = &plan else {
            panic!("expected limit");
        };
        let Operator::FragmentScan(scan) = limit.input.as_ref() else {
            panic!("expected scan");
        };
        assert!(scan.fragment.valid);
        assert!(!scan.fragment.dummy);
        assert_eq!(scan.fragment.columns.schema_prefix, None);
        assert_eq!(plan.name(), "Limit");
    }
}
