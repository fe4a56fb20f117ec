use std::sync::Arc;

use crate::operator::Operator;

/// Validates an operator tree before it is turned into tasks.
pub trait ConstraintChecker: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, root: &Operator) -> bool;
}

/// Rejects trees that still carry fold placeholders or malformed operators.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletenessChecker;

impl ConstraintChecker for CompletenessChecker {
    fn name(&self) -> &str {
        "completeness"
    }

    fn check(&self, root: &Operator) -> bool {
        let ok = match root {
            Operator::ProjectWaitingForPath(_) => false,
            // the template is resolved by the fold itself; only its inputs must be complete
            Operator::Folded(f) => !f.inputs.is_empty(),
            Operator::Project(p) => !p.need_selected_path && !p.patterns.is_empty(),
            Operator::Reorder(r) => !r.need_selected_path && !r.patterns.is_empty(),
            Operator::FragmentScan(s) => !s.patterns.is_empty(),
            Operator::Union(u) => !u.inputs.is_empty(),
            Operator::Sort(s) => !s.keys.is_empty(),
            Operator::Aggregate(a) => !a.aggs.is_empty(),
            _ => true,
        };
        ok && root.children().into_iter().all(|c| self.check(c))
    }
}

/// Passes only when every inner checker passes.
#[derive(Clone, Default)]
pub struct AllOf {
    checkers: Vec<Arc<dyn ConstraintChecker>>,
}

impl std::fmt::Debug for AllOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllOf")
            .field(
                "checkers",
                &self.checkers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AllOf {
    pub fn new(checkers: Vec<Arc<dyn ConstraintChecker>>) -> Self {
        Self { checkers }
    }
}

impl ConstraintChecker for AllOf {
    fn name(&self) -> &str {
        "all_of"
    }

    fn check(&self, root: &Operator) -> bool {
        self.checkers.iter().all(|c| {
            let ok = c.check(root);
            if !ok {
                tracing::debug!(checker = c.name(), "operator tree rejected");
            }
            ok
        })
    }
}
