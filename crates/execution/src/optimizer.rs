use std::sync::Arc;

use pfq_common::Result;
use pfq_planner::Operator;

use crate::context::RequestContext;
use crate::task::Task;

/// Lowers a checked logical tree into an executable task DAG.
///
/// Used both for the initial plan and by fold tasks to turn a rebuilt tree into
/// a fresh subtree. The returned root has no follower yet.
pub trait PhysicalOptimizer: Send + Sync {
    fn name(&self) -> &str;

    fn optimize(&self, root: &Operator, ctx: &Arc<RequestContext>) -> Result<Arc<Task>>;
}
