//! Runtime replanning.
//!
//! A fold task drains its parents for the `selected_path` marker column, completes
//! its folded template with the harvested paths, and submits the rebuilt subtree.
//! Its own result forwards to the new subtree's root, which also inherits the
//! fold's follower.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::StringArray;
use pfq_common::{PfqError, Result};
use pfq_planner::{
    ColumnsInterval, Operator, SELECTED_PATH_FIELD, explain_operator, fragments_for_interval,
    merge_and_sort_paths, merge_raw_data, path_ordering,
};
use tracing::{debug, info};

use super::{Task, TaskResult};
use crate::close::CloseChain;
use crate::context::RequestContext;
use crate::stream::SendableBatchStream;

pub(super) fn execute(
    task: &Arc<Task>,
    parents: &[Arc<Task>],
    folded_root: &Operator,
) -> Result<TaskResult<SendableBatchStream>> {
    let ctx = task.context();
    let parents = parents.iter().collect::<Vec<_>>();
    let streams = task.gather_inputs(&parents)?;
    let paths = harvest_selected_paths(streams)?;
    info!(
        query_id = %ctx.query_id,
        task_id = %task.id(),
        paths = paths.len(),
        "harvested selected paths"
    );

    let rebuilt = fill_placeholders(folded_root.clone(), &paths, ctx)?;
    if !ctx.checker.check(&rebuilt) {
        return Err(PfqError::PlannerInvariant(format!(
            "replanned tree rejected by checker '{}':\n{}",
            ctx.checker.name(),
            explain_operator(&rebuilt)
        )));
    }
    debug!(query_id = %ctx.query_id, plan = %explain_operator(&rebuilt), "replanned tree");

    let new_root = ctx.optimizer.optimize(&rebuilt, ctx)?;
    if let Some(follower) = task.take_follower_link() {
        new_root.set_follower(follower);
    }
    task.set_replanned(Arc::clone(&new_root));
    ctx.metrics.inc_fold_replans(&ctx.query_id.to_string());
    ctx.scheduler.submit(&new_root);
    info!(
        query_id = %ctx.query_id,
        task_id = %task.id(),
        new_root = %new_root.id(),
        "submitted replanned subtree"
    );
    Ok(TaskResult::deferred(move || new_root.wait_result()))
}

/// Drain every stream for distinct marker values in first-seen order.
///
/// All streams are closed whether or not draining succeeds; on failure nothing
/// harvested so far is returned.
pub fn harvest_selected_paths(mut streams: Vec<SendableBatchStream>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    let drained = (|| -> Result<()> {
        for stream in streams.iter_mut() {
            let idx = stream.schema()?.index_of(SELECTED_PATH_FIELD).map_err(|_| {
                PfqError::InvalidArgument(format!(
                    "fold input has no '{SELECTED_PATH_FIELD}' column"
                ))
            })?;
            while stream.has_next()? {
                let batch = stream.next_batch()?;
                let values = batch
                    .record_batch()
                    .column(idx)
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| {
                        PfqError::InvalidArgument(format!(
                            "'{SELECTED_PATH_FIELD}' must be a utf8 column"
                        ))
                    })?;
                for path in values.iter().flatten() {
                    if seen.insert(path.to_string()) {
                        paths.push(path.to_string());
                    }
                }
            }
        }
        Ok(())
    })();

    let mut chain = match drained {
        Ok(()) => CloseChain::new(),
        Err(e) => CloseChain::after(e),
    };
    for stream in streams.iter_mut() {
        chain.close(stream);
    }
    chain.finish()?;
    Ok(paths)
}

/// Complete the placeholders of a folded template with harvested `paths`.
///
/// Projections and reorders flagged `need_selected_path` get the paths appended
/// in harvest order. A `ProjectWaitingForPath` becomes a scan subtree over every
/// fragment covering the merged and sorted paths. A nested fold keeps its own
/// template.
pub fn fill_placeholders(
    root: Operator,
    paths: &[String],
    ctx: &RequestContext,
) -> Result<Operator> {
    match root {
        Operator::ProjectWaitingForPath(waiting) => {
            let ordering = path_ordering(ctx.config.path_ordering);
            let sorted = merge_and_sort_paths(paths, ordering.as_ref());
            let Some(columns) = ColumnsInterval::spanning(&sorted) else {
                return Err(PfqError::InvalidArgument(
                    "fold harvested no paths to resolve a waiting projection".to_string(),
                ));
            };
            let lookup = fragments_for_interval(
                ctx.metadata.as_ref(),
                &columns,
                &waiting.keys,
                ctx.config.create_initial_fragments,
            )?;
            merge_raw_data(&lookup, &sorted, waiting.tag_filter.as_ref())
        }
        Operator::Project(mut project) => {
            project.input = Box::new(fill_placeholders(*project.input, paths, ctx)?);
            if project.need_selected_path {
                project.patterns.extend(paths.iter().cloned());
                project.need_selected_path = false;
            }
            Ok(Operator::Project(project))
        }
        Operator::Reorder(mut reorder) => {
            reorder.input = Box::new(fill_placeholders(*reorder.input, paths, ctx)?);
            if reorder.need_selected_path {
                reorder.patterns.extend(paths.iter().cloned());
                reorder.need_selected_path = false;
            }
            Ok(Operator::Reorder(reorder))
        }
        other => other.map_children(|child| fill_placeholders(child, paths, ctx)),
    }
}
