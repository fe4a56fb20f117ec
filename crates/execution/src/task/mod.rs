//! Executable DAG nodes.
//!
//! A [`Task`] owns strong links to its parents and a weak link to its single
//! follower (the task consuming its output). Parent links never change after
//! construction; a fold attaches its rebuilt subtree separately and moves its
//! follower onto the new root.

mod fold;
mod metrics;
mod readiness;
mod result;
mod visitor;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use pfq_common::{PfqError, Result, TaskId};
use pfq_planner::Operator;
use tracing::{info, warn};

use crate::close::CloseChain;
use crate::context::RequestContext;
use crate::executor::{
    BinaryExecutorFactory, SourceFactory, StatelessExecutorFactory, UnaryExecutorFactory,
};
use crate::pipeline::PipelineStream;
use crate::sink::{BinarySinkStream, UnarySinkStream};
use crate::stream::{BatchStream, ConcatStream, SendableBatchStream};

pub use fold::{fill_placeholders, harvest_selected_paths};
pub use metrics::TaskMetrics;
pub use readiness::ReadinessCounter;
pub use result::TaskResult;
pub use visitor::{ExplainVisitor, TaskVisitor, explain_tasks};

use metrics::MeteredStream;
use result::ResultSlot;

/// Node shape of a task: how many parents it has and what it runs over them.
pub enum TaskNode {
    /// No parents; opens a stream from storage or memory.
    Source { source: Arc<dyn SourceFactory> },
    /// Chain of stateless executors over one parent.
    Pipeline {
        parent: Arc<Task>,
        executors: Vec<Arc<dyn StatelessExecutorFactory>>,
    },
    UnarySink {
        parent: Arc<Task>,
        executor: Arc<dyn UnaryExecutorFactory>,
    },
    BinarySink {
        left: Arc<Task>,
        right: Arc<Task>,
        executor: Arc<dyn BinaryExecutorFactory>,
    },
    /// Parents' outputs concatenated in parent order.
    Multi { parents: Vec<Arc<Task>> },
    /// Harvests selected paths from its parents, then rebuilds and submits
    /// `folded_root` and forwards to the new subtree.
    Fold {
        parents: Vec<Arc<Task>>,
        folded_root: Operator,
    },
}

impl TaskNode {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskNode::Source { .. } => "Source",
            TaskNode::Pipeline { .. } => "Pipeline",
            TaskNode::UnarySink { .. } => "UnarySink",
            TaskNode::BinarySink { .. } => "BinarySink",
            TaskNode::Multi { .. } => "Multi",
            TaskNode::Fold { .. } => "Fold",
        }
    }

    pub fn parents(&self) -> Vec<&Arc<Task>> {
        match self {
            TaskNode::Source { .. } => vec![],
            TaskNode::Pipeline { parent, .. } | TaskNode::UnarySink { parent, .. } => {
                vec![parent]
            }
            TaskNode::BinarySink { left, right, .. } => vec![left, right],
            TaskNode::Multi { parents } | TaskNode::Fold { parents, .. } => {
                parents.iter().collect()
            }
        }
    }

    /// Executor names this node runs, in data-flow order.
    pub fn executor_names(&self) -> Vec<String> {
        match self {
            TaskNode::Source { source } => vec![source.name().to_string()],
            TaskNode::Pipeline { executors, .. } => {
                executors.iter().map(|e| e.name().to_string()).collect()
            }
            TaskNode::UnarySink { executor, .. } => vec![executor.name().to_string()],
            TaskNode::BinarySink { executor, .. } => vec![executor.name().to_string()],
            TaskNode::Multi { .. } => vec!["UnionAll".to_string()],
            TaskNode::Fold { .. } => vec!["Fold".to_string()],
        }
    }
}

pub struct Task {
    id: TaskId,
    operators: Vec<Operator>,
    context: Arc<RequestContext>,
    node: TaskNode,
    readiness: ReadinessCounter,
    result: ResultSlot<SendableBatchStream>,
    follower: Mutex<Option<Weak<Task>>>,
    replanned: Mutex<Option<Arc<Task>>>,
    started: AtomicBool,
    metrics: Arc<TaskMetrics>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.node.kind())
            .field("executors", &self.node.executor_names())
            .field("remaining_parents", &self.readiness.remaining())
            .finish()
    }
}

impl Task {
    /// Build a task and register it as the follower of each of its parents.
    ///
    /// `operators` are the logical operators this task implements, root first.
    pub fn new(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        node: TaskNode,
    ) -> Result<Arc<Task>> {
        let parents = node.parents();
        if matches!(node, TaskNode::Multi { .. } | TaskNode::Fold { .. }) && parents.is_empty() {
            return Err(PfqError::Planning(format!(
                "{} task needs at least one parent",
                node.kind()
            )));
        }
        for (i, parent) in parents.iter().enumerate() {
            if parent.has_follower() || parents[..i].iter().any(|p| Arc::ptr_eq(p, parent)) {
                return Err(PfqError::Planning(format!(
                    "task {} already feeds another task",
                    parent.id
                )));
            }
        }
        let parent_count = parents.len();
        let id = context.next_task_id();
        Ok(Arc::new_cyclic(|me| {
            for parent in node.parents() {
                parent.set_follower(me.clone());
            }
            Task {
                id,
                operators,
                context: Arc::clone(context),
                node,
                readiness: ReadinessCounter::new(parent_count),
                result: ResultSlot::new(),
                follower: Mutex::new(None),
                replanned: Mutex::new(None),
                started: AtomicBool::new(false),
                metrics: Arc::new(TaskMetrics::default()),
            }
        }))
    }

    pub fn source(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        source: Arc<dyn SourceFactory>,
    ) -> Result<Arc<Task>> {
        Self::new(context, operators, TaskNode::Source { source })
    }

    pub fn pipeline(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        parent: Arc<Task>,
        executors: Vec<Arc<dyn StatelessExecutorFactory>>,
    ) -> Result<Arc<Task>> {
        Self::new(context, operators, TaskNode::Pipeline { parent, executors })
    }

    pub fn unary_sink(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        parent: Arc<Task>,
        executor: Arc<dyn UnaryExecutorFactory>,
    ) -> Result<Arc<Task>> {
        Self::new(context, operators, TaskNode::UnarySink { parent, executor })
    }

    pub fn binary_sink(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        left: Arc<Task>,
        right: Arc<Task>,
        executor: Arc<dyn BinaryExecutorFactory>,
    ) -> Result<Arc<Task>> {
        Self::new(
            context,
            operators,
            TaskNode::BinarySink {
                left,
                right,
                executor,
            },
        )
    }

    pub fn multi(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        parents: Vec<Arc<Task>>,
    ) -> Result<Arc<Task>> {
        Self::new(context, operators, TaskNode::Multi { parents })
    }

    pub fn fold(
        context: &Arc<RequestContext>,
        operators: Vec<Operator>,
        parents: Vec<Arc<Task>>,
        folded_root: Operator,
    ) -> Result<Arc<Task>> {
        Self::new(
            context,
            operators,
            TaskNode::Fold {
                parents,
                folded_root,
            },
        )
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn node(&self) -> &TaskNode {
        &self.node
    }

    pub fn kind(&self) -> &'static str {
        self.node.kind()
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.context
    }

    pub fn parents(&self) -> Vec<&Arc<Task>> {
        self.node.parents()
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }

    /// Subtree a fold submitted in its place, once it ran.
    pub fn replanned(&self) -> Option<Arc<Task>> {
        self.replanned
            .lock()
            .expect("task replanned lock poisoned")
            .clone()
    }

    pub fn follower(&self) -> Option<Arc<Task>> {
        self.follower
            .lock()
            .expect("task follower lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn has_follower(&self) -> bool {
        self.follower
            .lock()
            .expect("task follower lock poisoned")
            .is_some()
    }

    pub(crate) fn set_follower(&self, follower: Weak<Task>) {
        *self.follower.lock().expect("task follower lock poisoned") = Some(follower);
    }

    /// Detach the follower link; after this the task notifies nobody.
    pub(crate) fn take_follower_link(&self) -> Option<Weak<Task>> {
        self.follower
            .lock()
            .expect("task follower lock poisoned")
            .take()
    }

    pub(crate) fn set_replanned(&self, root: Arc<Task>) {
        *self.replanned.lock().expect("task replanned lock poisoned") = Some(root);
    }

    /// One parent completed. `true` means every parent has, and the task may run.
    pub fn notify_parent_ready(&self) -> bool {
        self.readiness.notify_parent_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_complete()
    }

    /// Block until this task's result exists and take it.
    pub fn wait_result(&self) -> TaskResult<SendableBatchStream> {
        self.result.wait(self.id)
    }

    /// Pre-order walk with enter/leave brackets over parents and replanned subtrees.
    pub fn accept(&self, visitor: &mut dyn TaskVisitor) {
        visitor.enter(self);
        visitor.visit(self);
        for parent in self.parents() {
            parent.accept(visitor);
        }
        if let Some(replanned) = self.replanned() {
            replanned.accept(visitor);
        }
        visitor.leave(self);
    }

    /// Run the task once. Never fails: any error is turned into a failed result.
    pub(crate) fn execute(self: &Arc<Self>) -> TaskResult<SendableBatchStream> {
        let query_id = self.context.query_id;
        if self.started.swap(true, Ordering::AcqRel) {
            return TaskResult::failure(PfqError::Execution(format!(
                "task {} was already executed",
                self.id
            )));
        }
        info!(query_id = %query_id, task_id = %self.id, task = self.kind(), "task started");
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| match &self.node {
            TaskNode::Fold {
                parents,
                folded_root,
            } => fold::execute(self, parents, folded_root),
            _ => self
                .compute()
                .map(|stream| TaskResult::value(self.wrap_output(stream))),
        }))
        .unwrap_or_else(|_| {
            Err(PfqError::Execution(format!("task {} panicked", self.id)))
        });

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let label = match &outcome {
            Ok(r) if r.is_deferred() => "deferred",
            Ok(_) => "ok",
            Err(_) => "failed",
        };
        self.context
            .metrics
            .inc_tasks_finished(&query_id.to_string(), label);
        match outcome {
            Ok(result) => {
                info!(
                    query_id = %query_id,
                    task_id = %self.id,
                    task = self.kind(),
                    outcome = label,
                    elapsed_ms,
                    "task finished"
                );
                result
            }
            Err(e) => {
                warn!(
                    query_id = %query_id,
                    task_id = %self.id,
                    task = self.kind(),
                    fatal = e.is_fatal(),
                    error = %e,
                    "task failed"
                );
                TaskResult::failure(e)
            }
        }
    }

    /// Store the result of [`Task::execute`] for the follower.
    pub(crate) fn complete(&self, result: TaskResult<SendableBatchStream>) {
        if let Err(extra) = self.result.complete(result) {
            warn!(task_id = %self.id, "task completed twice; releasing the extra result");
            if let Err(e) = extra.close() {
                warn!(task_id = %self.id, error = %e, "closing extra result failed");
            }
        }
    }

    fn compute(&self) -> Result<SendableBatchStream> {
        let exec_ctx = self.context.executor_context(self.id);
        match &self.node {
            TaskNode::Source { source } => source.open(&exec_ctx),
            TaskNode::Pipeline { parent, executors } => {
                let input = self.single_input(parent)?;
                Ok(Box::new(PipelineStream::try_new(&exec_ctx, input, executors)?))
            }
            TaskNode::UnarySink { parent, executor } => {
                let input = self.single_input(parent)?;
                let stream = UnarySinkStream::try_new(&exec_ctx, input, executor.as_ref())?;
                Ok(Box::new(prefetch(stream, UnarySinkStream::fetch_and_consume)?))
            }
            TaskNode::BinarySink {
                left,
                right,
                executor,
            } => {
                let mut inputs = self.gather_inputs(&[left, right])?;
                let right_input = inputs.pop();
                let left_input = inputs.pop();
                let (Some(l), Some(r)) = (left_input, right_input) else {
                    return Err(PfqError::Execution("binary task lost an input".to_string()));
                };
                let stream = BinarySinkStream::try_new(&exec_ctx, l, r, executor.as_ref())?;
                Ok(Box::new(prefetch(stream, BinarySinkStream::fetch_and_consume)?))
            }
            TaskNode::Multi { parents } => {
                let parents = parents.iter().collect::<Vec<_>>();
                let inputs = self.gather_inputs(&parents)?;
                Ok(Box::new(ConcatStream::try_new(inputs)?))
            }
            TaskNode::Fold { .. } => Err(PfqError::Execution(
                "fold tasks do not produce a stream of their own".to_string(),
            )),
        }
    }

    fn single_input(&self, parent: &Arc<Task>) -> Result<SendableBatchStream> {
        self.gather_inputs(&[parent])?
            .pop()
            .ok_or_else(|| PfqError::Execution("parent produced no stream".to_string()))
    }

    /// Retrieve every parent's result; on any failure close the successful ones.
    pub(crate) fn gather_inputs(&self, parents: &[&Arc<Task>]) -> Result<Vec<SendableBatchStream>> {
        let results = parents
            .iter()
            .map(|p| p.wait_result().into_result())
            .collect::<Vec<_>>();

        let mut streams = Vec::with_capacity(results.len());
        let mut failure: Option<PfqError> = None;
        for result in results {
            match result {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    failure = Some(match failure {
                        Some(first) => first.with_suppressed(e),
                        None => e,
                    });
                }
            }
        }
        if let Some(e) = failure {
            let mut chain = CloseChain::after(e);
            chain.close_all_rev(&mut streams);
            return Err(chain.into_error());
        }
        Ok(streams
            .into_iter()
            .map(|s| {
                Box::new(MeteredStream::input(s, Arc::clone(&self.metrics))) as SendableBatchStream
            })
            .collect())
    }

    fn wrap_output(&self, stream: SendableBatchStream) -> SendableBatchStream {
        let registry = self.context.metrics.clone();
        let query_id = self.context.query_id;
        let task_id = self.id;
        let operator = self.node.executor_names().join("+");
        Box::new(MeteredStream::output(
            stream,
            Arc::clone(&self.metrics),
            Box::new(move |m: &TaskMetrics| m.flush(&registry, query_id, task_id, &operator)),
        ))
    }
}

/// Run `fill` eagerly; on failure close the stream and report the fill error first.
fn prefetch<S: BatchStream>(mut stream: S, fill: fn(&mut S) -> Result<()>) -> Result<S> {
    match fill(&mut stream) {
        Ok(()) => Ok(stream),
        Err(e) => {
            let mut chain = CloseChain::after(e);
            chain.close(&mut stream);
            Err(chain.into_error())
        }
    }
}

