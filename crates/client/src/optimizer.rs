//! Lowering of operator trees into task DAGs.

use std::sync::Arc;

use pfq_common::{PfqError, Result};
use pfq_execution::executors::{
    AddSchemaPrefixFactory, AggregateFactory, DistinctFactory, FilterFactory, HashJoinFactory,
    KeyJoinFactory, LimitFactory, ProjectFactory, SortFactory, UnionAllFactory,
    ValueToSelectedPathFactory,
};
use pfq_execution::{PhysicalOptimizer, RequestContext, StatelessExecutorFactory, Task};
use pfq_planner::Operator;
use pfq_storage::{FragmentScanSource, ProviderRegistry};

/// One task per operator boundary, without cost decisions.
///
/// Contracts:
/// - a fragment scan becomes a source task served by its storage unit's provider;
/// - maximal chains of row-local operators share one pipeline task;
/// - sort, aggregate and distinct become unary sink tasks;
/// - joins and two-input unions become binary sink tasks, wider unions multi tasks;
/// - a `Folded` subtree becomes a fold task over its lowered inputs;
/// - an unresolved `ProjectWaitingForPath` is a planning error.
#[derive(Debug, Clone)]
pub struct NaivePhysicalOptimizer {
    providers: ProviderRegistry,
}

impl NaivePhysicalOptimizer {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    fn lower(&self, op: &Operator, ctx: &Arc<RequestContext>) -> Result<Arc<Task>> {
        if is_row_local(op) {
            return self.lower_pipeline(op, ctx);
        }
        let operators = vec![op.clone()];
        match op {
            Operator::FragmentScan(scan) => {
                let provider = self.providers.get(&scan.fragment.storage_unit)?;
                Task::source(
                    ctx,
                    operators,
                    Arc::new(FragmentScanSource::new(provider, scan.clone())),
                )
            }
            Operator::Sort(sort) => {
                let parent = self.lower(&sort.input, ctx)?;
                Task::unary_sink(ctx, operators, parent, Arc::new(SortFactory::new(sort.keys.clone())))
            }
            Operator::Aggregate(agg) => {
                let parent = self.lower(&agg.input, ctx)?;
                Task::unary_sink(
                    ctx,
                    operators,
                    parent,
                    Arc::new(AggregateFactory::new(agg.aggs.clone())),
                )
            }
            Operator::Distinct(distinct) => {
                let parent = self.lower(&distinct.input, ctx)?;
                Task::unary_sink(ctx, operators, parent, Arc::new(DistinctFactory))
            }
            Operator::KeyJoin(join) => {
                let left = self.lower(&join.left, ctx)?;
                let right = self.lower(&join.right, ctx)?;
                Task::binary_sink(ctx, operators, left, right, Arc::new(KeyJoinFactory))
            }
            Operator::InnerJoin(join) => {
                let left = self.lower(&join.left, ctx)?;
                let right = self.lower(&join.right, ctx)?;
                Task::binary_sink(
                    ctx,
                    operators,
                    left,
                    right,
                    Arc::new(HashJoinFactory::new(&join.left_on, &join.right_on)),
                )
            }
            Operator::Union(union) => match union.inputs.as_slice() {
                [] => Err(PfqError::Planning("union without inputs".to_string())),
                [only] => self.lower(only, ctx),
                [left, right] => {
                    let left = self.lower(left, ctx)?;
                    let right = self.lower(right, ctx)?;
                    Task::binary_sink(ctx, operators, left, right, Arc::new(UnionAllFactory))
                }
                inputs => {
                    let parents = inputs
                        .iter()
                        .map(|input| self.lower(input, ctx))
                        .collect::<Result<Vec<_>>>()?;
                    Task::multi(ctx, operators, parents)
                }
            },
            Operator::Folded(folded) => {
                let parents = folded
                    .inputs
                    .iter()
                    .map(|input| self.lower(input, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Task::fold(ctx, operators, parents, (*folded.folded_root).clone())
            }
            Operator::ProjectWaitingForPath(_) => Err(PfqError::Planning(
                "cannot lower a projection still waiting for its paths".to_string(),
            )),
            other => Err(PfqError::Planning(format!(
                "no physical lowering for {}",
                other.name()
            ))),
        }
    }

    /// Collect the chain of row-local operators starting at `top` into one task.
    fn lower_pipeline(&self, top: &Operator, ctx: &Arc<RequestContext>) -> Result<Arc<Task>> {
        let mut operators = Vec::new();
        let mut factories = Vec::new();
        let mut current = top;
        while let Some(factory) = stateless_factory(current) {
            if has_pending_paths(current) {
                return Err(PfqError::Planning(format!(
                    "{} still waits for selected paths",
                    current.name()
                )));
            }
            operators.push(current.clone());
            factories.push(factory);
            current = current.unary_input().ok_or_else(|| {
                PfqError::Planning(format!("{} has no input", current.name()))
            })?;
        }
        // executors run bottom-up
        factories.reverse();
        let parent = self.lower(current, ctx)?;
        Task::pipeline(ctx, operators, parent, factories)
    }
}

impl PhysicalOptimizer for NaivePhysicalOptimizer {
    fn name(&self) -> &str {
        "naive"
    }

    fn optimize(&self, root: &Operator, ctx: &Arc<RequestContext>) -> Result<Arc<Task>> {
        self.lower(root, ctx)
    }
}

fn is_row_local(op: &Operator) -> bool {
    matches!(
        op,
        Operator::Project(_)
            | Operator::Reorder(_)
            | Operator::Select(_)
            | Operator::Limit(_)
            | Operator::AddSchemaPrefix(_)
            | Operator::ValueToSelectedPath(_)
    )
}

fn has_pending_paths(op: &Operator) -> bool {
    match op {
        Operator::Project(p) => p.need_selected_path,
        Operator::Reorder(r) => r.need_selected_path,
        _ => false,
    }
}

fn stateless_factory(op: &Operator) -> Option<Arc<dyn StatelessExecutorFactory>> {
    let factory: Arc<dyn StatelessExecutorFactory> = match op {
        Operator::Project(p) => Arc::new(ProjectFactory::project(p.patterns.clone())),
        Operator::Reorder(r) => Arc::new(ProjectFactory::reorder(r.patterns.clone())),
        Operator::Select(s) => Arc::new(FilterFactory::new(s.predicate.clone())),
        Operator::Limit(l) => Arc::new(LimitFactory::new(l.limit, l.offset)),
        Operator::AddSchemaPrefix(a) => Arc::new(AddSchemaPrefixFactory::new(a.prefix.clone())),
        Operator::ValueToSelectedPath(v) => Arc::new(ValueToSelectedPathFactory::new(
            v.column.clone(),
            v.prefix.clone(),
        )),
        _ => return None,
    };
    Some(factory)
}

#[cfg(test)]
mod tests {
    use pfq_common::{EngineConfig, MemoryPool, MetricsRegistry, QueryId};
    use pfq_execution::{RequestParts, Scheduler, UdfRegistry, explain_tasks};
    use pfq_planner::{
        ColumnsInterval, CompletenessChecker, FragmentMeta, FragmentScan, KeyInterval, KeyJoin,
        Limit, Project, ProjectWaitingForPath, Select, Sort, SortKey, Union, col, lit_i64,
    };
    use pfq_storage::{InMemoryMetadata, InMemoryProvider};

    use super::*;

    fn scan(id: &str) -> Operator {
        Operator::FragmentScan(FragmentScan {
            fragment: FragmentMeta::new(id, ColumnsInterval::unbounded(), KeyInterval::full(), "u0"),
            patterns: vec!["*".to_string()],
            tag_filter: None,
        })
    }

    fn context(optimizer: Arc<NaivePhysicalOptimizer>) -> Arc<RequestContext> {
        let config = EngineConfig::default();
        let metrics = MetricsRegistry::new();
        RequestContext::new(RequestParts {
            query_id: QueryId(7),
            scheduler: Scheduler::new(
                tokio::runtime::Handle::current(),
                config.max_concurrent_tasks,
                metrics.clone(),
            ),
            config,
            pool: MemoryPool::unbounded(),
            metrics,
            udfs: Arc::new(UdfRegistry::new()),
            optimizer,
            metadata: Arc::new(InMemoryMetadata::new()),
            checker: Arc::new(CompletenessChecker),
        })
    }

    fn optimizer() -> Arc<NaivePhysicalOptimizer> {
        let mut providers = ProviderRegistry::new();
        providers.register("u0", InMemoryProvider::new());
        Arc::new(NaivePhysicalOptimizer::new(providers))
    }

    #[tokio::test]
    async fn stateless_chain_shares_one_pipeline() {
        let optimizer = optimizer();
        let ctx = context(optimizer.clone());
        let plan = Operator::Limit(Limit {
            input: Box::new(Operator::Select(Select {
                input: Box::new(Operator::Project(Project {
                    input: Box::new(scan("f1")),
                    patterns: vec!["a.*".to_string()],
                    need_selected_path: false,
                })),
                predicate: pfq_planner::binary(col("a.b"), pfq_planner::BinaryOp::Gt, lit_i64(0)),
            })),
            limit: 5,
            offset: 0,
        });
        let root = optimizer.optimize(&plan, &ctx).expect("lower");
        assert_eq!(root.kind(), "Pipeline");
        assert_eq!(
            root.node().executor_names(),
            vec!["Project", "Filter", "Limit"]
        );
        assert_eq!(root.operators().len(), 3);
        assert_eq!(root.parents()[0].kind(), "Source");
    }

    #[tokio::test]
    async fn sinks_joins_and_unions_get_their_own_tasks() {
        let optimizer = optimizer();
        let ctx = context(optimizer.clone());
        let plan = Operator::Sort(Sort {
            input: Box::new(Operator::Union(Union {
                inputs: vec![
                    Operator::KeyJoin(KeyJoin {
                        left: Box::new(scan("f1")),
                        right: Box::new(scan("f2")),
                    }),
                    scan("f3"),
                    scan("f4"),
                ],
            })),
            keys: vec![SortKey {
                column: "key".to_string(),
                descending: false,
            }],
        });
        let root = optimizer.optimize(&plan, &ctx).expect("lower");
        let explain = explain_tasks(&root);
        let kinds = explain
            .lines()
            .map(|l| l.trim_start().split('#').next().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec!["UnarySink", "Multi", "BinarySink", "Source", "Source", "Source", "Source"]
        );
    }

    #[tokio::test]
    async fn unresolved_placeholders_do_not_lower() {
        let optimizer = optimizer();
        let ctx = context(optimizer.clone());
        let waiting = Operator::ProjectWaitingForPath(ProjectWaitingForPath {
            keys: KeyInterval::full(),
            tag_filter: None,
        });
        assert!(matches!(
            optimizer.optimize(&waiting, &ctx),
            Err(PfqError::Planning(_))
        ));
        let flagged = Operator::Project(Project {
            input: Box::new(scan("f1")),
            patterns: vec!["key".to_string()],
            need_selected_path: true,
        });
        assert!(matches!(
            optimizer.optimize(&flagged, &ctx),
            Err(PfqError::Planning(_))
        ));
    }

    #[tokio::test]
    async fn unknown_storage_unit_is_a_storage_error() {
        let optimizer = Arc::new(NaivePhysicalOptimizer::new(ProviderRegistry::new()));
        let ctx = context(optimizer.clone());
        assert!(matches!(
            optimizer.optimize(&scan("f1"), &ctx),
            Err(PfqError::Storage(_))
        ));
    }
}
