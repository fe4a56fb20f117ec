mod support;

use std::sync::{Arc, Mutex};

use pfq_common::{MemoryPool, PfqError, Result};
use pfq_execution::executors::LimitFactory;
use pfq_execution::task::{fill_placeholders, harvest_selected_paths};
use pfq_execution::{
    MemoryStream, PhysicalOptimizer, RequestContext, SendableBatchStream, Task, collect_batches,
};
use pfq_planner::{
    ColumnsInterval, FragmentMeta, FragmentScan, KeyInterval, Operator, Project,
    ProjectWaitingForPath, Reorder,
};
use support::*;

fn path_stream(paths: &[&str]) -> SendableBatchStream {
    Box::new(MemoryStream::new(
        path_schema(),
        vec![path_batch(paths)],
        MemoryPool::unbounded(),
    ))
}

fn scan(columns: &str) -> Operator {
    Operator::FragmentScan(FragmentScan {
        fragment: FragmentMeta::new(
            "f1",
            ColumnsInterval::new(Some("a".to_string()), None),
            KeyInterval::full(),
            "unit-0",
        ),
        patterns: vec![columns.to_string()],
        tag_filter: None,
    })
}

fn waiting_project() -> Operator {
    Operator::Project(Project {
        input: Box::new(scan("a.*")),
        patterns: vec!["key".to_string()],
        need_selected_path: true,
    })
}

/// Lowers whatever it is given into a single source task and remembers the tree.
struct CapturingOptimizer {
    seen: Mutex<Vec<Operator>>,
}

impl CapturingOptimizer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(vec![]),
        })
    }

    fn seen(&self) -> Vec<Operator> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl PhysicalOptimizer for CapturingOptimizer {
    fn name(&self) -> &str {
        "capturing"
    }

    fn optimize(&self, root: &Operator, ctx: &Arc<RequestContext>) -> Result<Arc<Task>> {
        self.seen.lock().expect("seen lock").push(root.clone());
        let schema = keyed_schema("a.b");
        let rows = keyed_batch(&schema, vec![1, 2, 3], vec![10, 20, 30]);
        Task::source(
            ctx,
            vec![root.clone()],
            OnceSource::new(CountingStream::new(schema, vec![rows], StreamProbe::new())),
        )
    }
}

fn path_source(ctx: &Arc<RequestContext>, paths: Vec<&str>) -> Arc<Task> {
    let batches = vec![path_batch(&paths)];
    Task::source(
        ctx,
        vec![],
        OnceSource::new(CountingStream::new(path_schema(), batches, StreamProbe::new())),
    )
    .expect("path source")
}

fn counted_paths(batches: &[&[&str]], probe: &Arc<StreamProbe>) -> CountingStream {
    CountingStream::new(
        path_schema(),
        batches.iter().map(|paths| path_batch(paths)).collect(),
        probe.clone(),
    )
}

#[test]
fn harvest_keeps_first_seen_order_and_drops_duplicates() {
    let first = StreamProbe::new();
    let second = StreamProbe::new();
    let paths = harvest_selected_paths(vec![
        Box::new(counted_paths(&[&["a.b"]], &first)),
        Box::new(counted_paths(&[&["a.c"], &["a.b"]], &second)),
    ])
    .expect("harvest");

    assert_eq!(paths, vec!["a.b".to_string(), "a.c".to_string()]);
    assert_eq!(second.pulled(), 2);
    assert_eq!(first.closes(), 1);
    assert_eq!(second.closes(), 1);
}

#[test]
fn harvest_failing_mid_stream_closes_every_stream() {
    let first = StreamProbe::new();
    let second = StreamProbe::new();
    let third = StreamProbe::new();
    let result = harvest_selected_paths(vec![
        Box::new(counted_paths(&[&["a.b"]], &first)),
        Box::new(counted_paths(&[&["a.c"], &["a.d"]], &second).failing_at(1)),
        Box::new(counted_paths(&[&["a.e"]], &third)),
    ]);

    let err = result.expect_err("drain failure propagates");
    assert!(matches!(err.primary(), PfqError::Storage(_)), "{err}");
    assert_eq!(second.pulled(), 2);
    assert_eq!(third.pulled(), 0);
    for probe in [&first, &second, &third] {
        assert_eq!(probe.closes(), 1);
    }
}

#[test]
fn harvest_rejects_streams_without_the_marker_column() {
    let probe = StreamProbe::new();
    let other = CountingStream::new(int_schema("v"), vec![], probe.clone());
    let err = harvest_selected_paths(vec![path_stream(&["a.b"]), Box::new(other)])
        .expect_err("missing marker");
    assert!(matches!(err, PfqError::InvalidArgument(_)));
    assert_eq!(probe.closes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn placeholders_receive_paths_in_harvest_order() {
    let ctx = ContextBuilder::new().build();
    let template = Operator::Reorder(Reorder {
        input: Box::new(waiting_project()),
        patterns: vec!["key".to_string()],
        need_selected_path: true,
    });
    let paths = vec!["a.c".to_string(), "a.b".to_string()];
    let filled = fill_placeholders(template, &paths, &ctx).expect("fill");

    let Operator::Reorder(reorder) = filled else {
        panic!("root must stay a reorder");
    };
    assert!(!reorder.need_selected_path);
    assert_eq!(reorder.patterns, vec!["key", "a.c", "a.b"]);
    let Operator::Project(project) = *reorder.input else {
        panic!("input must stay a projection");
    };
    assert!(!project.need_selected_path);
    assert_eq!(project.patterns, vec!["key", "a.c", "a.b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiting_projection_without_paths_is_rejected() {
    let ctx = ContextBuilder::new().build();
    let template = Operator::ProjectWaitingForPath(ProjectWaitingForPath {
        keys: KeyInterval::full(),
        tag_filter: None,
    });
    let err = fill_placeholders(template, &[], &ctx).expect_err("no paths");
    assert!(matches!(err, PfqError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_rebuild_is_a_fatal_planner_error() {
    let optimizer = CapturingOptimizer::new();
    let ctx = ContextBuilder::new()
        .optimizer(optimizer.clone())
        .checker(Arc::new(RejectAll))
        .build();
    let parent = path_source(&ctx, vec!["a.b"]);
    let fold = Task::fold(&ctx, vec![], vec![parent], waiting_project()).expect("fold task");

    let err = ctx
        .scheduler
        .submit(&fold)
        .wait()
        .await
        .err()
        .expect("checker rejects");
    assert!(matches!(err, PfqError::PlannerInvariant(_)), "{err}");
    assert!(err.is_fatal());
    assert!(optimizer.seen().is_empty());
    assert!(fold.replanned().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn fold_replans_and_hands_its_follower_to_the_new_root() {
    let optimizer = CapturingOptimizer::new();
    let ctx = ContextBuilder::new().optimizer(optimizer.clone()).build();
    let left = path_source(&ctx, vec!["a.b"]);
    let right = path_source(&ctx, vec!["a.c", "a.b"]);
    let fold = Task::fold(&ctx, vec![], vec![left, right], waiting_project()).expect("fold task");
    let limit = Task::pipeline(&ctx, vec![], fold.clone(), vec![Arc::new(LimitFactory::new(2, 0))])
        .expect("limit task");

    let stream = ctx.scheduler.submit(&limit).wait().await.expect("result");
    let out = collect_batches(stream).expect("collect");
    assert_eq!(column_i64(&out, "key"), vec![1, 2]);

    let seen = optimizer.seen();
    assert_eq!(seen.len(), 1);
    let Operator::Project(project) = &seen[0] else {
        panic!("rebuilt root must be the projection");
    };
    assert_eq!(project.patterns, vec!["key", "a.b", "a.c"]);

    let new_root = fold.replanned().expect("fold replanned");
    assert_eq!(new_root.kind(), "Source");
    assert_eq!(new_root.operators().len(), 1);
    assert!(fold.follower().is_none(), "link moved to the new root");

    let explain = pfq_execution::explain_tasks(&limit);
    assert!(explain.contains("Fold#"), "{explain}");
    assert!(explain.contains(" replanned"), "{explain}");
}

#[tokio::test(flavor = "multi_thread")]
async fn fold_parent_failure_fails_the_follower() {
    let ctx = ContextBuilder::new().optimizer(CapturingOptimizer::new()).build();
    let good_probe = StreamProbe::new();
    let good = Task::source(
        &ctx,
        vec![],
        OnceSource::new(counted_paths(&[&["a.b"]], &good_probe)),
    )
    .expect("good source");
    let bad = Task::source(
        &ctx,
        vec![],
        OnceSource::failing(PfqError::Metadata("directory unavailable".to_string())),
    )
    .expect("bad source");
    let fold = Task::fold(&ctx, vec![], vec![good, bad], waiting_project()).expect("fold task");
    let limit = Task::pipeline(&ctx, vec![], fold, vec![Arc::new(LimitFactory::new(2, 0))])
        .expect("limit task");

    let err = ctx
        .scheduler
        .submit(&limit)
        .wait()
        .await
        .err()
        .expect("parent failure propagates");
    assert!(matches!(err.primary(), PfqError::Metadata(_)), "{err}");
    assert_eq!(good_probe.closes(), 1);
    assert_eq!(good_probe.pulled(), 0);
}
