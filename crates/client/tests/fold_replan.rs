mod support;

use std::sync::Arc;

use pfq_client::{BinaryOp, DataFrame, Engine, SortKey, binary, col, lit_str};
use pfq_common::{EngineConfig, PathOrderingKind, PfqError};
use pfq_planner::{
    ColumnsInterval, FragmentMeta, KeyInterval, Operator, Project, ProjectWaitingForPath, Sort,
};
use pfq_storage::{InMemoryMetadata, InMemoryProvider, StorageUnitDef};

use support::{column_i64, column_names, fixture_engine, int_columns, path_rows, paths};

fn directory(engine: &Engine) -> DataFrame {
    engine
        .read(&paths(&["path"]), KeyInterval::new(1000, 2000), None)
        .expect("read directory")
}

fn waiting_read(keys: KeyInterval) -> Operator {
    Operator::ProjectWaitingForPath(ProjectWaitingForPath {
        keys,
        tag_filter: None,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn fold_reads_the_columns_named_by_its_input() {
    let (engine, _) = fixture_engine();
    let template = Operator::Sort(Sort {
        input: Box::new(waiting_read(KeyInterval::new(0, 200))),
        keys: vec![SortKey {
            column: "key".to_string(),
            descending: false,
        }],
    });
    let batches = directory(&engine)
        .selected_paths("path", "")
        .fold_into(template)
        .collect()
        .await
        .expect("collect");

    assert_eq!(column_names(&batches), vec!["key", "a.b", "x.y"]);
    assert_eq!(
        column_i64(&batches, "key"),
        vec![Some(1), Some(2), Some(3), Some(100), Some(101)]
    );
    assert_eq!(
        column_i64(&batches, "a.b"),
        vec![Some(10), Some(20), Some(30), Some(40), Some(50)]
    );
    assert!(engine.prometheus_metrics().contains("pfq_fold_replans_total{"));
    assert_eq!(engine.memory_pool().live_reservations(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiting_projection_keeps_only_harvested_columns() {
    let (engine, _) = fixture_engine();
    let wide = engine
        .read(&paths(&["a.*"]), KeyInterval::new(0, 100), None)
        .expect("read")
        .into_plan();
    let template = Operator::Project(Project {
        input: Box::new(wide),
        patterns: vec![],
        need_selected_path: true,
    });
    let batches = directory(&engine)
        .selected_paths("path", "")
        .fold_into(template)
        .collect()
        .await
        .expect("collect");

    assert_eq!(column_names(&batches), vec!["key", "a.b"]);
    assert_eq!(column_i64(&batches, "key"), vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fold_without_harvested_paths_fails() {
    let (engine, _) = fixture_engine();
    let result = directory(&engine)
        .filter(binary(col("path"), BinaryOp::Eq, lit_str("nowhere")))
        .selected_paths("path", "")
        .fold_into(waiting_read(KeyInterval::new(0, 200)))
        .collect()
        .await;

    assert!(matches!(result, Err(PfqError::InvalidArgument(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_placeholder_cannot_be_planned() {
    let (engine, _) = fixture_engine();
    let err = engine
        .plan(waiting_read(KeyInterval::new(0, 200)))
        .collect()
        .await
        .unwrap_err();
    assert!(matches!(err, PfqError::Planning(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn explain_marks_a_fold_before_it_runs() {
    let (engine, _) = fixture_engine();
    let text = directory(&engine)
        .selected_paths("path", "")
        .fold_into(waiting_read(KeyInterval::new(0, 200)))
        .explain()
        .expect("explain");

    assert!(text.contains("Fold#"));
    assert!(!text.contains(" replanned"));
}

/// Columns split at `a.0`: `a-x` sorts below the cut byte-wise, `a.b` above it.
fn segment_wise_engine() -> Engine {
    let metadata = Arc::new(InMemoryMetadata::new());
    metadata.register_storage_unit(StorageUnitDef {
        id: "u0".to_string(),
        writable: true,
    });
    let fragments = [
        ("below", ColumnsInterval::new(None, Some("a.0".into())), KeyInterval::new(0, 10)),
        ("above", ColumnsInterval::new(Some("a.0".into()), None), KeyInterval::new(0, 10)),
        ("dir", ColumnsInterval::covering("path", "path"), KeyInterval::new(1000, 2000)),
    ];
    for (id, columns, keys) in fragments {
        metadata
            .register_fragment(FragmentMeta::new(id, columns, keys, "u0"))
            .expect("register fragment");
    }

    let provider = InMemoryProvider::new();
    provider
        .insert("below", vec![int_columns(&[1, 2], &[("a-x", vec![5, 6])])])
        .expect("insert below");
    provider
        .insert("above", vec![int_columns(&[1, 2], &[("a.b", vec![7, 8])])])
        .expect("insert above");
    provider
        .insert("dir", vec![path_rows(&[1000, 1001], &["a.b", "a-x"])])
        .expect("insert dir");

    let config = EngineConfig {
        path_ordering: PathOrderingKind::SegmentWise,
        ..EngineConfig::default()
    };
    Engine::builder(config)
        .metadata(metadata)
        .provider("u0", provider)
        .build()
        .expect("engine")
}

#[tokio::test(flavor = "multi_thread")]
async fn segment_wise_fold_still_finds_every_fragment() {
    let engine = segment_wise_engine();
    let batches = directory(&engine)
        .selected_paths("path", "")
        .fold_into(waiting_read(KeyInterval::new(0, 10)))
        .collect()
        .await
        .expect("collect");

    assert_eq!(column_names(&batches), vec!["key", "a-x", "a.b"]);
    assert_eq!(column_i64(&batches, "key"), vec![Some(1), Some(2)]);
    assert_eq!(column_i64(&batches, "a-x"), vec![Some(5), Some(6)]);
    assert_eq!(column_i64(&batches, "a.b"), vec![Some(7), Some(8)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn segment_wise_read_spans_both_column_fragments() {
    let engine = segment_wise_engine();
    let batches = engine
        .read(&paths(&["a.b", "a-x"]), KeyInterval::new(0, 10), None)
        .expect("read")
        .collect()
        .await
        .expect("collect");

    assert_eq!(column_i64(&batches, "a-x"), vec![Some(5), Some(6)]);
    assert_eq!(column_i64(&batches, "a.b"), vec![Some(7), Some(8)]);
}
