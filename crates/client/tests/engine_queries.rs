mod support;

use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::compute::kernels::numeric::mul;
use arrow_schema::DataType;
use futures::TryStreamExt;
use pfq_client::{AggExpr, BinaryOp, Engine, ScalarUdf, SortKey, binary, col, lit_i64, udf};
use pfq_common::{EngineConfig, PfqError, Result};
use pfq_execution::RecordBatchStream;
use pfq_planner::KeyInterval;
use pfq_storage::{InMemoryMetadata, InMemoryProvider, StorageUnitDef};

use support::{column_i64, column_names, fixture_engine, paths};

fn data_keys() -> KeyInterval {
    KeyInterval::new(0, 200)
}

#[tokio::test(flavor = "multi_thread")]
async fn read_stitches_column_fragments_and_unions_key_ranges() {
    let (engine, _) = fixture_engine();
    let df = engine
        .read(&paths(&["x.y", "a.b"]), data_keys(), None)
        .expect("read");
    let batches = df.collect().await.expect("collect");

    assert_eq!(column_names(&batches), vec!["key", "a.b", "x.y"]);
    assert_eq!(
        column_i64(&batches, "key"),
        vec![Some(1), Some(2), Some(3), Some(100), Some(101)]
    );
    assert_eq!(
        column_i64(&batches, "x.y"),
        vec![Some(7), None, Some(9), Some(11), Some(12)]
    );
    assert_eq!(engine.memory_pool().live_reservations(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_without_paths_is_rejected() {
    let (engine, _) = fixture_engine();
    let err = engine.read(&[], data_keys(), None).unwrap_err();
    assert!(matches!(err, PfqError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_then_sort_descending() {
    let (engine, _) = fixture_engine();
    let batches = engine
        .read(&paths(&["a.b"]), data_keys(), None)
        .expect("read")
        .filter(binary(col("a.b"), BinaryOp::GtEq, lit_i64(20)))
        .sort(vec![SortKey {
            column: "a.b".to_string(),
            descending: true,
        }])
        .collect()
        .await
        .expect("collect");

    assert_eq!(
        column_i64(&batches, "key"),
        vec![Some(101), Some(100), Some(3), Some(2)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregate_over_every_key_range() {
    let (engine, _) = fixture_engine();
    let batches = engine
        .read(&paths(&["a.b", "x.y"]), data_keys(), None)
        .expect("read")
        .aggregate(vec![
            (AggExpr::Sum(col("a.b")), "total".to_string()),
            (AggExpr::Max(col("x.y")), "top".to_string()),
        ])
        .collect()
        .await
        .expect("collect");

    assert_eq!(column_i64(&batches, "total"), vec![Some(150)]);
    assert_eq!(column_i64(&batches, "top"), vec![Some(12)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn union_serves_inputs_in_order() {
    let (engine, _) = fixture_engine();
    let high = engine
        .read(&paths(&["a.b"]), KeyInterval::new(100, 200), None)
        .expect("read high");
    let low = engine
        .read(&paths(&["a.b"]), KeyInterval::new(0, 100), None)
        .expect("read low");
    let batches = high
        .union(vec![low])
        .expect("union")
        .collect()
        .await
        .expect("collect");

    assert_eq!(
        column_i64(&batches, "key"),
        vec![Some(100), Some(101), Some(1), Some(2), Some(3)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn frames_from_different_engines_do_not_mix() {
    let (first, _) = fixture_engine();
    let (second, _) = fixture_engine();
    let left = first.read(&paths(&["a.b"]), data_keys(), None).expect("read");
    let right = second.read(&paths(&["x.y"]), data_keys(), None).expect("read");
    let err = left.key_join(right).unwrap_err();
    assert!(matches!(err, PfqError::Planning(_)));
}

#[derive(Debug)]
struct TimesTwo;

impl ScalarUdf for TimesTwo {
    fn name(&self) -> &str {
        "times_two"
    }

    fn return_type(&self, _arg_types: &[DataType]) -> Result<DataType> {
        Ok(DataType::Int64)
    }

    fn invoke(&self, args: &[ArrayRef]) -> Result<ArrayRef> {
        let two = Int64Array::new_scalar(2);
        mul(&args[0], &two).map_err(|e| PfqError::Execution(e.to_string()))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn registered_udf_is_usable_in_a_filter() {
    let (engine, _) = fixture_engine();
    assert!(!engine.register_udf(Arc::new(TimesTwo)));
    let batches = engine
        .read(&paths(&["a.b"]), data_keys(), None)
        .expect("read")
        .filter(binary(
            udf("TIMES_TWO", vec![col("a.b")]),
            BinaryOp::Gt,
            lit_i64(45),
        ))
        .collect()
        .await
        .expect("collect");

    assert_eq!(
        column_i64(&batches, "key"),
        vec![Some(3), Some(100), Some(101)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn execute_stream_yields_batches_asynchronously() {
    let (engine, _) = fixture_engine();
    let stream = engine
        .read(&paths(&["a.b"]), data_keys(), None)
        .expect("read")
        .limit(2, 1)
        .execute_stream()
        .await
        .expect("stream");
    assert_eq!(stream.schema().field(0).name(), "key");

    let batches = stream.try_collect::<Vec<_>>().await.expect("drain");
    assert_eq!(column_i64(&batches, "key"), vec![Some(2), Some(3)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn explain_shows_operators_and_tasks() {
    let (engine, _) = fixture_engine();
    let text = engine
        .read(&paths(&["a.b", "x.y"]), data_keys(), None)
        .expect("read")
        .explain()
        .expect("explain");

    assert!(text.starts_with("== operators ==\n"));
    assert!(text.contains("KeyJoin"));
    assert!(text.contains("FragmentScan fragment=lo"));
    assert!(text.contains("== tasks ==\n"));
    assert!(text.contains("BinarySink#"));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_directory_gets_initial_fragments() {
    let metadata = Arc::new(InMemoryMetadata::new());
    metadata.register_storage_unit(StorageUnitDef {
        id: "u0".to_string(),
        writable: true,
    });
    let engine = Engine::builder(EngineConfig::default())
        .metadata(metadata.clone())
        .provider("u0", InMemoryProvider::new())
        .build()
        .expect("engine");

    let batches = engine
        .read(&paths(&["a.b"]), data_keys(), None)
        .expect("read")
        .collect()
        .await
        .expect("collect");

    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
    assert_eq!(metadata.fragments().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_fragments_can_be_switched_off() {
    let config = EngineConfig {
        create_initial_fragments: false,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config).expect("engine");
    let err = engine
        .read(&paths(&["a.b"]), data_keys(), None)
        .unwrap_err();
    assert!(matches!(err, PfqError::Metadata(_)));
}
