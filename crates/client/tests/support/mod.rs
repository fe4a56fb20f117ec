#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use pfq_client::Engine;
use pfq_common::EngineConfig;
use pfq_planner::{ColumnsInterval, FragmentMeta, KeyInterval};
use pfq_storage::{InMemoryMetadata, InMemoryProvider, StorageUnitDef};

/// Engine over two storage units:
///
/// * keys `[0, 100)` split by column at `m`: `lo` on `u0` holds `a.b` and `a.c`,
///   `hi` on `u1` holds `x.y` for keys 1 and 3 only;
/// * keys `[100, 200)` in one fragment `all` on `u0` holding `a.b` and `x.y`;
/// * keys `[1000, 2000)` in `dir` on `u0`, a `path` column naming other columns.
pub fn fixture_engine() -> (Engine, Arc<InMemoryMetadata>) {
    let metadata = Arc::new(InMemoryMetadata::new());
    for id in ["u0", "u1"] {
        metadata.register_storage_unit(StorageUnitDef {
            id: id.to_string(),
            writable: true,
        });
    }
    let fragments = [
        ("lo", ColumnsInterval::new(None, Some("m".into())), KeyInterval::new(0, 100), "u0"),
        ("hi", ColumnsInterval::new(Some("m".into()), None), KeyInterval::new(0, 100), "u1"),
        ("all", ColumnsInterval::unbounded(), KeyInterval::new(100, 200), "u0"),
        ("dir", ColumnsInterval::covering("path", "path"), KeyInterval::new(1000, 2000), "u0"),
    ];
    for (id, columns, keys, unit) in fragments {
        metadata
            .register_fragment(FragmentMeta::new(id, columns, keys, unit))
            .expect("register fragment");
    }

    let provider = InMemoryProvider::new();
    provider
        .insert(
            "lo",
            vec![int_columns(&[1, 2, 3], &[("a.b", vec![10, 20, 30]), ("a.c", vec![1, 1, 2])])],
        )
        .expect("insert lo");
    provider
        .insert("hi", vec![int_columns(&[1, 3], &[("x.y", vec![7, 9])])])
        .expect("insert hi");
    provider
        .insert(
            "all",
            vec![int_columns(&[100, 101], &[("a.b", vec![40, 50]), ("x.y", vec![11, 12])])],
        )
        .expect("insert all");
    provider
        .insert("dir", vec![path_rows(&[1000, 1001, 1002], &["a.b", "x.y", "a.b"])])
        .expect("insert dir");

    let engine = Engine::builder(EngineConfig::default())
        .metadata(metadata.clone())
        .provider("u0", provider.clone())
        .provider("u1", provider)
        .build()
        .expect("engine");
    (engine, metadata)
}

pub fn int_columns(keys: &[i64], columns: &[(&str, Vec<i64>)]) -> RecordBatch {
    let mut fields = vec![Field::new("key", DataType::Int64, false)];
    let mut arrays: Vec<Arc<dyn Array>> = vec![Arc::new(Int64Array::from(keys.to_vec()))];
    for (name, values) in columns {
        fields.push(Field::new(*name, DataType::Int64, true));
        arrays.push(Arc::new(Int64Array::from(values.clone())));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).expect("int batch")
}

pub fn path_rows(keys: &[i64], paths: &[&str]) -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("key", DataType::Int64, false),
        Field::new("path", DataType::Utf8, false),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int64Array::from(keys.to_vec())),
            Arc::new(StringArray::from(paths.to_vec())),
        ],
    )
    .expect("path batch")
}

pub fn paths(values: &[&str]) -> Vec<String> {
    values.iter().map(|p| p.to_string()).collect()
}

/// Values of an Int64 column across batches; nulls come back as `None`.
pub fn column_i64(batches: &[RecordBatch], column: &str) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|b| {
            let idx = b.schema().index_of(column).expect("column");
            b.column(idx)
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("int64")
                .iter()
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn column_names(batches: &[RecordBatch]) -> Vec<String> {
    batches
        .first()
        .map(|b| b.schema().fields().iter().map(|f| f.name().clone()).collect())
        .unwrap_or_default()
}
