//! Provider keeping fragment data in memory.
//!
//! Column tags live in the arrow field metadata: every metadata entry of a field
//! is one `tag=value` pair.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_execution::{ExecutorContext, MemoryStream, SendableBatchStream, empty_stream};
use pfq_planner::{FragmentMeta, KEY_COLUMN, TagFilter, path_matches};
use tracing::debug;

use crate::provider::{Stats, StorageProvider};

#[derive(Debug, Clone)]
struct FragmentData {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    fragments: RwLock<HashMap<String, FragmentData>>,
}

impl InMemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `batches` to the fragment `fragment_id`.
    ///
    /// Every batch must carry a `key` column and share the schema of earlier
    /// batches of the same fragment.
    pub fn insert(&self, fragment_id: &str, batches: Vec<RecordBatch>) -> Result<()> {
        let Some(first) = batches.first() else {
            return Ok(());
        };
        let schema = first.schema();
        if schema.index_of(KEY_COLUMN).is_err() {
            return Err(PfqError::Storage(format!(
                "fragment {fragment_id}: rows have no '{KEY_COLUMN}' column"
            )));
        }
        if let Some(other) = batches.iter().find(|b| b.schema() != schema) {
            return Err(PfqError::Storage(format!(
                "fragment {fragment_id}: mixed schemas {schema:?} and {:?}",
                other.schema()
            )));
        }

        let mut fragments = self
            .fragments
            .write()
            .expect("in-memory provider lock poisoned");
        let data = fragments
            .entry(fragment_id.to_string())
            .or_insert_with(|| FragmentData {
                schema: schema.clone(),
                batches: vec![],
            });
        if data.schema != schema {
            return Err(PfqError::Storage(format!(
                "fragment {fragment_id}: schema differs from the stored rows"
            )));
        }
        data.batches.extend(batches);
        Ok(())
    }

    fn fragment(&self, fragment_id: &str) -> Option<FragmentData> {
        self.fragments
            .read()
            .expect("in-memory provider lock poisoned")
            .get(fragment_id)
            .cloned()
    }
}

/// Key column first, then every selected column in stored order.
fn selected_columns(
    schema: &Schema,
    patterns: &[String],
    tag_filter: Option<&TagFilter>,
) -> Vec<usize> {
    let key = schema.index_of(KEY_COLUMN).ok();
    let selected = schema.fields().iter().enumerate().filter(|(idx, field)| {
        Some(*idx) != key
            && patterns.iter().any(|p| path_matches(p, field.name()))
            && tag_filter.is_none_or(|filter| filter.matches(field.metadata()))
    });
    key.into_iter()
        .chain(selected.map(|(idx, _)| idx))
        .collect()
}

fn key_only_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        KEY_COLUMN,
        arrow_schema::DataType::Int64,
        false,
    )]))
}

impl StorageProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn estimate_stats(&self, fragment: &FragmentMeta) -> Stats {
        let Some(data) = self.fragment(&fragment.id) else {
            return Stats {
                estimated_rows: Some(0),
                estimated_bytes: Some(0),
            };
        };
        let rows = data.batches.iter().map(|b| b.num_rows() as u64).sum();
        let bytes = data
            .batches
            .iter()
            .map(|b| b.get_array_memory_size() as u64)
            .sum();
        Stats {
            estimated_rows: Some(rows),
            estimated_bytes: Some(bytes),
        }
    }

    fn scan(
        &self,
        ctx: &ExecutorContext,
        fragment: &FragmentMeta,
        patterns: &[String],
        tag_filter: Option<&TagFilter>,
    ) -> Result<SendableBatchStream> {
        let Some(data) = self.fragment(&fragment.id) else {
            // created but never written
            debug!(fragment = %fragment.id, "scanning empty fragment");
            return Ok(empty_stream(key_only_schema()));
        };
        let indices = selected_columns(&data.schema, patterns, tag_filter);
        let schema = Arc::new(
            data.schema
                .project(&indices)
                .map_err(|e| PfqError::Storage(format!("projecting {}: {e}", fragment.id)))?,
        );
        let batches = data
            .batches
            .iter()
            .map(|b| b.project(&indices))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PfqError::Storage(format!("projecting {}: {e}", fragment.id)))?;
        debug!(
            fragment = %fragment.id,
            columns = schema.fields().len(),
            batches = batches.len(),
            "fragment scan opened"
        );
        Ok(Box::new(MemoryStream::new(schema, batches, ctx.pool.clone())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use arrow::array::Int64Array;
    use arrow_schema::DataType;
    use pfq_common::{MemoryPool, QueryId, TaskId};
    use pfq_execution::{BatchStream, UdfRegistry, collect_batches};
    use pfq_planner::{ColumnsInterval, KeyInterval};

    use super::*;

    fn ctx() -> ExecutorContext {
        ExecutorContext {
            query_id: QueryId(1),
            task_id: TaskId(1),
            batch_size_rows: 1024,
            pool: MemoryPool::unbounded(),
            udfs: Arc::new(UdfRegistry::new()),
        }
    }

    fn tagged(name: &str, host: &str) -> Field {
        Field::new(name, DataType::Int64, true)
            .with_metadata(HashMap::from([("host".to_string(), host.to_string())]))
    }

    fn rows() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new(KEY_COLUMN, DataType::Int64, false),
            tagged("a.b", "h1"),
            tagged("a.c", "h2"),
            tagged("z.y", "h1"),
        ]));
        let col = |v: Vec<i64>| Arc::new(Int64Array::from(v)) as arrow::array::ArrayRef;
        RecordBatch::try_new(
            schema,
            vec![col(vec![1, 2]), col(vec![10, 20]), col(vec![30, 40]), col(vec![50, 60])],
        )
        .expect("rows")
    }

    fn fragment() -> FragmentMeta {
        FragmentMeta::new("f1", ColumnsInterval::unbounded(), KeyInterval::full(), "unit0")
    }

    fn names(stream: SendableBatchStream) -> Vec<String> {
        let out = collect_batches(stream).expect("collect");
        out[0]
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    #[test]
    fn scan_keeps_key_and_matching_columns() {
        let provider = InMemoryProvider::new();
        provider.insert("f1", vec![rows()]).expect("insert");
        let stream = provider
            .scan(&ctx(), &fragment(), &["a.*".to_string()], None)
            .expect("scan");
        assert_eq!(names(stream), vec!["key", "a.b", "a.c"]);
    }

    #[test]
    fn tag_filter_drops_columns() {
        let provider = InMemoryProvider::new();
        provider.insert("f1", vec![rows()]).expect("insert");
        let filter = TagFilter::eq("host", "h1");
        let stream = provider
            .scan(&ctx(), &fragment(), &["*".to_string()], Some(&filter))
            .expect("scan");
        assert_eq!(names(stream), vec!["key", "a.b", "z.y"]);
    }

    #[test]
    fn unwritten_fragment_scans_empty() {
        let provider = InMemoryProvider::new();
        let stream = provider
            .scan(&ctx(), &fragment(), &["*".to_string()], None)
            .expect("scan");
        assert!(collect_batches(stream).expect("collect").is_empty());
        let mut stream = provider
            .scan(&ctx(), &fragment(), &["a.b".to_string()], None)
            .expect("scan");
        let schema = stream.schema().expect("schema");
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.field(0).name(), KEY_COLUMN);
        assert!(!stream.has_next().expect("has_next"));
        assert_eq!(provider.estimate_stats(&fragment()).estimated_rows, Some(0));
    }

    #[test]
    fn rows_without_key_are_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1]))])
            .expect("batch");
        let err = InMemoryProvider::new()
            .insert("f1", vec![batch])
            .expect_err("no key");
        assert!(matches!(err, PfqError::Storage(_)));
    }
}
