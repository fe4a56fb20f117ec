//! Path-pattern projections.
//!
//! Patterns select columns by path, with `*` matching any run of characters. The
//! key column is always kept, in first position.

use std::sync::Arc;

use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_schema::{Schema, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::{KEY_COLUMN, path_matches};

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatelessExecutor, StatelessExecutorFactory};

/// Column order of the projected output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOrder {
    /// Input order.
    Schema,
    /// Pattern order; columns matched by one wildcard are sorted by name.
    Patterns,
}

#[derive(Debug, Clone)]
pub struct ProjectFactory {
    patterns: Vec<String>,
    order: ProjectOrder,
}

impl ProjectFactory {
    pub fn project(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            order: ProjectOrder::Schema,
        }
    }

    pub fn reorder(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            order: ProjectOrder::Patterns,
        }
    }
}

impl StatelessExecutorFactory for ProjectFactory {
    fn name(&self) -> &str {
        match self.order {
            ProjectOrder::Schema => "Project",
            ProjectOrder::Patterns => "Reorder",
        }
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>> {
        if self.patterns.is_empty() {
            return Err(PfqError::InvalidArgument(format!(
                "{} needs at least one pattern",
                self.name()
            )));
        }
        let indices = match self.order {
            ProjectOrder::Schema => schema_order(&input_schema, &self.patterns),
            ProjectOrder::Patterns => pattern_order(&input_schema, &self.patterns),
        };
        let schema = Arc::new(
            input_schema
                .project(&indices)
                .map_err(|e| PfqError::Execution(format!("project schema failed: {e}")))?,
        );
        Ok(Box::new(ProjectExecutor {
            ctx: ctx.clone(),
            name: self.name().to_string(),
            indices,
            schema,
        }))
    }
}

fn key_index(schema: &Schema) -> Option<usize> {
    schema.index_of(KEY_COLUMN).ok()
}

fn schema_order(schema: &Schema, patterns: &[String]) -> Vec<usize> {
    let key = key_index(schema);
    key.into_iter()
        .chain(
            schema
                .fields()
                .iter()
                .enumerate()
                .filter(|(i, f)| {
                    Some(*i) != key && patterns.iter().any(|p| path_matches(p, f.name()))
                })
                .map(|(i, _)| i),
        )
        .collect()
}

fn pattern_order(schema: &Schema, patterns: &[String]) -> Vec<usize> {
    let key = key_index(schema);
    let mut out = key.into_iter().collect::<Vec<_>>();
    for pattern in patterns {
        let mut matched = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, f)| !out.contains(i) && path_matches(pattern, f.name()))
            .map(|(i, f)| (f.name().as_str(), i))
            .collect::<Vec<_>>();
        matched.sort();
        out.extend(matched.into_iter().map(|(_, i)| i));
    }
    out
}

struct ProjectExecutor {
    ctx: ExecutorContext,
    name: String,
    indices: Vec<usize>,
    schema: SchemaRef,
}

impl Executor for ProjectExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatelessExecutor for ProjectExecutor {
    fn compute(&mut self, batch: Batch) -> Result<Batch> {
        let columns = self
            .indices
            .iter()
            .map(|i| batch.record_batch().column(*i).clone())
            .collect::<Vec<_>>();
        let out = RecordBatch::try_new_with_options(
            self.schema.clone(),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(batch.num_rows())),
        )
        .map_err(|e| PfqError::Execution(format!("{} batch failed: {e}", self.name)))?;
        drop(batch);
        self.ctx.batch(out)
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("b.x", DataType::Int64, true),
            Field::new(KEY_COLUMN, DataType::Int64, false),
            Field::new("a.z", DataType::Int64, true),
            Field::new("a.y", DataType::Int64, true),
        ])
    }

    #[test]
    fn project_keeps_key_first_and_schema_order() {
        let idx = schema_order(&schema(), &["a.*".to_string()]);
        assert_eq!(idx, vec![1, 2, 3]);
    }

    #[test]
    fn reorder_follows_patterns_and_sorts_wildcards() {
        let idx = pattern_order(&schema(), &["b.x".to_string(), "a.*".to_string()]);
        assert_eq!(idx, vec![1, 0, 3, 2]);
    }
}
