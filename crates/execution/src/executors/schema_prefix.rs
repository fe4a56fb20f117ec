use std::sync::Arc;

use arrow_schema::{Field, Schema, SchemaRef};
use pfq_common::Result;
use pfq_planner::KEY_COLUMN;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatelessExecutor, StatelessExecutorFactory};

/// Renames every non-key column `c` to `prefix.c`.
#[derive(Debug, Clone)]
pub struct AddSchemaPrefixFactory {
    prefix: String,
}

impl AddSchemaPrefixFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl StatelessExecutorFactory for AddSchemaPrefixFactory {
    fn name(&self) -> &str {
        "AddSchemaPrefix"
    }

    fn initialize(
        &self,
        _ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>> {
        let schema = if self.prefix.is_empty() {
            input_schema
        } else {
            let fields = input_schema
                .fields()
                .iter()
                .map(|f| {
                    if f.name() == KEY_COLUMN {
                        f.as_ref().clone()
                    } else {
                        Field::new(
                            format!("{}.{}", self.prefix, f.name()),
                            f.data_type().clone(),
                            f.is_nullable(),
                        )
                        .with_metadata(f.metadata().clone())
                    }
                })
                .collect::<Vec<_>>();
            Arc::new(Schema::new_with_metadata(fields, input_schema.metadata().clone()))
        };
        Ok(Box::new(AddSchemaPrefixExecutor { schema }))
    }
}

struct AddSchemaPrefixExecutor {
    schema: SchemaRef,
}

impl Executor for AddSchemaPrefixExecutor {
    fn name(&self) -> &str {
        "AddSchemaPrefix"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatelessExecutor for AddSchemaPrefixExecutor {
    fn compute(&mut self, batch: Batch) -> Result<Batch> {
        batch.with_schema(self.schema.clone())
    }
}
