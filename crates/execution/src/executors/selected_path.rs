use std::sync::Arc;

use arrow::array::{Array, StringArray};
use arrow::compute::kernels::cast::cast;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::SELECTED_PATH_FIELD;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatelessExecutor, StatelessExecutorFactory};

/// Emits the values of one column as path names in the `selected_path` column,
/// which a fold task harvests.
#[derive(Debug, Clone)]
pub struct ValueToSelectedPathFactory {
    column: String,
    prefix: String,
}

impl ValueToSelectedPathFactory {
    pub fn new(column: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            prefix: prefix.into(),
        }
    }
}

impl StatelessExecutorFactory for ValueToSelectedPathFactory {
    fn name(&self) -> &str {
        "ValueToSelectedPath"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>> {
        let index = input_schema.index_of(&self.column).map_err(|_| {
            PfqError::InvalidArgument(format!(
                "ValueToSelectedPath: unknown column '{}'",
                self.column
            ))
        })?;
        Ok(Box::new(ValueToSelectedPathExecutor {
            ctx: ctx.clone(),
            index,
            prefix: self.prefix.clone(),
            schema: Arc::new(Schema::new(vec![Field::new(
                SELECTED_PATH_FIELD,
                DataType::Utf8,
                true,
            )])),
        }))
    }
}

struct ValueToSelectedPathExecutor {
    ctx: ExecutorContext,
    index: usize,
    prefix: String,
    schema: SchemaRef,
}

impl Executor for ValueToSelectedPathExecutor {
    fn name(&self) -> &str {
        "ValueToSelectedPath"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatelessExecutor for ValueToSelectedPathExecutor {
    fn compute(&mut self, batch: Batch) -> Result<Batch> {
        let values = cast(batch.record_batch().column(self.index), &DataType::Utf8)
            .map_err(|e| PfqError::Execution(format!("selected path cast failed: {e}")))?;
        drop(batch);
        let values = values
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| PfqError::Execution("selected path cast lost utf8".to_string()))?;
        let paths = if self.prefix.is_empty() {
            values.clone()
        } else {
            values
                .iter()
                .map(|v| v.map(|v| format!("{}.{v}", self.prefix)))
                .collect::<StringArray>()
        };
        let out = RecordBatch::try_new(self.schema.clone(), vec![Arc::new(paths)])
            .map_err(|e| PfqError::Execution(format!("selected path batch failed: {e}")))?;
        self.ctx.batch(out)
    }
}
