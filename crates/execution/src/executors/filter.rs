use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow_schema::{DataType, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::Expr;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatelessExecutor, StatelessExecutorFactory};
use crate::expressions::{PhysicalExpr, compile_expr};

/// Keeps rows whose predicate is true; null counts as false.
#[derive(Debug, Clone)]
pub struct FilterFactory {
    predicate: Expr,
}

impl FilterFactory {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }
}

impl StatelessExecutorFactory for FilterFactory {
    fn name(&self) -> &str {
        "Filter"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>> {
        let predicate = compile_expr(&self.predicate, &input_schema, &ctx.udfs)?;
        if predicate.data_type() != DataType::Boolean {
            return Err(PfqError::InvalidArgument(format!(
                "filter predicate must be boolean, got {}",
                predicate.data_type()
            )));
        }
        Ok(Box::new(FilterExecutor {
            ctx: ctx.clone(),
            schema: input_schema,
            predicate,
        }))
    }
}

struct FilterExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    predicate: Arc<dyn PhysicalExpr>,
}

impl Executor for FilterExecutor {
    fn name(&self) -> &str {
        "Filter"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatelessExecutor for FilterExecutor {
    fn compute(&mut self, batch: Batch) -> Result<Batch> {
        let mask = self.predicate.evaluate(batch.record_batch())?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| PfqError::Execution("filter predicate is not boolean".to_string()))?;
        let out = filter_record_batch(batch.record_batch(), mask)
            .map_err(|e| PfqError::Execution(format!("filter batch failed: {e}")))?;
        drop(batch);
        self.ctx.batch(out)
    }
}
