use arrow_schema::SchemaRef;
use pfq_common::Result;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatelessExecutor, StatelessExecutorFactory};

/// Skips `offset` rows, then passes at most `limit` rows.
///
/// Once the limit is reached the executor reports itself empty and the pipeline
/// stops pulling upstream.
#[derive(Debug, Clone, Copy)]
pub struct LimitFactory {
    limit: usize,
    offset: usize,
}

impl LimitFactory {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

impl StatelessExecutorFactory for LimitFactory {
    fn name(&self) -> &str {
        "Limit"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>> {
        Ok(Box::new(LimitExecutor {
            ctx: ctx.clone(),
            schema: input_schema,
            to_skip: self.offset,
            remaining: self.limit,
        }))
    }
}

struct LimitExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    to_skip: usize,
    remaining: usize,
}

impl Executor for LimitExecutor {
    fn name(&self) -> &str {
        "Limit"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatelessExecutor for LimitExecutor {
    fn compute(&mut self, batch: Batch) -> Result<Batch> {
        let rows = batch.num_rows();
        let skip = self.to_skip.min(rows);
        let take = (rows - skip).min(self.remaining);
        self.to_skip -= skip;
        self.remaining -= take;
        if skip == 0 && take == rows {
            return Ok(batch);
        }
        let out = batch.record_batch().slice(skip, take);
        drop(batch);
        self.ctx.batch(out)
    }

    fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}
