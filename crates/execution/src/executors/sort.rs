use std::collections::VecDeque;

use arrow::compute::{SortColumn, SortOptions, concat_batches, lexsort_to_indices, take};
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use pfq_common::{PfqError, Result};
use pfq_planner::SortKey;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatefulUnaryExecutor, UnaryExecutorFactory};

/// Full sort: buffers the whole input, then emits `batch_size_rows` chunks.
///
/// Nulls sort first ascending and last descending.
#[derive(Debug, Clone)]
pub struct SortFactory {
    keys: Vec<SortKey>,
}

impl SortFactory {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }
}

impl UnaryExecutorFactory for SortFactory {
    fn name(&self) -> &str {
        "Sort"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulUnaryExecutor>> {
        if self.keys.is_empty() {
            return Err(PfqError::InvalidArgument("Sort needs at least one key".to_string()));
        }
        let keys = self
            .keys
            .iter()
            .map(|k| {
                let idx = input_schema.index_of(&k.column).map_err(|_| {
                    PfqError::InvalidArgument(format!("Sort: unknown column '{}'", k.column))
                })?;
                Ok((idx, k.descending))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(SortExecutor {
            ctx: ctx.clone(),
            schema: input_schema,
            keys,
            buffered: Vec::new(),
            sorted: VecDeque::new(),
            ended: false,
        }))
    }
}

struct SortExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    keys: Vec<(usize, bool)>,
    buffered: Vec<Batch>,
    sorted: VecDeque<Batch>,
    ended: bool,
}

impl SortExecutor {
    fn sort_buffered(&mut self) -> Result<()> {
        let input = std::mem::take(&mut self.buffered);
        let rows = input.iter().map(Batch::num_rows).sum::<usize>();
        if rows == 0 {
            return Ok(());
        }
        let all = concat_batches(&self.schema, input.iter().map(Batch::record_batch))
            .map_err(|e| PfqError::Execution(format!("sort concat failed: {e}")))?;
        drop(input);
        let sort_columns = self
            .keys
            .iter()
            .map(|(idx, descending)| SortColumn {
                values: all.column(*idx).clone(),
                options: Some(SortOptions {
                    descending: *descending,
                    nulls_first: !*descending,
                }),
            })
            .collect::<Vec<_>>();
        let indices = lexsort_to_indices(&sort_columns, None)
            .map_err(|e| PfqError::Execution(format!("sort failed: {e}")))?;
        let columns = all
            .columns()
            .iter()
            .map(|c| take(c.as_ref(), &indices, None))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PfqError::Execution(format!("sort take failed: {e}")))?;
        let sorted = RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| PfqError::Execution(format!("sort output failed: {e}")))?;
        drop(all);

        let chunk = self.ctx.batch_size_rows.max(1);
        let mut offset = 0;
        while offset < rows {
            let len = chunk.min(rows - offset);
            self.sorted.push_back(self.ctx.batch(sorted.slice(offset, len))?);
            offset += len;
        }
        Ok(())
    }
}

impl Executor for SortExecutor {
    fn name(&self) -> &str {
        "Sort"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.buffered.clear();
        self.sorted.clear();
        Ok(())
    }
}

impl StatefulUnaryExecutor for SortExecutor {
    fn need_consume(&self) -> bool {
        !self.ended
    }

    fn consume(&mut self, batch: Batch) -> Result<()> {
        if batch.num_rows() > 0 {
            self.buffered.push(batch);
        }
        Ok(())
    }

    fn consume_end(&mut self) -> Result<()> {
        self.ended = true;
        self.sort_buffered()
    }

    fn can_produce(&self) -> bool {
        !self.sorted.is_empty()
    }

    fn produce(&mut self) -> Result<Batch> {
        self.sorted.pop_front().ok_or(PfqError::StreamExhausted)
    }
}
