use std::collections::{HashSet, VecDeque};

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use arrow_schema::SchemaRef;
use pfq_common::{PfqError, Result};

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatefulUnaryExecutor, UnaryExecutorFactory};

/// Drops rows already seen, comparing every column.
///
/// New rows are emitted as soon as their batch is consumed; only the set of seen
/// rows is kept across batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistinctFactory;

impl UnaryExecutorFactory for DistinctFactory {
    fn name(&self) -> &str {
        "Distinct"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulUnaryExecutor>> {
        let converter = RowConverter::new(
            input_schema
                .fields()
                .iter()
                .map(|f| SortField::new(f.data_type().clone()))
                .collect(),
        )
        .map_err(|e| PfqError::InvalidArgument(format!("Distinct: {e}")))?;
        Ok(Box::new(DistinctExecutor {
            ctx: ctx.clone(),
            schema: input_schema,
            converter,
            seen: HashSet::new(),
            ready: VecDeque::new(),
            ended: false,
        }))
    }
}

struct DistinctExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    converter: RowConverter,
    seen: HashSet<OwnedRow>,
    ready: VecDeque<Batch>,
    ended: bool,
}

impl Executor for DistinctExecutor {
    fn name(&self) -> &str {
        "Distinct"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.ready.clear();
        self.seen.clear();
        Ok(())
    }
}

impl StatefulUnaryExecutor for DistinctExecutor {
    fn need_consume(&self) -> bool {
        !self.ended && self.ready.is_empty()
    }

    fn consume(&mut self, batch: Batch) -> Result<()> {
        let rows = self
            .converter
            .convert_columns(batch.record_batch().columns())
            .map_err(|e| PfqError::Execution(format!("distinct row encoding failed: {e}")))?;
        let keep = rows
            .iter()
            .map(|row| Some(self.seen.insert(row.owned())))
            .collect::<BooleanArray>();
        if keep.true_count() == 0 {
            return Ok(());
        }
        let out = filter_record_batch(batch.record_batch(), &keep)
            .map_err(|e| PfqError::Execution(format!("distinct filter failed: {e}")))?;
        drop(batch);
        self.ready.push_back(self.ctx.batch(out)?);
        Ok(())
    }

    fn consume_end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }

    fn can_produce(&self) -> bool {
        !self.ready.is_empty()
    }

    fn produce(&mut self) -> Result<Batch> {
        self.ready.pop_front().ok_or(PfqError::StreamExhausted)
    }
}
