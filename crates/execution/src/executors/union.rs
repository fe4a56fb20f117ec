use arrow_schema::SchemaRef;
use pfq_common::{PfqError, Result};

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{BinaryExecutorFactory, Executor, StatefulBinaryExecutor};
use crate::stream::{column_names, same_columns};

/// Left rows, then right rows. Batches pass through one at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionAllFactory;

impl BinaryExecutorFactory for UnionAllFactory {
    fn name(&self) -> &str {
        "UnionAll"
    }

    fn initialize(
        &self,
        _ctx: &ExecutorContext,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulBinaryExecutor>> {
        if !same_columns(&left_schema, &right_schema) {
            return Err(PfqError::InvalidArgument(format!(
                "UnionAll inputs disagree on schema: {:?} vs {:?}",
                column_names(&left_schema),
                column_names(&right_schema)
            )));
        }
        Ok(Box::new(UnionAllExecutor {
            schema: left_schema,
            pending: None,
            left_ended: false,
            right_ended: false,
        }))
    }
}

struct UnionAllExecutor {
    schema: SchemaRef,
    pending: Option<Batch>,
    left_ended: bool,
    right_ended: bool,
}

impl Executor for UnionAllExecutor {
    fn name(&self) -> &str {
        "UnionAll"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

impl StatefulBinaryExecutor for UnionAllExecutor {
    fn need_consume_left(&self) -> bool {
        !self.left_ended && self.pending.is_none()
    }

    fn need_consume_right(&self) -> bool {
        self.left_ended && !self.right_ended && self.pending.is_none()
    }

    fn consume_left(&mut self, batch: Batch) -> Result<()> {
        self.pending = Some(batch);
        Ok(())
    }

    fn consume_right(&mut self, batch: Batch) -> Result<()> {
        self.pending = Some(batch.with_schema(self.schema.clone())?);
        Ok(())
    }

    fn consume_left_end(&mut self) -> Result<()> {
        self.left_ended = true;
        Ok(())
    }

    fn consume_right_end(&mut self) -> Result<()> {
        self.right_ended = true;
        Ok(())
    }

    fn can_produce(&self) -> bool {
        self.pending.is_some()
    }

    fn produce(&mut self) -> Result<Batch> {
        self.pending.take().ok_or(PfqError::StreamExhausted)
    }
}
