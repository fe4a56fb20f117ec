//! Full outer join on the key column.
//!
//! Stitches fragments that hold different columns of the same rows. Both inputs
//! are buffered; the output is ordered by key and split into
//! `batch_size_rows` chunks. A key present on one side only gets nulls for the
//! other side's columns.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, UInt32Array};
use arrow::compute::kernels::cast::cast;
use arrow::compute::{concat_batches, take};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::KEY_COLUMN;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{BinaryExecutorFactory, Executor, StatefulBinaryExecutor};

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyJoinFactory;

impl BinaryExecutorFactory for KeyJoinFactory {
    fn name(&self) -> &str {
        "KeyJoin"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulBinaryExecutor>> {
        let left_key = key_index(&left_schema, "left")?;
        let right_key = key_index(&right_schema, "right")?;

        let mut fields = vec![Field::new(KEY_COLUMN, DataType::Int64, false)];
        for (schema, key) in [(&left_schema, left_key), (&right_schema, right_key)] {
            for (i, f) in schema.fields().iter().enumerate() {
                if i == key {
                    continue;
                }
                if fields.iter().any(|existing| existing.name() == f.name()) {
                    return Err(PfqError::InvalidArgument(format!(
                        "KeyJoin: column '{}' exists on both sides",
                        f.name()
                    )));
                }
                fields.push(f.as_ref().clone().with_nullable(true));
            }
        }
        Ok(Box::new(KeyJoinExecutor {
            ctx: ctx.clone(),
            schema: Arc::new(Schema::new(fields)),
            left: Side::new(left_schema, left_key),
            right: Side::new(right_schema, right_key),
            output: VecDeque::new(),
        }))
    }
}

fn key_index(schema: &Schema, side: &str) -> Result<usize> {
    let idx = schema.index_of(KEY_COLUMN).map_err(|_| {
        PfqError::InvalidArgument(format!("KeyJoin: {side} input has no '{KEY_COLUMN}' column"))
    })?;
    match schema.field(idx).data_type() {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => Ok(idx),
        other => Err(PfqError::InvalidArgument(format!(
            "KeyJoin: {side} key must be an integer, got {other}"
        ))),
    }
}

struct Side {
    schema: SchemaRef,
    key: usize,
    batches: Vec<Batch>,
    ended: bool,
}

impl Side {
    fn new(schema: SchemaRef, key: usize) -> Self {
        Self {
            schema,
            key,
            batches: Vec::new(),
            ended: false,
        }
    }

    /// Concatenated input plus its key column as int64.
    fn drain(&mut self) -> Result<(RecordBatch, Int64Array)> {
        let batches = std::mem::take(&mut self.batches);
        let all = concat_batches(&self.schema, batches.iter().map(Batch::record_batch))
            .map_err(|e| PfqError::Execution(format!("key join concat failed: {e}")))?;
        let keys = cast(all.column(self.key), &DataType::Int64)
            .map_err(|e| PfqError::Execution(format!("key join key cast failed: {e}")))?;
        let keys = keys
            .as_any()
            .downcast_ref::<Int64Array>()
            .cloned()
            .ok_or_else(|| PfqError::Execution("key join key is not int64".to_string()))?;
        if keys.null_count() > 0 {
            return Err(PfqError::Execution(format!(
                "key join found null values in '{KEY_COLUMN}'"
            )));
        }
        Ok((all, keys))
    }
}

/// Row slots of one key on one side; a missing side contributes one null slot.
fn slots(rows: &[u32]) -> Vec<Option<u32>> {
    if rows.is_empty() {
        vec![None]
    } else {
        rows.iter().copied().map(Some).collect()
    }
}

struct KeyJoinExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    left: Side,
    right: Side,
    output: VecDeque<Batch>,
}

impl KeyJoinExecutor {
    fn join(&mut self) -> Result<()> {
        let (left, left_keys) = self.left.drain()?;
        let (right, right_keys) = self.right.drain()?;

        let mut by_key = BTreeMap::<i64, (Vec<u32>, Vec<u32>)>::new();
        for (i, k) in left_keys.values().iter().enumerate() {
            by_key.entry(*k).or_default().0.push(i as u32);
        }
        for (i, k) in right_keys.values().iter().enumerate() {
            by_key.entry(*k).or_default().1.push(i as u32);
        }

        let mut keys = Vec::new();
        let mut left_idx = Vec::<Option<u32>>::new();
        let mut right_idx = Vec::<Option<u32>>::new();
        for (key, (ls, rs)) in &by_key {
            let (ls, rs) = (slots(ls), slots(rs));
            for l in &ls {
                for r in &rs {
                    keys.push(*key);
                    left_idx.push(*l);
                    right_idx.push(*r);
                }
            }
        }
        let rows = keys.len();
        if rows == 0 {
            return Ok(());
        }

        let left_idx = UInt32Array::from(left_idx);
        let right_idx = UInt32Array::from(right_idx);
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(keys))];
        for (batch, key, idx) in [
            (&left, self.left.key, &left_idx),
            (&right, self.right.key, &right_idx),
        ] {
            for (i, column) in batch.columns().iter().enumerate() {
                if i == key {
                    continue;
                }
                columns.push(
                    take(column.as_ref(), idx, None)
                        .map_err(|e| PfqError::Execution(format!("key join take failed: {e}")))?,
                );
            }
        }
        let joined = RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| PfqError::Execution(format!("key join output failed: {e}")))?;

        let chunk = self.ctx.batch_size_rows.max(1);
        let mut offset = 0;
        while offset < rows {
            let len = chunk.min(rows - offset);
            self.output.push_back(self.ctx.batch(joined.slice(offset, len))?);
            offset += len;
        }
        Ok(())
    }

    fn finish_if_done(&mut self) -> Result<()> {
        if self.left.ended && self.right.ended {
            self.join()?;
        }
        Ok(())
    }
}

impl Executor for KeyJoinExecutor {
    fn name(&self) -> &str {
        "KeyJoin"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.left.batches.clear();
        self.right.batches.clear();
        self.output.clear();
        Ok(())
    }
}

impl StatefulBinaryExecutor for KeyJoinExecutor {
    fn need_consume_left(&self) -> bool {
        !self.left.ended
    }

    fn need_consume_right(&self) -> bool {
        !self.right.ended
    }

    fn consume_left(&mut self, batch: Batch) -> Result<()> {
        self.left.batches.push(batch);
        Ok(())
    }

    fn consume_right(&mut self, batch: Batch) -> Result<()> {
        self.right.batches.push(batch);
        Ok(())
    }

    fn consume_left_end(&mut self) -> Result<()> {
        self.left.ended = true;
        self.finish_if_done()
    }

    fn consume_right_end(&mut self) -> Result<()> {
        self.right.ended = true;
        self.finish_if_done()
    }

    fn can_produce(&self) -> bool {
        !self.output.is_empty()
    }

    fn produce(&mut self) -> Result<Batch> {
        self.output.pop_front().ok_or(PfqError::StreamExhausted)
    }
}
