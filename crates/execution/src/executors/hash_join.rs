//! Equi inner join: builds a hash table from the whole left input, then probes
//! it with each right batch as it arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use arrow_schema::{Field, Schema, SchemaRef};
use pfq_common::{PfqError, Result};

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{BinaryExecutorFactory, Executor, StatefulBinaryExecutor};

/// Output is every left column followed by the right columns. When both join
/// columns share a name the right one is dropped.
#[derive(Debug, Clone)]
pub struct HashJoinFactory {
    left_on: String,
    right_on: String,
}

impl HashJoinFactory {
    pub fn new(left_on: impl Into<String>, right_on: impl Into<String>) -> Self {
        Self {
            left_on: left_on.into(),
            right_on: right_on.into(),
        }
    }
}

impl BinaryExecutorFactory for HashJoinFactory {
    fn name(&self) -> &str {
        "HashInnerJoin"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulBinaryExecutor>> {
        let left_key = left_schema.index_of(&self.left_on).map_err(|_| {
            PfqError::InvalidArgument(format!("HashInnerJoin: unknown left column '{}'", self.left_on))
        })?;
        let right_key = right_schema.index_of(&self.right_on).map_err(|_| {
            PfqError::InvalidArgument(format!(
                "HashInnerJoin: unknown right column '{}'",
                self.right_on
            ))
        })?;
        let key_type = left_schema.field(left_key).data_type();
        if key_type != right_schema.field(right_key).data_type() {
            return Err(PfqError::InvalidArgument(format!(
                "HashInnerJoin: key types differ ({key_type} vs {})",
                right_schema.field(right_key).data_type()
            )));
        }

        let right_columns = right_schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| !(*i == right_key && self.left_on == self.right_on))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let mut fields = left_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect::<Vec<Field>>();
        for i in &right_columns {
            let f = right_schema.field(*i);
            if fields.iter().any(|existing| existing.name() == f.name()) {
                return Err(PfqError::InvalidArgument(format!(
                    "HashInnerJoin: column '{}' exists on both sides",
                    f.name()
                )));
            }
            fields.push(f.clone());
        }

        let converter = RowConverter::new(vec![SortField::new(key_type.clone())])
            .map_err(|e| PfqError::InvalidArgument(format!("HashInnerJoin: {e}")))?;
        Ok(Box::new(HashJoinExecutor {
            ctx: ctx.clone(),
            schema: Arc::new(Schema::new(fields)),
            left_schema,
            left_key,
            right_key,
            right_columns,
            converter,
            build_batches: Vec::new(),
            build: None,
            table: HashMap::new(),
            left_ended: false,
            right_ended: false,
            output: VecDeque::new(),
        }))
    }
}

struct HashJoinExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    left_schema: SchemaRef,
    left_key: usize,
    right_key: usize,
    right_columns: Vec<usize>,
    converter: RowConverter,
    build_batches: Vec<Batch>,
    build: Option<RecordBatch>,
    table: HashMap<OwnedRow, Vec<u32>>,
    left_ended: bool,
    right_ended: bool,
    output: VecDeque<Batch>,
}

impl HashJoinExecutor {
    fn build_table(&mut self) -> Result<()> {
        let batches = std::mem::take(&mut self.build_batches);
        let build = concat_batches(&self.left_schema, batches.iter().map(Batch::record_batch))
            .map_err(|e| PfqError::Execution(format!("hash join build concat failed: {e}")))?;
        let key = build.column(self.left_key);
        let rows = self
            .converter
            .convert_columns(&[key.clone()])
            .map_err(|e| PfqError::Execution(format!("hash join key encoding failed: {e}")))?;
        for (i, row) in rows.iter().enumerate() {
            // null keys never match
            if key.is_valid(i) {
                self.table.entry(row.owned()).or_default().push(i as u32);
            }
        }
        self.build = Some(build);
        Ok(())
    }

    fn probe(&self, batch: &RecordBatch) -> Result<Option<RecordBatch>> {
        let Some(build) = &self.build else {
            return Err(PfqError::Execution(
                "hash join probed before its build side ended".to_string(),
            ));
        };
        let key = batch.column(self.right_key);
        let rows = self
            .converter
            .convert_columns(&[key.clone()])
            .map_err(|e| PfqError::Execution(format!("hash join key encoding failed: {e}")))?;
        let mut build_idx = Vec::new();
        let mut probe_idx = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if !key.is_valid(i) {
                continue;
            }
            if let Some(matches) = self.table.get(&row.owned()) {
                for m in matches {
                    build_idx.push(*m);
                    probe_idx.push(i as u32);
                }
            }
        }
        if build_idx.is_empty() {
            return Ok(None);
        }
        let build_idx = UInt32Array::from(build_idx);
        let probe_idx = UInt32Array::from(probe_idx);
        let mut columns = Vec::<ArrayRef>::with_capacity(self.schema.fields().len());
        for column in build.columns() {
            columns.push(take_column(column, &build_idx)?);
        }
        for i in &self.right_columns {
            columns.push(take_column(batch.column(*i), &probe_idx)?);
        }
        RecordBatch::try_new(self.schema.clone(), columns)
            .map(Some)
            .map_err(|e| PfqError::Execution(format!("hash join output failed: {e}")))
    }
}

fn take_column(column: &ArrayRef, indices: &UInt32Array) -> Result<ArrayRef> {
    take(column.as_ref(), indices, None)
        .map_err(|e| PfqError::Execution(format!("hash join take failed: {e}")))
}

impl Executor for HashJoinExecutor {
    fn name(&self) -> &str {
        "HashInnerJoin"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.build_batches.clear();
        self.build = None;
        self.table.clear();
        self.output.clear();
        Ok(())
    }
}

impl StatefulBinaryExecutor for HashJoinExecutor {
    fn need_consume_left(&self) -> bool {
        !self.left_ended
    }

    fn need_consume_right(&self) -> bool {
        self.left_ended && !self.right_ended && self.output.is_empty()
    }

    fn consume_left(&mut self, batch: Batch) -> Result<()> {
        self.build_batches.push(batch);
        Ok(())
    }

    fn consume_right(&mut self, batch: Batch) -> Result<()> {
        if let Some(out) = self.probe(batch.record_batch())? {
            drop(batch);
            self.output.push_back(self.ctx.batch(out)?);
        }
        Ok(())
    }

    fn consume_left_end(&mut self) -> Result<()> {
        self.left_ended = true;
        self.build_table()
    }

    fn consume_right_end(&mut self) -> Result<()> {
        self.right_ended = true;
        self.build = None;
        self.table.clear();
        Ok(())
    }

    fn can_produce(&self) -> bool {
        !self.output.is_empty()
    }

    fn produce(&mut self) -> Result<Batch> {
        self.output.pop_front().ok_or(PfqError::StreamExhausted)
    }
}
