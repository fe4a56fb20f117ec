//! Accounted record batches.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use pfq_common::{MemoryPool, MemoryReservation, PfqError, Result};

/// A bounded chunk of rows moving between executors and tasks.
///
/// The batch owns a reservation on the engine [`MemoryPool`]; dropping the batch
/// releases it, so a batch is released exactly once whatever path it takes.
#[derive(Debug)]
pub struct Batch {
    data: RecordBatch,
    reservation: Option<MemoryReservation>,
}

impl Batch {
    /// Wrap `data`, reserving its in-memory size from `pool`.
    pub fn try_new(data: RecordBatch, pool: &Arc<MemoryPool>) -> Result<Self> {
        let reservation = pool.reserve(data.get_array_memory_size())?;
        Ok(Self {
            data,
            reservation: Some(reservation),
        })
    }

    /// Wrap `data` without accounting it anywhere.
    pub fn unaccounted(data: RecordBatch) -> Self {
        Self {
            data,
            reservation: None,
        }
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.data
    }

    pub fn schema(&self) -> SchemaRef {
        self.data.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    /// Bytes held against the pool for this batch.
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.as_ref().map_or(0, MemoryReservation::size)
    }

    /// Same rows under an equivalent schema; the reservation moves along.
    pub fn with_schema(self, schema: SchemaRef) -> Result<Self> {
        let data = RecordBatch::try_new(schema, self.data.columns().to_vec())
            .map_err(|e| PfqError::Execution(format!("re-wrapping batch: {e}")))?;
        Ok(Self {
            data,
            reservation: self.reservation,
        })
    }

    /// Hand the rows out of the engine; the reservation is released here.
    pub fn into_record_batch(self) -> RecordBatch {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    fn rows(n: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from_iter_values(0..n))])
            .expect("batch")
    }

    #[test]
    fn reservation_follows_batch_lifetime() {
        let pool = MemoryPool::unbounded();
        let batch = Batch::try_new(rows(128), &pool).expect("reserve");
        assert_eq!(pool.live_reservations(), 1);
        assert_eq!(pool.in_use_bytes(), batch.reserved_bytes());
        let rb = batch.into_record_batch();
        assert_eq!(rb.num_rows(), 128);
        assert_eq!(pool.live_reservations(), 0);
        assert_eq!(pool.in_use_bytes(), 0);
    }

    #[test]
    fn over_budget_batch_is_rejected() {
        let pool = MemoryPool::new(8);
        let err = Batch::try_new(rows(1024), &pool).expect_err("over budget");
        assert!(err.to_string().contains("memory budget exceeded"));
        assert_eq!(pool.live_reservations(), 0);
    }
}
