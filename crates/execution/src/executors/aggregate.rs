//! Whole-input aggregation with running accumulators.
//!
//! Each consumed batch is folded into the accumulators and released at once, so
//! the executor never buffers input. A single row is produced after the end
//! signal; over empty input `COUNT` is 0 and every other aggregate is null.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::compute::kernels::cast::cast;
use arrow::compute::{max, min, sum, sum_checked};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::AggExpr;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::executor::{Executor, StatefulUnaryExecutor, UnaryExecutorFactory};
use crate::expressions::{PhysicalExpr, compile_expr};

#[derive(Debug, Clone)]
pub struct AggregateFactory {
    aggs: Vec<(AggExpr, String)>,
}

impl AggregateFactory {
    pub fn new(aggs: Vec<(AggExpr, String)>) -> Self {
        Self { aggs }
    }
}

impl UnaryExecutorFactory for AggregateFactory {
    fn name(&self) -> &str {
        "Aggregate"
    }

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulUnaryExecutor>> {
        if self.aggs.is_empty() {
            return Err(PfqError::InvalidArgument(
                "Aggregate needs at least one aggregate expression".to_string(),
            ));
        }
        let mut accumulators = Vec::with_capacity(self.aggs.len());
        let mut fields = Vec::with_capacity(self.aggs.len());
        for (agg, alias) in &self.aggs {
            let input = compile_expr(agg.input(), &input_schema, &ctx.udfs)?;
            let kind = numeric_kind(agg, &input.data_type())?;
            let acc = Accumulator::new(agg, kind);
            fields.push(Field::new(alias, acc.output_type(), true));
            accumulators.push((input, acc));
        }
        Ok(Box::new(AggregateExecutor {
            ctx: ctx.clone(),
            schema: Arc::new(Schema::new(fields)),
            accumulators,
            ended: false,
            produced: false,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumericKind {
    Int,
    Float,
}

fn numeric_kind(agg: &AggExpr, dt: &DataType) -> Result<NumericKind> {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => Ok(NumericKind::Int),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => Ok(NumericKind::Float),
        // COUNT only looks at validity
        _ if matches!(agg, AggExpr::Count(_)) => Ok(NumericKind::Int),
        other => Err(PfqError::InvalidArgument(format!(
            "{} over unsupported type {other}",
            agg.name()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone)]
struct Accumulator {
    func: Func,
    kind: NumericKind,
    count: i64,
    int: Option<i64>,
    float: Option<f64>,
}

impl Accumulator {
    fn new(agg: &AggExpr, kind: NumericKind) -> Self {
        let func = match agg {
            AggExpr::Count(_) => Func::Count,
            AggExpr::Sum(_) => Func::Sum,
            AggExpr::Min(_) => Func::Min,
            AggExpr::Max(_) => Func::Max,
            AggExpr::Avg(_) => Func::Avg,
        };
        Self {
            func,
            kind,
            count: 0,
            int: None,
            float: None,
        }
    }

    fn output_type(&self) -> DataType {
        match (self.func, self.kind) {
            (Func::Count, _) => DataType::Int64,
            (Func::Avg, _) | (_, NumericKind::Float) => DataType::Float64,
            (_, NumericKind::Int) => DataType::Int64,
        }
    }

    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        self.count += (values.len() - values.null_count()) as i64;
        if self.func == Func::Count {
            return Ok(());
        }
        match (self.func, self.kind) {
            (Func::Avg, _) | (_, NumericKind::Float) => {
                let values = as_f64(values)?;
                let part = match self.func {
                    Func::Min => min(&values),
                    Func::Max => max(&values),
                    _ => sum(&values),
                };
                self.float = combine(self.func, self.float, part, |a, b| Ok(a + b))?;
            }
            (_, NumericKind::Int) => {
                let values = as_i64(values)?;
                let part = match self.func {
                    Func::Min => min(&values),
                    Func::Max => max(&values),
                    _ => sum_checked(&values)
                        .map_err(|e| PfqError::Execution(format!("SUM overflow: {e}")))?,
                };
                self.int = combine(self.func, self.int, part, |a, b| {
                    a.checked_add(b)
                        .ok_or_else(|| PfqError::Execution("SUM overflow".to_string()))
                })?;
            }
        }
        Ok(())
    }

    fn finish(&self) -> ArrayRef {
        match self.func {
            Func::Count => Arc::new(Int64Array::from(vec![self.count])),
            Func::Avg => {
                let avg = self
                    .float
                    .filter(|_| self.count > 0)
                    .map(|s| s / self.count as f64);
                Arc::new(Float64Array::from(vec![avg]))
            }
            _ => match self.kind {
                NumericKind::Int => Arc::new(Int64Array::from(vec![self.int])),
                NumericKind::Float => Arc::new(Float64Array::from(vec![self.float])),
            },
        }
    }
}

fn combine<T: PartialOrd + Copy>(
    func: Func,
    acc: Option<T>,
    part: Option<T>,
    add: impl FnOnce(T, T) -> Result<T>,
) -> Result<Option<T>> {
    Ok(match (acc, part) {
        (None, p) => p,
        (a, None) => a,
        (Some(a), Some(p)) => Some(match func {
            Func::Min => {
                if p < a {
                    p
                } else {
                    a
                }
            }
            Func::Max => {
                if p > a {
                    p
                } else {
                    a
                }
            }
            _ => add(a, p)?,
        }),
    })
}

fn as_i64(values: &ArrayRef) -> Result<Int64Array> {
    let arr = cast(values, &DataType::Int64)
        .map_err(|e| PfqError::Execution(format!("aggregate cast failed: {e}")))?;
    arr.as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| PfqError::Execution("aggregate expected int64 input".to_string()))
}

fn as_f64(values: &ArrayRef) -> Result<Float64Array> {
    let arr = cast(values, &DataType::Float64)
        .map_err(|e| PfqError::Execution(format!("aggregate cast failed: {e}")))?;
    arr.as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| PfqError::Execution("aggregate expected float64 input".to_string()))
}

struct AggregateExecutor {
    ctx: ExecutorContext,
    schema: SchemaRef,
    accumulators: Vec<(Arc<dyn PhysicalExpr>, Accumulator)>,
    ended: bool,
    produced: bool,
}

impl Executor for AggregateExecutor {
    fn name(&self) -> &str {
        "Aggregate"
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl StatefulUnaryExecutor for AggregateExecutor {
    fn need_consume(&self) -> bool {
        !self.ended
    }

    fn consume(&mut self, batch: Batch) -> Result<()> {
        for (input, acc) in &mut self.accumulators {
            let values = input.evaluate(batch.record_batch())?;
            acc.update(&values)?;
        }
        Ok(())
    }

    fn consume_end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }

    fn can_produce(&self) -> bool {
        self.ended && !self.produced
    }

    fn produce(&mut self) -> Result<Batch> {
        if !self.can_produce() {
            return Err(PfqError::StreamExhausted);
        }
        self.produced = true;
        let columns = self
            .accumulators
            .iter()
            .map(|(_, acc)| acc.finish())
            .collect::<Vec<_>>();
        let out = RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| PfqError::Execution(format!("aggregate output failed: {e}")))?;
        self.ctx.batch(out)
    }
}
