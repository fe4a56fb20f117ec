//! Expression compilation and evaluation for executors.
//!
//! Output contract: each evaluation returns an `ArrayRef` aligned to the input
//! batch row count.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow::compute::kernels::{
    boolean::{and_kleene, not, or_kleene},
    cast::cast,
    cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
    numeric::{add, div, mul, sub},
};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use pfq_common::{PfqError, Result};
use pfq_planner::{BinaryOp, Expr, LiteralValue};

use crate::udf::{ScalarUdf, UdfRegistry};

/// Executable expression.
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate the expression for every row in `batch`.
    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

/// Compile a planner expression against `input_schema`.
pub fn compile_expr(
    expr: &Expr,
    input_schema: &SchemaRef,
    udfs: &UdfRegistry,
) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        Expr::Column(name) => {
            let (index, field) = input_schema.column_with_name(name).ok_or_else(|| {
                PfqError::InvalidArgument(format!("unknown column in expression: {name}"))
            })?;
            Ok(Arc::new(ColumnExpr {
                index,
                dt: field.data_type().clone(),
            }))
        }

        Expr::Literal(v) => Ok(Arc::new(LiteralExpr {
            v: v.clone(),
            dt: literal_type(v),
        })),

        Expr::Cast { expr, to_type } => {
            let inner = compile_expr(expr, input_schema, udfs)?;
            Ok(Arc::new(CastExpr {
                inner,
                to_type: to_type.clone(),
            }))
        }

        Expr::Not(e) => {
            let inner = compile_expr(e, input_schema, udfs)?;
            Ok(Arc::new(NotExpr { inner }))
        }

        Expr::And(a, b) | Expr::Or(a, b) => {
            let left = compile_expr(a, input_schema, udfs)?;
            let right = compile_expr(b, input_schema, udfs)?;
            let op = if matches!(expr, Expr::And(..)) {
                BoolOp::And
            } else {
                BoolOp::Or
            };
            Ok(Arc::new(BoolBinaryExpr { left, right, op }))
        }

        Expr::BinaryOp { left, op, right } => {
            let l = compile_expr(left, input_schema, udfs)?;
            let r = compile_expr(right, input_schema, udfs)?;
            let out = binary_out_type(*op, l.data_type(), r.data_type())?;
            Ok(Arc::new(BinaryExpr {
                left: l,
                right: r,
                op: *op,
                out,
            }))
        }

        Expr::ScalarUdf { name, args } => {
            let compiled_args = args
                .iter()
                .map(|a| compile_expr(a, input_schema, udfs))
                .collect::<Result<Vec<_>>>()?;
            let udf = udfs.get(name).ok_or_else(|| {
                PfqError::InvalidArgument(format!("scalar udf '{name}' is not registered"))
            })?;
            let out = udf.return_type(
                &compiled_args
                    .iter()
                    .map(|arg| arg.data_type())
                    .collect::<Vec<_>>(),
            )?;
            Ok(Arc::new(ScalarUdfExpr {
                udf_name: name.clone(),
                udf,
                args: compiled_args,
                out,
            }))
        }
    }
}

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        Ok(batch.column(self.index).clone())
    }
}

struct LiteralExpr {
    v: LiteralValue,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        scalar_to_array(&self.v, batch.num_rows())
    }
}

struct CastExpr {
    inner: Arc<dyn PhysicalExpr>,
    to_type: DataType,
}

impl PhysicalExpr for CastExpr {
    fn data_type(&self) -> DataType {
        self.to_type.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        cast(&arr, &self.to_type).map_err(|e| PfqError::Execution(format!("cast failed: {e}")))
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arr = self.inner.evaluate(batch)?;
        let b = downcast::<BooleanArray>(&arr, "NOT expects boolean")?;
        let out = not(b).map_err(|e| PfqError::Execution(format!("not failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

#[derive(Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;
        let lb = downcast::<BooleanArray>(&l, "AND/OR expects boolean")?;
        let rb = downcast::<BooleanArray>(&r, "AND/OR expects boolean")?;
        let out = match self.op {
            BoolOp::And => and_kleene(lb, rb),
            BoolOp::Or => or_kleene(lb, rb),
        }
        .map_err(|e| PfqError::Execution(format!("boolean kernel failed: {e}")))?;
        Ok(Arc::new(out))
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let l = self.left.evaluate(batch)?;
        let r = self.right.evaluate(batch)?;
        match self.op {
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
                eval_arith(self.op, &l, &r, &self.out)
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => eval_cmp(self.op, &l, &r),
        }
    }
}

struct ScalarUdfExpr {
    udf_name: String,
    udf: Arc<dyn ScalarUdf>,
    args: Vec<Arc<dyn PhysicalExpr>>,
    out: DataType,
}

impl PhysicalExpr for ScalarUdfExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let arrays = self
            .args
            .iter()
            .map(|arg| arg.evaluate(batch))
            .collect::<Result<Vec<_>>>()?;
        self.udf.invoke(&arrays).map_err(|e| {
            PfqError::Execution(format!("scalar udf '{}' failed: {e}", self.udf_name))
        })
    }
}

// ------------------ helpers ------------------

fn downcast<'a, T: 'static>(arr: &'a ArrayRef, msg: &str) -> Result<&'a T> {
    arr.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PfqError::Execution(msg.to_string()))
}

fn literal_type(v: &LiteralValue) -> DataType {
    match v {
        LiteralValue::Int64(_) => DataType::Int64,
        LiteralValue::Float64(_) => DataType::Float64,
        LiteralValue::Utf8(_) => DataType::Utf8,
        LiteralValue::Boolean(_) => DataType::Boolean,
        LiteralValue::Null => DataType::Null,
    }
}

fn scalar_to_array(v: &LiteralValue, len: usize) -> Result<ArrayRef> {
    match v {
        LiteralValue::Int64(x) => {
            let mut b = Int64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Float64(x) => {
            let mut b = Float64Builder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Boolean(x) => {
            let mut b = BooleanBuilder::with_capacity(len);
            for _ in 0..len {
                b.append_value(*x);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Utf8(s) => {
            let mut b = StringBuilder::with_capacity(len, s.len() * len);
            for _ in 0..len {
                b.append_value(s);
            }
            Ok(Arc::new(b.finish()))
        }
        LiteralValue::Null => Ok(arrow::array::new_null_array(&DataType::Null, len)),
    }
}

fn binary_out_type(op: BinaryOp, l: DataType, r: DataType) -> Result<DataType> {
    match op {
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => Ok(DataType::Boolean),

        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
            if l != r {
                return Err(PfqError::InvalidArgument(format!(
                    "arithmetic needs matching operand types (insert a cast); got {l:?} vs {r:?}"
                )));
            }
            Ok(l)
        }
    }
}

fn eval_arith(op: BinaryOp, l: &ArrayRef, r: &ArrayRef, out: &DataType) -> Result<ArrayRef> {
    let res = match out {
        DataType::Int64 => {
            let la = downcast::<Int64Array>(l, "expected Int64 array")?;
            let ra = downcast::<Int64Array>(r, "expected Int64 array")?;
            match op {
                BinaryOp::Plus => add(la, ra),
                BinaryOp::Minus => sub(la, ra),
                BinaryOp::Multiply => mul(la, ra),
                _ => div(la, ra),
            }
        }
        DataType::Float64 => {
            let la = downcast::<Float64Array>(l, "expected Float64 array")?;
            let ra = downcast::<Float64Array>(r, "expected Float64 array")?;
            match op {
                BinaryOp::Plus => add(la, ra),
                BinaryOp::Minus => sub(la, ra),
                BinaryOp::Multiply => mul(la, ra),
                _ => div(la, ra),
            }
        }
        _ => {
            return Err(PfqError::Unsupported(format!(
                "arithmetic not supported for type {out:?}"
            )));
        }
    };
    res.map_err(|e| PfqError::Execution(format!("arith kernel failed: {e}")))
}

macro_rules! compare {
    ($ty:ty, $op:expr, $l:expr, $r:expr) => {{
        let la = downcast::<$ty>($l, "comparison operands differ in type")?;
        let ra = downcast::<$ty>($r, "comparison operands differ in type")?;
        match $op {
            BinaryOp::Eq => eq(la, ra),
            BinaryOp::NotEq => neq(la, ra),
            BinaryOp::Lt => lt(la, ra),
            BinaryOp::LtEq => lt_eq(la, ra),
            BinaryOp::Gt => gt(la, ra),
            _ => gt_eq(la, ra),
        }
    }};
}

fn eval_cmp(op: BinaryOp, l: &ArrayRef, r: &ArrayRef) -> Result<ArrayRef> {
    let res = match l.data_type() {
        DataType::Int64 => compare!(Int64Array, op, l, r),
        DataType::Float64 => compare!(Float64Array, op, l, r),
        DataType::Utf8 => compare!(StringArray, op, l, r),
        DataType::Boolean => {
            if !matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
                return Err(PfqError::Unsupported(
                    "ordering comparisons not supported for boolean".to_string(),
                ));
            }
            compare!(BooleanArray, op, l, r)
        }
        other => {
            return Err(PfqError::Unsupported(format!(
                "comparison not supported for {other:?}"
            )));
        }
    };
    let out = res.map_err(|e| PfqError::Execution(format!("cmp kernel failed: {e}")))?;
    Ok(Arc::new(out))
}
