//! Embedded entry point of pfq.
//!
//! [`Engine`] wires configuration, the metadata directory, storage providers and
//! the [`NaivePhysicalOptimizer`] around one task scheduler; [`DataFrame`] builds
//! operator trees against it.

mod logging;
mod session;

pub mod dataframe;
pub mod engine;
pub mod optimizer;

pub use dataframe::DataFrame;
pub use engine::{Engine, EngineBuilder};
pub use logging::init_tracing;
pub use optimizer::NaivePhysicalOptimizer;
pub use pfq_execution::{ResultHandle, ScalarUdf};
pub use pfq_planner::{
    AggExpr, BinaryOp, Expr, LiteralValue, SortKey, binary, col, lit_i64, lit_str, udf,
};
