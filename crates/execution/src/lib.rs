//! Physical execution layer: batch streams, executors and the task DAG.
//!
//! Architecture role:
//! - pull-based [`BatchStream`] protocol between tasks, with idempotent close
//! - stateless (pipeline) and stateful (sink) executor contracts and built-ins
//! - [`Task`] DAG nodes, readiness counting, one-shot results
//! - fold tasks that replan part of a query from runtime-selected paths
//! - the [`Scheduler`] that runs ready tasks on the tokio blocking pool
//!
//! Key modules:
//! - [`stream`]
//! - [`executor`]
//! - [`executors`]
//! - [`task`]
//! - [`scheduler`]

pub mod batch;
pub mod close;
pub mod context;
pub mod executor;
pub mod executors;
pub mod expressions;
pub mod optimizer;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod stream;
pub mod task;
pub mod udf;

pub use batch::Batch;
pub use close::{Close, CloseChain, close_quietly};
pub use context::{ExecutorContext, RequestContext, RequestParts};
pub use executor::{
    BinaryExecutorFactory, Executor, SourceFactory, StatefulBinaryExecutor,
    StatefulUnaryExecutor, StatelessExecutor, StatelessExecutorFactory, UnaryExecutorFactory,
};
pub use expressions::{PhysicalExpr, compile_expr};
pub use optimizer::PhysicalOptimizer;
pub use pipeline::PipelineStream;
pub use scheduler::{ResultHandle, Scheduler};
pub use sink::{BinarySinkStream, UnarySinkStream};
pub use stream::{
    BatchSender, BatchStream, ConcatStream, MemoryStream, RecordBatchStream,
    SendableBatchStream, SendableRecordBatchStream, StreamAdapter, bounded_batch_channel,
    collect_batches, empty_stream, into_record_batch_stream,
};
pub use task::{Task, TaskNode, TaskResult, TaskVisitor, explain_tasks};
pub use udf::{ScalarUdf, UdfRegistry};
