//! Executor contracts.
//!
//! Stateless executors map one batch to one batch and are chained into pipelines.
//! Stateful (sink) executors buffer across batches and expose separate "wants more
//! input" and "has output ready" signals; the wrapping stream drives them with a
//! fetch-and-consume loop (see [`crate::sink`]).
//!
//! Executors are created by factories, once per task run, from the input schema(s).

use arrow_schema::SchemaRef;
use pfq_common::Result;

use crate::batch::Batch;
use crate::context::ExecutorContext;
use crate::stream::SendableBatchStream;

/// Common part of every executor.
pub trait Executor: Send {
    fn name(&self) -> &str;

    /// Output column layout, fixed at initialization.
    fn output_schema(&self) -> SchemaRef;

    /// Release buffered batches. Must be idempotent and must not fail because of an
    /// earlier compute failure.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Row-local transform without cross-batch state.
pub trait StatelessExecutor: Executor {
    /// Map one input batch to exactly one (possibly empty) output batch.
    fn compute(&mut self, batch: Batch) -> Result<Batch>;

    /// Stop pulling upstream even though it may have more data.
    fn is_empty(&self) -> bool {
        false
    }
}

pub trait StatefulUnaryExecutor: Executor {
    fn need_consume(&self) -> bool;

    fn consume(&mut self, batch: Batch) -> Result<()>;

    /// Upstream is exhausted; finalize.
    fn consume_end(&mut self) -> Result<()>;

    fn can_produce(&self) -> bool;

    /// Emit one ready batch; only valid after `can_produce()` returned true.
    fn produce(&mut self) -> Result<Batch>;
}

pub trait StatefulBinaryExecutor: Executor {
    fn need_consume_left(&self) -> bool;

    fn need_consume_right(&self) -> bool;

    fn consume_left(&mut self, batch: Batch) -> Result<()>;

    fn consume_right(&mut self, batch: Batch) -> Result<()>;

    fn consume_left_end(&mut self) -> Result<()>;

    fn consume_right_end(&mut self) -> Result<()>;

    fn can_produce(&self) -> bool;

    fn produce(&mut self) -> Result<Batch>;
}

/// Factory contract for stateless executors.
pub trait StatelessExecutorFactory: Send + Sync {
    /// Stable operator name used in logs, metrics and explain output.
    fn name(&self) -> &str;

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatelessExecutor>>;
}

pub trait UnaryExecutorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        input_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulUnaryExecutor>>;
}

pub trait BinaryExecutorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(
        &self,
        ctx: &ExecutorContext,
        left_schema: SchemaRef,
        right_schema: SchemaRef,
    ) -> Result<Box<dyn StatefulBinaryExecutor>>;
}

/// Opens the stream a source task emits, e.g. a fragment scan on a storage unit.
pub trait SourceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, ctx: &ExecutorContext) -> Result<SendableBatchStream>;
}
