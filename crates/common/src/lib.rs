//! Shared configuration, error types, IDs, and observability primitives for pfq crates.
//!
//! Architecture role:
//! - defines engine configuration passed across layers
//! - provides common [`PfqError`] / [`Result`] contracts
//! - hosts the metrics registry and batch memory accounting
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`memory`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod metrics;

pub use config::{EngineConfig, PathOrderingKind};
pub use error::{PfqError, Result};
pub use ids::*;
pub use memory::{MemoryPool, MemoryReservation};
pub use metrics::MetricsRegistry;
