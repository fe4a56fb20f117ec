//! Built-in executors and their factories.
//!
//! Stateless: [`FilterFactory`], [`ProjectFactory`] (project and reorder),
//! [`LimitFactory`], [`AddSchemaPrefixFactory`], [`ValueToSelectedPathFactory`].
//! Stateful unary: [`AggregateFactory`], [`SortFactory`], [`DistinctFactory`].
//! Stateful binary: [`KeyJoinFactory`], [`HashJoinFactory`], [`UnionAllFactory`].

mod aggregate;
mod distinct;
mod filter;
mod hash_join;
mod key_join;
mod limit;
mod project;
mod schema_prefix;
mod selected_path;
mod sort;
mod union;

pub use aggregate::AggregateFactory;
pub use distinct::DistinctFactory;
pub use filter::FilterFactory;
pub use hash_join::HashJoinFactory;
pub use key_join::KeyJoinFactory;
pub use limit::LimitFactory;
pub use project::{ProjectFactory, ProjectOrder};
pub use schema_prefix::AddSchemaPrefixFactory;
pub use selected_path::ValueToSelectedPathFactory;
pub use sort::SortFactory;
pub use union::UnionAllFactory;
