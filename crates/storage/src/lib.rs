//! Storage side of pfq: providers serving fragment scans, the source task body
//! that reads through them, and a single-process fragment directory.

pub mod catalog;
pub mod memory_provider;
pub mod provider;
pub mod scan;

pub use catalog::{CatalogFile, InMemoryMetadata, StorageUnitDef};
pub use memory_provider::InMemoryProvider;
pub use provider::{ProviderRegistry, Stats, StorageProvider};
pub use scan::FragmentScanSource;
