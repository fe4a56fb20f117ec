//! Scalar UDF registry and runtime interface.
//!
//! A registry is owned by the engine and threaded to executors through their
//! context, so two engines in one process never see each other's functions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arrow::array::ArrayRef;
use arrow_schema::DataType;
use pfq_common::Result;

/// Runtime scalar UDF contract.
pub trait ScalarUdf: Send + Sync {
    /// Stable function name; lookups are case-insensitive.
    fn name(&self) -> &str;
    /// Return type inference from argument types.
    fn return_type(&self, arg_types: &[DataType]) -> Result<DataType>;
    /// Batch-wise invocation with Arrow arrays.
    fn invoke(&self, args: &[ArrayRef]) -> Result<ArrayRef>;
}

#[derive(Default)]
pub struct UdfRegistry {
    inner: RwLock<HashMap<String, Arc<dyn ScalarUdf>>>,
}

impl std::fmt::Debug for UdfRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdfRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl UdfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a scalar UDF.
    ///
    /// Returns `true` when an existing UDF with same name was replaced.
    pub fn register(&self, udf: Arc<dyn ScalarUdf>) -> bool {
        self.inner
            .write()
            .expect("udf registry lock poisoned")
            .insert(udf.name().to_ascii_lowercase(), udf)
            .is_some()
    }

    /// Returns `true` when an existing UDF was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.inner
            .write()
            .expect("udf registry lock poisoned")
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ScalarUdf>> {
        self.inner
            .read()
            .expect("udf registry lock poisoned")
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .read()
            .expect("udf registry lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
