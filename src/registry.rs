//! Registry of the operations a pool exposes
//!
//! Built once from the runtime's declared operations when the pool is
//! created; names never change afterward.

use std::collections::BTreeSet;

use crate::core::errors::{PoolError, Result};

#[derive(Clone, Debug, Default)]
pub struct OperationRegistry {
    names: BTreeSet<String>,
}

impl OperationRegistry {
    /// Validate and register operation names
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(PoolError::configuration_field(
                    "operation names cannot be empty",
                    "operations",
                ));
            }
            if !registry.names.insert(name.clone()) {
                return Err(PoolError::configuration_field(
                    format!("operation '{}' declared twice", name),
                    "operations",
                ));
            }
        }
        if registry.names.is_empty() {
            return Err(PoolError::configuration_field(
                "the module exports no operations",
                "operations",
            ));
        }
        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Fail with `UnknownOperation` unless `name` is registered
    pub fn ensure(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(PoolError::UnknownOperation {
                operation: name.to_string(),
            })
        }
    }

    /// List all registered operation names, sorted
    pub fn list(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
