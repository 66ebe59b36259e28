//! Modules: the code an execution unit loads
//!
//! A module is an explicit mapping from operation name to function. Every
//! unit loads its own instance and answers dispatch frames through
//! [`Module::handle_frame`].

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::core::errors::{PoolError, Result};
use crate::protocol::{DispatchMessage, ReplyMessage};

/// Type-erased operation body
pub type OperationFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// A set of named operations
#[derive(Clone)]
pub struct Module {
    operations: BTreeMap<String, OperationFn>,
}

impl Module {
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::new()
    }

    /// Operation names, sorted
    pub fn names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Invoke one operation, turning panics into errors
    pub fn call(&self, name: &str, input: Value) -> anyhow::Result<Value> {
        let op = self
            .operations
            .get(name)
            .ok_or_else(|| anyhow!("unknown operation '{}'", name))?;

        match catch_unwind(AssertUnwindSafe(|| op(input))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow!("operation '{}' panicked: {}", name, message))
            }
        }
    }

    /// Answer one dispatch frame with a reply frame
    ///
    /// A frame that is not a dispatch message has no index to answer, so the
    /// reply carries only an `error` and the pool treats it as a protocol
    /// violation.
    pub fn handle_frame(&self, frame: Value) -> Value {
        let msg: DispatchMessage = match serde_json::from_value(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed dispatch frame");
                return json!({ "error": format!("malformed dispatch frame: {}", e) });
            }
        };

        let reply = match self.call(&msg.operation, msg.input) {
            Ok(output) => ReplyMessage::Done {
                output,
                index: msg.index,
            },
            Err(e) => ReplyMessage::Failed {
                error: format!("{:#}", e),
                index: msg.index,
            },
        };
        serde_json::to_value(&reply).unwrap_or_else(|e| {
            json!({ "error": format!("unserializable reply: {}", e), "index": msg.index })
        })
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("operations", &self.names())
            .finish()
    }
}

/// Builder for Module
pub struct ModuleBuilder {
    operations: Vec<(String, OperationFn)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Register an operation over raw JSON values
    pub fn operation<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.operations.push((name.into(), Arc::new(f)));
        self
    }

    /// Register an operation over serde types
    pub fn typed<I, O, F>(self, name: impl Into<String>, f: F) -> Self
    where
        I: DeserializeOwned,
        O: Serialize,
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        self.operation(name, move |input| {
            let input: I = serde_json::from_value(input)
                .with_context(|| format!("invalid input for '{}'", label))?;
            let output = f(input)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    /// Validate names and build the module
    pub fn build(self) -> Result<Module> {
        let mut operations = BTreeMap::new();
        for (name, op) in self.operations {
            if name.trim().is_empty() {
                return Err(PoolError::configuration_field(
                    "operation names cannot be empty",
                    "operations",
                ));
            }
            if operations.insert(name.clone(), op).is_some() {
                return Err(PoolError::configuration_field(
                    format!("operation '{}' registered twice", name),
                    "operations",
                ));
            }
        }
        if operations.is_empty() {
            return Err(PoolError::configuration_field(
                "a module needs at least one operation",
                "operations",
            ));
        }
        Ok(Module { operations })
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math() -> Module {
        Module::builder()
            .typed("square", |x: i64| Ok(x * x))
            .operation("echo", Ok)
            .typed("checked_div", |(a, b): (i64, i64)| {
                if b == 0 {
                    anyhow::bail!("division by zero");
                }
                Ok(a / b)
            })
            .typed("explode", |_: Value| -> anyhow::Result<Value> { panic!("kaboom") })
            .build()
            .unwrap()
    }

    #[test]
    fn test_names_are_sorted() {
        assert_eq!(
            math().names(),
            vec!["checked_div", "echo", "explode", "square"]
        );
    }

    #[test]
    fn test_call() {
        let module = math();
        assert_eq!(module.call("square", json!(7)).unwrap(), json!(49));
        assert_eq!(module.call("echo", json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert!(module.call("missing", json!(1)).is_err());

        let err = module.call("checked_div", json!([1, 0])).unwrap_err();
        assert!(err.to_string().contains("division by zero"));

        let err = module.call("square", json!("seven")).unwrap_err();
        assert!(err.to_string().contains("invalid input for 'square'"));
    }

    #[test]
    fn test_panics_become_errors() {
        let err = math().call("explode", json!(null)).unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_handle_frame() {
        let module = math();
        let reply = module
            .handle_frame(json!({"operation": "square", "input": 4, "index": 3}));
        assert_eq!(reply, json!({"output": 16, "index": 3}));

        let reply = module
            .handle_frame(json!({"operation": "checked_div", "input": [4, 0], "index": 1}));
        assert_eq!(reply["index"], json!(1));
        assert!(reply["error"].as_str().unwrap().contains("division by zero"));

        let reply = module.handle_frame(json!("ready"));
        assert!(reply["error"].as_str().unwrap().contains("malformed"));
        assert!(reply.get("index").is_none());
    }

    #[test]
    fn test_builder_validation() {
        assert!(Module::builder().build().is_err());
        assert!(Module::builder().operation("", Ok).build().is_err());
        assert!(Module::builder()
            .operation("echo", Ok)
            .operation("echo", Ok)
            .build()
            .is_err());
    }
}
