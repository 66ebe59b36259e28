//! Reassembles outputs in input order, however units complete

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::{PoolError, Result};
use crate::pool::{OperationHandle, Pool};

/// Buffer that places each output at its original index
#[derive(Debug)]
pub struct ResultCollector {
    slots: Vec<Option<Value>>,
    filled: usize,
}

impl ResultCollector {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            filled: 0,
        }
    }

    /// Store `output` for `index`; usable directly as a `run` callback body
    pub fn record(&mut self, output: Value, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.replace(output).is_none() {
                self.filled += 1;
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// The outputs in input order
    pub fn finish(self) -> Result<Vec<Value>> {
        if !self.is_complete() {
            let missing = self.slots.iter().position(Option::is_none).unwrap_or(0);
            return Err(PoolError::internal(format!(
                "no output for index {} of {}",
                missing,
                self.slots.len()
            )));
        }
        Ok(self.slots.into_iter().flatten().collect())
    }
}

impl Pool {
    /// Run `operation` over `inputs` and return the outputs in input order
    pub async fn map(&self, operation: &str, inputs: Vec<Value>) -> Result<Vec<Value>> {
        let mut collector = ResultCollector::new(inputs.len());
        self.run(operation, inputs, |output, index| {
            collector.record(output, index)
        })
        .await?;
        collector.finish()
    }

    /// [`Pool::map`] over serde types
    pub async fn map_as<I, O>(&self, operation: &str, inputs: &[I]) -> Result<Vec<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let inputs = inputs
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let outputs = self.map(operation, inputs).await?;
        outputs
            .into_iter()
            .map(|output| serde_json::from_value(output).map_err(PoolError::from))
            .collect()
    }
}

impl OperationHandle<'_> {
    pub async fn map(&self, inputs: Vec<Value>) -> Result<Vec<Value>> {
        self.pool.map(&self.name, inputs).await
    }

    pub async fn map_as<I, O>(&self, inputs: &[I]) -> Result<Vec<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.pool.map_as(&self.name, inputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_out_of_order_records() {
        let mut collector = ResultCollector::new(3);
        collector.record(json!("c"), 2);
        collector.record(json!("a"), 0);
        assert!(!collector.is_complete());
        collector.record(json!("b"), 1);
        assert!(collector.is_complete());

        assert_eq!(
            collector.finish().unwrap(),
            vec![json!("a"), json!("b"), json!("c")]
        );
    }

    #[test]
    fn test_missing_slot_is_an_error() {
        let mut collector = ResultCollector::new(2);
        collector.record(json!(1), 0);
        collector.record(json!(1), 0);
        collector.record(json!(9), 5);
        assert!(!collector.is_complete());
        let err = collector.finish().unwrap_err();
        assert!(err.to_string().contains("no output for index 1 of 2"));
    }

    #[test]
    fn test_empty_collector() {
        let collector = ResultCollector::new(0);
        assert!(collector.is_complete());
        assert!(collector.finish().unwrap().is_empty());
    }
}
