// conveyor/src/core/carrier.rs

//! Defines the `Carrier`, the record that flows through a stage tree.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered property bag attached to a carrier.
///
/// Insertion order is preserved; exporters rely on it to lay out columns in the
/// order the properties were computed.
pub type Properties = IndexMap<String, Value>;

/// A single mutable record flowing through the pipeline.
///
/// Carriers are created once per input unit, mutated in place by each stage and
/// never removed from their batch. A carrier marked invalid stays in the batch
/// (so batch positions remain stable) but is skipped by every later stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
  name: String,
  data: Value,
  #[serde(default)]
  target: Option<Value>,
  #[serde(default)]
  source: Option<String>,
  #[serde(default)]
  properties: Properties,
  valid: bool,
}

impl Carrier {
  /// Creates a valid carrier with the given identity and initial payload.
  pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Self {
    Self {
      name: name.into(),
      data: data.into(),
      target: None,
      source: None,
      properties: Properties::new(),
      valid: true,
    }
  }

  pub fn with_source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn with_target(mut self, target: impl Into<Value>) -> Self {
    self.target = Some(target.into());
    self
  }

  /// Identity string of this carrier. Content hashes of a batch are computed over it.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn set_name(&mut self, name: impl Into<String>) {
    self.name = name.into();
  }

  pub fn data(&self) -> &Value {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut Value {
    &mut self.data
  }

  pub fn set_data(&mut self, data: impl Into<Value>) {
    self.data = data.into();
  }

  pub fn target(&self) -> Option<&Value> {
    self.target.as_ref()
  }

  pub fn set_target(&mut self, target: impl Into<Value>) {
    self.target = Some(target.into());
  }

  pub fn source(&self) -> Option<&str> {
    self.source.as_deref()
  }

  pub fn set_source(&mut self, source: impl Into<String>) {
    self.source = Some(source.into());
  }

  pub fn property(&self, key: &str) -> Option<&Value> {
    self.properties.get(key)
  }

  pub fn has_property(&self, key: &str) -> bool {
    self.properties.contains_key(key)
  }

  /// Sets a property. Overwriting keeps the key at its original position.
  pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.properties.insert(key.into(), value.into());
  }

  pub fn properties(&self) -> &Properties {
    &self.properties
  }

  /// Marks this carrier invalid. There is no way back.
  pub fn invalidate(&mut self) {
    self.valid = false;
  }

  pub fn is_valid(&self) -> bool {
    self.valid
  }

  /// Independent copy handed to a parallel side branch.
  pub fn replicate(&self) -> Self {
    self.clone()
  }
}
