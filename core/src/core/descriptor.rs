// conveyor/src/core/descriptor.rs

//! Static description of a stage: its type identifier, the data kinds it
//! consumes and produces, its ordering constraints and its capability tags.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Token naming the kind of payload a stage consumes or produces.
///
/// Kinds are compared by name only, when stages are composed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataKind(Cow<'static, str>);

impl DataKind {
  pub const fn named(name: &'static str) -> Self {
    DataKind(Cow::Borrowed(name))
  }

  pub fn new(name: impl Into<String>) -> Self {
    DataKind(Cow::Owned(name.into()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for DataKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// What a stage does to a carrier, for tooling that needs to find stages by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
  /// Attaches properties (features) to carriers.
  ComputesProperties,
  /// Assigns the carrier's target value.
  AssignsTarget,
  /// Terminal sink; consumes carriers for output.
  Sink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
  pub name: String,
  pub input: DataKind,
  pub output: DataKind,
  /// Stage types that must execute somewhere before this stage.
  pub always_before: Vec<String>,
  /// Stage types that must not execute after this stage.
  pub not_after: Vec<String>,
  pub capabilities: Vec<Capability>,
}

impl StageDescriptor {
  pub fn new(name: impl Into<String>, input: DataKind, output: DataKind) -> Self {
    Self {
      name: name.into(),
      input,
      output,
      always_before: Vec::new(),
      not_after: Vec::new(),
      capabilities: Vec::new(),
    }
  }

  pub fn always_before<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.always_before.extend(deps.into_iter().map(Into::into));
    self
  }

  pub fn not_after<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.not_after.extend(deps.into_iter().map(Into::into));
    self
  }

  pub fn capability(mut self, capability: Capability) -> Self {
    if !self.capabilities.contains(&capability) {
      self.capabilities.push(capability);
    }
    self
  }

  pub fn has_capability(&self, capability: Capability) -> bool {
    self.capabilities.contains(&capability)
  }
}
