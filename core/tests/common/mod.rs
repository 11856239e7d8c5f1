// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use conveyor::{Carrier, DataKind, SharedState, SideData, Stage, StageDescriptor, StageNode};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tracing::Level;

pub const TEXT: DataKind = DataKind::named("text");
pub const TOKENS: DataKind = DataKind::named("tokens");

// --- Common Stage Used Across Tests ---

/// Test stage that records every call, tags carriers with its name and can be
/// told to fail on or invalidate a given carrier.
pub struct RecordingStage {
  descriptor: StageDescriptor,
  parameters: String,
  calls: Arc<AtomicUsize>,
  appends_data: bool,
  fail_on: Option<String>,
  invalidate: Option<String>,
  property: Option<(String, serde_json::Value)>,
  seen: Option<SharedState<Vec<String>>>,
}

impl RecordingStage {
  pub fn new(name: &str) -> Self {
    Self::with_kinds(name, TEXT, TEXT)
  }

  pub fn with_kinds(name: &str, input: DataKind, output: DataKind) -> Self {
    Self::from_descriptor(StageDescriptor::new(name, input, output))
  }

  pub fn from_descriptor(descriptor: StageDescriptor) -> Self {
    Self {
      descriptor,
      parameters: String::new(),
      calls: Arc::new(AtomicUsize::new(0)),
      appends_data: true,
      fail_on: None,
      invalidate: None,
      property: None,
      seen: None,
    }
  }

  pub fn with_parameters(mut self, parameters: &str) -> Self {
    self.parameters = parameters.to_string();
    self
  }

  /// Leaves `data` alone; only properties are written.
  pub fn properties_only(mut self) -> Self {
    self.appends_data = false;
    self
  }

  pub fn failing_on(mut self, carrier: &str) -> Self {
    self.fail_on = Some(carrier.to_string());
    self
  }

  pub fn invalidating(mut self, carrier: &str) -> Self {
    self.invalidate = Some(carrier.to_string());
    self
  }

  /// Writes `key = value` instead of the default `<stage name> = "done"`.
  pub fn setting(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
    self.property = Some((key.to_string(), value.into()));
    self
  }

  /// Records the names of processed carriers into `seen`, which is also the
  /// stage's side data.
  pub fn remembering(mut self, seen: SharedState<Vec<String>>) -> Self {
    self.seen = Some(seen);
    self
  }

  pub fn calls(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.calls)
  }

  pub fn node(self) -> StageNode {
    StageNode::leaf(self)
  }
}

#[async_trait]
impl Stage for RecordingStage {
  fn descriptor(&self) -> &StageDescriptor {
    &self.descriptor
  }

  fn parameters(&self) -> String {
    self.parameters.clone()
  }

  fn side_data(&self) -> Option<&dyn SideData> {
    self.seen.as_ref().map(|s| s as &dyn SideData)
  }

  async fn process(&self, mut carrier: Carrier) -> anyhow::Result<Carrier> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let name = self.descriptor.name.as_str();
    if self.fail_on.as_deref() == Some(carrier.name()) {
      tracing::warn!(target: "test_stages", stage = %name, carrier = %carrier.name(), "failing on purpose");
      anyhow::bail!("{} cannot handle {}", name, carrier.name());
    }
    if self.invalidate.as_deref() == Some(carrier.name()) {
      carrier.invalidate();
      return Ok(carrier);
    }
    match &self.property {
      Some((key, value)) => carrier.set_property(key.clone(), value.clone()),
      None => carrier.set_property(name, "done"),
    }
    if self.appends_data {
      let data = format!("{}>{}", carrier.data().as_str().unwrap_or_default(), name);
      carrier.set_data(data);
    }
    if let Some(seen) = &self.seen {
      seen.write().push(carrier.name().to_string());
    }
    tracing::debug!(target: "test_stages", stage = %name, carrier = %carrier.name(), "processed");
    Ok(carrier)
  }
}

/// Builds a serial root from `(stage)` nodes, panicking on incompatible kinds.
pub fn serial_of(name: &str, children: Vec<StageNode>) -> StageNode {
  children
    .into_iter()
    .fold(StageNode::serial(name), |node, child| node.then(child).unwrap())
}

pub fn parallel_of(name: &str, children: Vec<StageNode>) -> StageNode {
  children
    .into_iter()
    .fold(StageNode::parallel(name), |node, child| node.then(child).unwrap())
}

/// One carrier per name, payload starting empty.
pub fn batch(names: &[&str]) -> Vec<Carrier> {
  names.iter().map(|n| Carrier::new(*n, "")).collect()
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
  counter.load(Ordering::SeqCst)
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
