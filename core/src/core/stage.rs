// conveyor/src/core/stage.rs

//! Defines the `Stage` trait implemented by concrete transformations, and
//! `FnStage`, a stage built from an async closure.

use crate::core::carrier::Carrier;
use crate::core::descriptor::StageDescriptor;
use crate::core::shared::SideData;
use crate::error::{ConveyorError, ConveyorResult};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{event, Level};

/// A unit of transformation.
///
/// Implementations transform one carrier at a time through [`Stage::process`].
/// The engine never passes an invalid carrier to `process`; stages that work on
/// the whole batch at once override [`Stage::process_all`] and must then leave
/// invalid carriers untouched themselves, returning a batch of the same length
/// and order.
#[async_trait]
pub trait Stage: Send + Sync {
  fn descriptor(&self) -> &StageDescriptor;

  /// Stage-type identifier, used by dependency checks and checkpoint paths.
  fn name(&self) -> &str {
    &self.descriptor().name
  }

  /// Parameters that change what this stage produces. They are part of the
  /// structure fingerprint, so changing them invalidates checkpoints.
  fn parameters(&self) -> String {
    String::new()
  }

  /// External state this stage needs back after a resumed run.
  fn side_data(&self) -> Option<&dyn SideData> {
    None
  }

  async fn process(&self, carrier: Carrier) -> anyhow::Result<Carrier>;

  async fn process_all(&self, batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
    let mut processed = Vec::with_capacity(batch.len());
    for carrier in batch {
      if !carrier.is_valid() {
        processed.push(carrier);
        continue;
      }
      let carrier_name = carrier.name().to_string();
      match self.process(carrier).await {
        Ok(out) => processed.push(out),
        Err(e) => {
          event!(Level::ERROR, stage = %self.name(), carrier = %carrier_name, error = %e, "Stage failed on carrier.");
          return Err(ConveyorError::stage_failure(self.name(), Some(carrier_name), e));
        }
      }
    }
    Ok(processed)
  }
}

/// Type alias for the boxed async closure behind an [`FnStage`].
pub type StageHandler =
  Box<dyn Fn(Carrier) -> Pin<Box<dyn Future<Output = anyhow::Result<Carrier>> + Send>> + Send + Sync>;

/// A stage whose per-carrier work is an async closure.
pub struct FnStage {
  descriptor: StageDescriptor,
  parameters: String,
  handler: StageHandler,
  side_data: Option<Arc<dyn SideData>>,
}

impl FnStage {
  pub fn new<F, Fut>(descriptor: StageDescriptor, handler_fn: F) -> Self
  where
    F: Fn(Carrier) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Carrier>> + Send + 'static,
  {
    let handler: StageHandler = Box::new(move |carrier| Box::pin(handler_fn(carrier)));
    Self {
      descriptor,
      parameters: String::new(),
      handler,
      side_data: None,
    }
  }

  pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
    self.parameters = parameters.into();
    self
  }

  pub fn with_side_data(mut self, side_data: Arc<dyn SideData>) -> Self {
    self.side_data = Some(side_data);
    self
  }
}

impl std::fmt::Debug for FnStage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FnStage")
      .field("descriptor", &self.descriptor)
      .field("parameters", &self.parameters)
      .field("side_data_present", &self.side_data.is_some())
      .finish()
  }
}

#[async_trait]
impl Stage for FnStage {
  fn descriptor(&self) -> &StageDescriptor {
    &self.descriptor
  }

  fn parameters(&self) -> String {
    self.parameters.clone()
  }

  fn side_data(&self) -> Option<&dyn SideData> {
    self.side_data.as_deref()
  }

  async fn process(&self, carrier: Carrier) -> anyhow::Result<Carrier> {
    (self.handler)(carrier).await
  }
}
