// conveyor/src/error.rs
use crate::validation::DependencyReport;
use anyhow::Error as AnyhowError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConveyorError {
  #[error("Stage '{stage}' cannot join composite '{composite}': expects input '{found}', composite provides '{expected}'")]
  IncompatibleStage {
    composite: String,
    stage: String,
    expected: String,
    found: String,
  },

  #[error("Composite '{composite}' has no stages")]
  EmptyComposite { composite: String },

  #[error("Stage dependencies not satisfied: {0}")]
  DependencyViolation(DependencyReport),

  #[error("Stage '{stage}' failed{}. Source: {source}", carrier_suffix(.carrier))]
  StageFailure {
    stage: String,
    carrier: Option<String>,
    #[source]
    source: AnyhowError,
  },

  #[error("Stage '{stage}' returned {actual} carriers for a batch of {expected}")]
  BatchShape {
    stage: String,
    expected: usize,
    actual: usize,
  },

  #[error("Checkpoint storage at '{}' is not writable. Source: {source}", .path.display())]
  CheckpointIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Side data for stage '{stage}' could not be {action}. Source: {source}")]
  SideData {
    stage: String,
    action: &'static str,
    #[source]
    source: AnyhowError,
  },

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Internal conveyor error: {0}")]
  Internal(String),
}

fn carrier_suffix(carrier: &Option<String>) -> String {
  match carrier {
    Some(name) => format!(" on carrier '{}'", name),
    None => String::new(),
  }
}

impl ConveyorError {
  pub fn stage_failure(stage: impl Into<String>, carrier: Option<String>, source: AnyhowError) -> Self {
    ConveyorError::StageFailure {
      stage: stage.into(),
      carrier,
      source,
    }
  }

  /// True for errors raised before any carrier is processed.
  pub fn is_configuration_error(&self) -> bool {
    matches!(
      self,
      ConveyorError::IncompatibleStage { .. }
        | ConveyorError::EmptyComposite { .. }
        | ConveyorError::DependencyViolation(_)
        | ConveyorError::Config(_)
    )
  }
}

// Errors coming out of stage code arrive as anyhow::Error. A ConveyorError that
// was bubbled through anyhow is unwrapped instead of being nested again.
impl From<AnyhowError> for ConveyorError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<ConveyorError>() {
      Ok(conveyor_err) => conveyor_err,
      Err(other) => ConveyorError::Internal(format!("{:#}", other)),
    }
  }
}

pub type ConveyorResult<T, E = ConveyorError> = std::result::Result<T, E>;
