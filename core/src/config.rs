// conveyor/src/config.rs

//! Run configuration handed to [`Pipeline::new`](crate::Pipeline::new).
//!
//! The engine never looks up configuration on its own; whoever builds the
//! pipeline decides where these values come from (`from_env`, a deserialized
//! file, or code).

use crate::error::{ConveyorError, ConveyorResult};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Read and write checkpoints so an interrupted run can pick up where it stopped.
  pub resumable: bool,
  /// Treat the whole tree as debugging: no checkpoint is read or written.
  pub debug: bool,
  /// Root directory of batch snapshots.
  pub checkpoint_root: PathBuf,
  /// Root directory of stage side data.
  pub shared_root: PathBuf,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      resumable: false,
      debug: false,
      checkpoint_root: PathBuf::from(".conveyor/checkpoints"),
      shared_root: PathBuf::from(".conveyor/shared"),
    }
  }
}

impl RunConfig {
  /// Resumable configuration rooted at `dir` (`dir/checkpoints`, `dir/shared`).
  pub fn resumable_in(dir: impl Into<PathBuf>) -> Self {
    let dir = dir.into();
    Self {
      resumable: true,
      debug: false,
      checkpoint_root: dir.join("checkpoints"),
      shared_root: dir.join("shared"),
    }
  }

  pub fn with_resumable(mut self, resumable: bool) -> Self {
    self.resumable = resumable;
    self
  }

  pub fn with_debug(mut self, debug: bool) -> Self {
    self.debug = debug;
    self
  }

  pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.checkpoint_root = root.into();
    self
  }

  pub fn with_shared_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.shared_root = root.into();
    self
  }

  /// Loads `CONVEYOR_RESUMABLE`, `CONVEYOR_DEBUG`, `CONVEYOR_CHECKPOINT_ROOT`
  /// and `CONVEYOR_SHARED_ROOT`, after reading a `.env` file if one exists.
  /// Unset variables keep their defaults.
  pub fn from_env() -> ConveyorResult<Self> {
    dotenvy::dotenv().ok();

    let defaults = Self::default();
    let get_env = |var_name: &str| env::var(var_name).ok().filter(|v| !v.trim().is_empty());
    let get_flag = |var_name: &str, default: bool| -> ConveyorResult<bool> {
      match get_env(var_name) {
        Some(raw) => parse_flag(&raw)
          .ok_or_else(|| ConveyorError::Config(format!("Invalid {} value: '{}'", var_name, raw))),
        None => Ok(default),
      }
    };

    let config = Self {
      resumable: get_flag("CONVEYOR_RESUMABLE", defaults.resumable)?,
      debug: get_flag("CONVEYOR_DEBUG", defaults.debug)?,
      checkpoint_root: get_env("CONVEYOR_CHECKPOINT_ROOT")
        .map(PathBuf::from)
        .unwrap_or(defaults.checkpoint_root),
      shared_root: get_env("CONVEYOR_SHARED_ROOT")
        .map(PathBuf::from)
        .unwrap_or(defaults.shared_root),
    };
    config.validate()?;

    tracing::info!(resumable = config.resumable, debug = config.debug, "Run configuration loaded.");
    Ok(config)
  }

  /// Rejects configurations the engine cannot honor.
  pub fn validate(&self) -> ConveyorResult<()> {
    if self.resumable {
      if self.checkpoint_root.as_os_str().is_empty() {
        return Err(ConveyorError::Config("checkpoint_root must be set in resumable mode".to_string()));
      }
      if self.shared_root.as_os_str().is_empty() {
        return Err(ConveyorError::Config("shared_root must be set in resumable mode".to_string()));
      }
    }
    Ok(())
  }
}

fn parse_flag(raw: &str) -> Option<bool> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_flag_accepts_common_spellings() {
    assert_eq!(parse_flag("TRUE"), Some(true));
    assert_eq!(parse_flag(" off "), Some(false));
    assert_eq!(parse_flag("maybe"), None);
  }

  #[test]
  fn deserializes_partial_config_onto_defaults() {
    let config: RunConfig = serde_json::from_str(r#"{"resumable": true, "checkpoint_root": "/tmp/ck"}"#).unwrap();
    assert!(config.resumable);
    assert!(!config.debug);
    assert_eq!(config.checkpoint_root, PathBuf::from("/tmp/ck"));
    assert_eq!(config.shared_root, RunConfig::default().shared_root);
  }

  #[test]
  fn resumable_mode_requires_roots() {
    let config = RunConfig::default().with_resumable(true).with_checkpoint_root("");
    assert!(matches!(config.validate(), Err(ConveyorError::Config(_))));
  }
}
