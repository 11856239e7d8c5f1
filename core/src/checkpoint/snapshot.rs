// conveyor/src/checkpoint/snapshot.rs

//! On-disk snapshot format.
//!
//! A snapshot is a JSON document holding the batch as it left one stage of a
//! composite, plus the keys it was written under so a misplaced or outdated
//! file is never mistaken for a valid checkpoint. Readers reject any `version`
//! other than [`SNAPSHOT_VERSION`].

use crate::core::carrier::Carrier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Snapshot {
  pub version: u32,
  pub tree_fingerprint: String,
  pub position: usize,
  pub stage: String,
  /// Content hash of the batch that entered the composite.
  pub input_hash: String,
  pub carriers: Vec<Carrier>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
  version: u32,
  tree_fingerprint: &'a str,
  position: usize,
  stage: &'a str,
  input_hash: &'a str,
  carriers: &'a [Carrier],
}

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("malformed snapshot: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("unsupported snapshot version {found} (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },
}

/// Where a snapshot belongs: which composite, which child, which input.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotKey<'a> {
  pub tree_fingerprint: &'a str,
  pub position: usize,
  pub stage: &'a str,
  pub input_hash: &'a str,
}

impl Snapshot {
  pub fn encode(key: SnapshotKey<'_>, carriers: &[Carrier]) -> Result<Vec<u8>, SnapshotError> {
    let doc = SnapshotRef {
      version: SNAPSHOT_VERSION,
      tree_fingerprint: key.tree_fingerprint,
      position: key.position,
      stage: key.stage,
      input_hash: key.input_hash,
      carriers,
    };
    Ok(serde_json::to_vec(&doc)?)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
    #[derive(Deserialize)]
    struct VersionProbe {
      version: u32,
    }

    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.version != SNAPSHOT_VERSION {
      return Err(SnapshotError::UnsupportedVersion {
        found: probe.version,
        expected: SNAPSHOT_VERSION,
      });
    }
    Ok(serde_json::from_slice(bytes)?)
  }

  /// True if this snapshot was written under exactly `key`.
  pub fn matches(&self, key: SnapshotKey<'_>) -> bool {
    self.tree_fingerprint == key.tree_fingerprint
      && self.position == key.position
      && self.stage == key.stage
      && self.input_hash == key.input_hash
  }
}
