// conveyor/src/checkpoint/resume.rs

//! Decides where a resumable composite starts.

use crate::checkpoint::snapshot::{Snapshot, SnapshotKey};
use crate::checkpoint::store::CheckpointStore;
use crate::core::node::StageNode;
use crate::error::ConveyorResult;
use tracing::{event, instrument, Level};

/// Where to start a composite and, when resuming, the batch to start with.
#[derive(Debug)]
pub struct ResumePlan {
  /// Index of the first child to execute; equals the child count when all are done.
  pub start: usize,
  /// Snapshot written after child `start - 1`.
  pub snapshot: Option<Snapshot>,
}

impl ResumePlan {
  pub fn from_scratch() -> Self {
    Self {
      start: 0,
      snapshot: None,
    }
  }
}

/// Outcome of comparing the stored batch hash with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashCheck {
  /// Nothing recorded for this composite.
  Absent,
  /// The recorded hash belongs to another batch; checkpoints were purged.
  Mismatch,
  Match,
}

/// Compares the recorded batch hash with `input_hash`, purging the composite's
/// checkpoints when they were produced by a different batch.
pub fn verify_batch(store: &CheckpointStore, fingerprint: &str, input_hash: &str) -> ConveyorResult<HashCheck> {
  if !store.exists(fingerprint) {
    return Ok(HashCheck::Absent);
  }
  match store.read_hash(fingerprint) {
    None => {
      event!(Level::WARN, %fingerprint, "Checkpoint directory has no usable hash file; starting from scratch.");
      Ok(HashCheck::Absent)
    }
    Some(recorded) if recorded == input_hash => Ok(HashCheck::Match),
    Some(recorded) => {
      event!(Level::INFO, %fingerprint, %recorded, current = %input_hash, "Input batch changed since the last run; discarding checkpoints.");
      store.purge(fingerprint)?;
      Ok(HashCheck::Mismatch)
    }
  }
}

/// Plans a serial composite: resume right after the most advanced usable
/// snapshot among the first `limit` children.
///
/// `limit` is the index of the first child that contains a debugging node;
/// nothing at or past it may be skipped.
#[instrument(name = "resume::plan_serial", skip(store, children), fields(num_children = children.len()))]
pub fn plan_serial(
  store: &CheckpointStore,
  fingerprint: &str,
  children: &[StageNode],
  input_hash: &str,
  limit: usize,
) -> ConveyorResult<ResumePlan> {
  if verify_batch(store, fingerprint, input_hash)? != HashCheck::Match {
    return Ok(ResumePlan::from_scratch());
  }

  for position in (0..limit.min(children.len())).rev() {
    let key = SnapshotKey {
      tree_fingerprint: fingerprint,
      position,
      stage: children[position].name(),
      input_hash,
    };
    if let Some(snapshot) = store.load(key) {
      event!(Level::INFO, stage = %key.stage, position, "Resuming after checkpoint.");
      return Ok(ResumePlan {
        start: position + 1,
        snapshot: Some(snapshot),
      });
    }
  }

  event!(Level::DEBUG, "No usable checkpoint; starting from the first stage.");
  Ok(ResumePlan::from_scratch())
}
