// conveyor/src/checkpoint/store.rs

//! File-system checkpoint store.
//!
//! Layout under the checkpoint root:
//!
//! ```text
//! <root>/<fingerprint>/<position>_<stage>.snapshot
//! <root>/<fingerprint>/<fingerprint>.hash
//! ```
//!
//! Every file is written to a temporary name and renamed into place. Reads
//! never fail the run: a missing, unreadable or mismatched file is logged and
//! reported as "no checkpoint". Write failures are fatal.

use crate::checkpoint::snapshot::{Snapshot, SnapshotKey};
use crate::core::carrier::Carrier;
use crate::error::{ConveyorError, ConveyorResult};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{event, Level};

const SNAPSHOT_EXTENSION: &str = "snapshot";
const HASH_EXTENSION: &str = "hash";

#[derive(Debug, Clone)]
pub struct CheckpointStore {
  root: PathBuf,
}

impl CheckpointStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Creates the root directory; failure means checkpoints cannot be made durable.
  pub fn open(root: impl Into<PathBuf>) -> ConveyorResult<Self> {
    let store = Self::new(root);
    create_dir(&store.root)?;
    Ok(store)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn directory(&self, fingerprint: &str) -> PathBuf {
    self.root.join(fingerprint)
  }

  pub fn snapshot_path(&self, fingerprint: &str, position: usize, stage: &str) -> PathBuf {
    self
      .directory(fingerprint)
      .join(format!("{}_{}.{}", position, file_component(stage), SNAPSHOT_EXTENSION))
  }

  pub fn hash_path(&self, fingerprint: &str) -> PathBuf {
    self
      .directory(fingerprint)
      .join(format!("{}.{}", fingerprint, HASH_EXTENSION))
  }

  pub fn exists(&self, fingerprint: &str) -> bool {
    self.directory(fingerprint).is_dir()
  }

  /// Content hash of the batch that produced the snapshots under `fingerprint`.
  pub fn read_hash(&self, fingerprint: &str) -> Option<String> {
    let path = self.hash_path(fingerprint);
    match std::fs::read_to_string(&path) {
      Ok(contents) => {
        let hash = contents.trim();
        if hash.is_empty() {
          event!(Level::WARN, path = %path.display(), "Checkpoint hash file is empty.");
          None
        } else {
          Some(hash.to_string())
        }
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => None,
      Err(e) => {
        event!(Level::WARN, path = %path.display(), error = %e, "Checkpoint hash file unreadable.");
        None
      }
    }
  }

  pub fn write_hash(&self, fingerprint: &str, hash: &str) -> ConveyorResult<()> {
    create_dir(&self.directory(fingerprint))?;
    write_atomic(&self.hash_path(fingerprint), hash.as_bytes())
  }

  /// Loads the snapshot stored for `key`, if there is a usable one.
  pub fn load(&self, key: SnapshotKey<'_>) -> Option<Snapshot> {
    let path = self.snapshot_path(key.tree_fingerprint, key.position, key.stage);
    let bytes = match std::fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        event!(Level::WARN, path = %path.display(), error = %e, "Snapshot unreadable, ignoring it.");
        return None;
      }
    };

    match Snapshot::decode(&bytes) {
      Ok(snapshot) if snapshot.matches(key) => Some(snapshot),
      Ok(_) => {
        event!(Level::WARN, path = %path.display(), "Snapshot was written for a different stage or batch, ignoring it.");
        None
      }
      Err(e) => {
        event!(Level::WARN, path = %path.display(), error = %e, "Snapshot corrupt, ignoring it.");
        None
      }
    }
  }

  pub fn save(&self, key: SnapshotKey<'_>, carriers: &[Carrier]) -> ConveyorResult<()> {
    let path = self.snapshot_path(key.tree_fingerprint, key.position, key.stage);
    let bytes = Snapshot::encode(key, carriers)
      .map_err(|e| ConveyorError::Internal(format!("failed to encode snapshot for '{}': {}", key.stage, e)))?;
    create_dir(&self.directory(key.tree_fingerprint))?;
    write_atomic(&path, &bytes)?;
    event!(Level::DEBUG, path = %path.display(), carriers = carriers.len(), "Snapshot written.");
    Ok(())
  }

  /// Removes a single snapshot if present.
  pub fn remove_snapshot(&self, fingerprint: &str, position: usize, stage: &str) -> ConveyorResult<()> {
    let path = self.snapshot_path(fingerprint, position, stage);
    match std::fs::remove_file(&path) {
      Ok(()) => {
        event!(Level::TRACE, path = %path.display(), "Snapshot removed.");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(ConveyorError::CheckpointIo { path, source }),
    }
  }

  /// Drops every checkpoint of one composite.
  pub fn purge(&self, fingerprint: &str) -> ConveyorResult<()> {
    let dir = self.directory(fingerprint);
    match std::fs::remove_dir_all(&dir) {
      Ok(()) => {
        event!(Level::INFO, dir = %dir.display(), "Checkpoints purged.");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(ConveyorError::CheckpointIo { path: dir, source }),
    }
  }

  /// Deletes every file under `fingerprint` except `keep`. Best effort: a file
  /// that cannot be removed is logged and left behind. Returns the number removed.
  pub fn retain(&self, fingerprint: &str, keep: &[PathBuf]) -> usize {
    let dir = self.directory(fingerprint);
    let keep: HashSet<&Path> = keep.iter().map(PathBuf::as_path).collect();
    let entries = match std::fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
      let path = entry.path();
      if keep.contains(path.as_path()) || !path.is_file() {
        continue;
      }
      match std::fs::remove_file(&path) {
        Ok(()) => removed += 1,
        Err(e) => event!(Level::WARN, path = %path.display(), error = %e, "Could not remove stale checkpoint file."),
      }
    }
    if removed > 0 {
      event!(Level::DEBUG, dir = %dir.display(), removed, "Stale checkpoint files removed.");
    }
    removed
  }

  /// Removes checkpoint directories whose fingerprint is not in `live`.
  pub fn prune_except(&self, live: &[String]) -> ConveyorResult<usize> {
    let entries = match std::fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
      Err(source) => {
        return Err(ConveyorError::CheckpointIo {
          path: self.root.clone(),
          source,
        })
      }
    };

    let mut pruned = 0;
    for entry in entries.flatten() {
      let path = entry.path();
      let is_live = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |name| live.iter().any(|fp| fp == name));
      if !path.is_dir() || is_live {
        continue;
      }
      std::fs::remove_dir_all(&path).map_err(|source| ConveyorError::CheckpointIo {
        path: path.clone(),
        source,
      })?;
      pruned += 1;
    }
    event!(Level::INFO, root = %self.root.display(), pruned, "Checkpoint root pruned.");
    Ok(pruned)
  }
}

/// Directory holding side data of `stage` under `shared_root`.
pub fn side_data_dir(shared_root: &Path, stage: &str) -> PathBuf {
  shared_root.join(file_component(stage))
}

/// Maps a stage name onto something safe to use in a file name.
pub fn file_component(name: &str) -> String {
  let cleaned: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
    .collect();
  if cleaned.is_empty() {
    "_".to_string()
  } else {
    cleaned
  }
}

pub(crate) fn create_dir(dir: &Path) -> ConveyorResult<()> {
  std::fs::create_dir_all(dir).map_err(|source| ConveyorError::CheckpointIo {
    path: dir.to_path_buf(),
    source,
  })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> ConveyorResult<()> {
  let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint");
  let temp_path = path.with_file_name(format!("{}.tmp", file_name));
  let io_err = |source: io::Error| ConveyorError::CheckpointIo {
    path: path.to_path_buf(),
    source,
  };
  std::fs::write(&temp_path, bytes).map_err(io_err)?;
  std::fs::rename(&temp_path, path).map_err(io_err)
}
