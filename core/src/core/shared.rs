// conveyor/src/core/shared.rs

//! Side data: state a stage keeps outside its carriers (an accumulating
//! dictionary, a vocabulary) that must survive a resumed run.

use anyhow::Context;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Persistence contract for stage side data.
///
/// `persist` runs right after the owning stage completed and its batch snapshot
/// is written. `restore` runs when the stage is skipped because a checkpoint at
/// or after it was reused. Each stage gets its own directory, which exists when
/// either method is called.
///
/// Before any stage of a skipped range is restored, `can_restore` is asked for
/// every one of them; only if all agree does restoring start.
pub trait SideData: Send + Sync {
  fn persist(&self, dir: &Path) -> anyhow::Result<()>;

  fn restore(&self, dir: &Path) -> anyhow::Result<()>;

  /// Whether `dir` holds what `restore` needs. Must not modify the state.
  fn can_restore(&self, dir: &Path) -> bool {
    dir.is_dir()
  }
}

const STATE_FILE: &str = "state.json";

/// Shared, lock-protected state that can serve as a stage's side data.
///
/// Clones share the same underlying value, so a stage and the code that built
/// the pipeline can both hold one.
///
/// IMPORTANT: lock guards are blocking and MUST NOT be held across `.await`
/// points.
#[derive(Debug)]
pub struct SharedState<T: Send + Sync + 'static>(Arc<RwLock<T>>);

impl<T: Send + Sync + 'static> SharedState<T> {
  pub fn new(data: T) -> Self {
    SharedState(Arc::new(RwLock::new(data)))
  }

  pub fn read(&self) -> RwLockReadGuard<'_, T> {
    self.0.read()
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, T> {
    self.0.write()
  }

  pub fn map_read<F, U: ?Sized>(&self, f: F) -> MappedRwLockReadGuard<'_, U>
  where
    F: FnOnce(&T) -> &U,
  {
    RwLockReadGuard::map(self.read(), f)
  }

  pub fn map_write<F, U: ?Sized>(&self, f: F) -> MappedRwLockWriteGuard<'_, U>
  where
    F: FnOnce(&mut T) -> &mut U,
  {
    RwLockWriteGuard::map(self.write(), f)
  }
}

impl<T: Send + Sync + 'static> Clone for SharedState<T> {
  fn clone(&self) -> Self {
    SharedState(Arc::clone(&self.0))
  }
}

impl<T: Send + Sync + 'static + Default> Default for SharedState<T> {
  fn default() -> Self {
    Self::new(Default::default())
  }
}

impl<T> SideData for SharedState<T>
where
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  fn persist(&self, dir: &Path) -> anyhow::Result<()> {
    let bytes = {
      let guard = self.read();
      serde_json::to_vec(&*guard).context("Failed to serialize shared state")?
    };
    let final_path = dir.join(STATE_FILE);
    let temp_path = final_path.with_extension("tmp");
    std::fs::write(&temp_path, bytes).with_context(|| format!("Failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, &final_path)
      .with_context(|| format!("Failed to rename {} into place", temp_path.display()))?;
    Ok(())
  }

  fn restore(&self, dir: &Path) -> anyhow::Result<()> {
    let path = dir.join(STATE_FILE);
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: T = serde_json::from_slice(&bytes).context("Failed to deserialize shared state")?;
    *self.write() = value;
    Ok(())
  }

  fn can_restore(&self, dir: &Path) -> bool {
    dir.join(STATE_FILE).is_file()
  }
}
