// conveyor/src/pipeline/definition.rs

//! Contains the `Pipeline` struct: a validated stage tree bound to the
//! configuration it runs under.

use crate::checkpoint::{composite_fingerprints, CheckpointStore};
use crate::config::RunConfig;
use crate::core::carrier::Carrier;
use crate::core::node::StageNode;
use crate::error::{ConveyorError, ConveyorResult};
use crate::validation::{check_dependencies, DependencyReport};
use tracing::{event, instrument, Level};

/// A stage tree ready to run.
///
/// Construction checks the configuration and that the tree has at least one
/// stage; data-kind compatibility was already enforced while the tree was
/// built. Dependency constraints are checked by every [`Pipeline::run`].
#[derive(Debug)]
pub struct Pipeline {
  root: StageNode,
  config: RunConfig,
}

/// What a run produced, and which leaf stages it executed or skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
  pub carriers: Vec<Carrier>,
  /// Leaf stages that ran, in completion order.
  pub executed: Vec<String>,
  /// Leaf stages skipped because a checkpoint covered them.
  pub reused: Vec<String>,
}

impl RunOutcome {
  pub fn was_executed(&self, stage: &str) -> bool {
    self.executed.iter().any(|s| s == stage)
  }

  pub fn was_reused(&self, stage: &str) -> bool {
    self.reused.iter().any(|s| s == stage)
  }

  pub fn valid_carriers(&self) -> impl Iterator<Item = &Carrier> {
    self.carriers.iter().filter(|c| c.is_valid())
  }
}

impl Pipeline {
  /// Checkpoints are kept per composite, so a bare leaf root is wrapped in a
  /// serial composite of the same name.
  pub fn new(root: StageNode, config: RunConfig) -> ConveyorResult<Self> {
    config.validate()?;
    if root.input_kind().is_none() {
      return Err(ConveyorError::EmptyComposite {
        composite: root.name().to_string(),
      });
    }
    let root = match root {
      StageNode::Leaf(_) => {
        event!(Level::DEBUG, stage = %root.name(), "Wrapping bare stage in a serial root.");
        StageNode::serial(root.name()).then(root)?
      }
      composite => composite,
    };
    event!(Level::DEBUG, root = %root.name(), stages = root.leaves().len(), "Pipeline created.");
    Ok(Self { root, config })
  }

  pub fn root(&self) -> &StageNode {
    &self.root
  }

  pub fn config(&self) -> &RunConfig {
    &self.config
  }

  /// Checks every stage's ordering constraints without running anything.
  pub fn check_dependencies(&self) -> DependencyReport {
    check_dependencies(&self.root)
  }

  /// Deletes checkpoint directories that belong to no composite of this tree,
  /// e.g. after stages were reconfigured. Returns how many were removed.
  #[instrument(name = "Pipeline::prune_checkpoints", skip(self), err(Display))]
  pub fn prune_checkpoints(&self) -> ConveyorResult<usize> {
    let store = CheckpointStore::new(&self.config.checkpoint_root);
    store.prune_except(&composite_fingerprints(&self.root))
  }
}
