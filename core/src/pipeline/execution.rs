// conveyor/src/pipeline/execution.rs

//! Contains `Pipeline::run()` and the recursive walk that drives a batch
//! through the stage tree, reading and writing checkpoints along the way.

use crate::checkpoint::store::create_dir;
use crate::checkpoint::{
  content_hash, plan_serial, side_data_dir, tree_fingerprint, verify_batch, CheckpointStore, HashCheck, SnapshotKey,
};
use crate::core::carrier::Carrier;
use crate::core::node::{Composite, LeafNode, StageNode, TreePath};
use crate::error::{ConveyorError, ConveyorResult};
use crate::pipeline::definition::{Pipeline, RunOutcome};
use crate::pipeline::merge::{merge_branches, BranchOutput};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{event, instrument, span, Instrument, Level};

/// Names of the leaf stages a run executed and skipped.
#[derive(Debug, Default)]
pub(crate) struct RunJournal {
  executed: Mutex<Vec<String>>,
  reused: Mutex<Vec<String>>,
}

impl RunJournal {
  fn record_executed(&self, stage: &str) {
    self.executed.lock().push(stage.to_string());
  }

  fn record_reused(&self, nodes: &[StageNode]) {
    let mut reused = self.reused.lock();
    for node in nodes {
      reused.extend(node.leaf_names().into_iter().map(str::to_string));
    }
  }

  fn into_parts(self) -> (Vec<String>, Vec<String>) {
    (self.executed.into_inner(), self.reused.into_inner())
  }
}

#[derive(Debug, Clone, Copy)]
struct Checkpointing<'a> {
  store: &'a CheckpointStore,
  shared_root: &'a Path,
}

/// Everything a node needs to know about where it runs.
#[derive(Debug, Clone)]
struct ExecutionScope<'a> {
  checkpoints: Option<Checkpointing<'a>>,
  journal: &'a RunJournal,
  path: TreePath,
  /// The node itself or one of its ancestors is debugging.
  under_debug: bool,
}

impl<'a> ExecutionScope<'a> {
  fn root(journal: &'a RunJournal, checkpoints: Option<Checkpointing<'a>>, root: &StageNode, debug: bool) -> Self {
    Self {
      checkpoints,
      journal,
      path: TreePath::root(),
      under_debug: debug || root.is_debugging(),
    }
  }

  fn child(&self, idx: usize, child: &StageNode) -> Self {
    Self {
      checkpoints: self.checkpoints,
      journal: self.journal,
      path: self.path.child(idx),
      under_debug: self.under_debug || child.is_debugging(),
    }
  }

  fn active_checkpoints(&self) -> Option<Checkpointing<'a>> {
    if self.under_debug {
      None
    } else {
      self.checkpoints
    }
  }
}

impl Pipeline {
  /// Runs `batch` through the stage tree.
  ///
  /// Dependencies are checked first; if any is unsatisfied no carrier is
  /// processed. In resumable mode every composite consults and updates its
  /// checkpoints.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(
      root = %self.root().name(),
      num_carriers = batch.len(),
      resumable = self.config().resumable,
      debug = self.config().debug,
    ),
    err(Display)
  )]
  pub async fn run(&self, batch: Vec<Carrier>) -> ConveyorResult<RunOutcome> {
    let report = self.check_dependencies();
    if !report.is_satisfied() {
      event!(Level::ERROR, %report, "Stage dependencies not satisfied; refusing to run.");
      return Err(ConveyorError::DependencyViolation(report));
    }

    let config = self.config();
    let store = if config.resumable && !config.debug {
      let store = CheckpointStore::open(&config.checkpoint_root)?;
      create_dir(&config.shared_root)?;
      Some(store)
    } else {
      if config.resumable {
        event!(Level::INFO, "Debug mode: checkpoints are neither read nor written.");
      }
      None
    };
    let checkpoints = store.as_ref().map(|store| Checkpointing {
      store,
      shared_root: config.shared_root.as_path(),
    });

    event!(Level::DEBUG, "Pipeline execution starting.");
    let journal = RunJournal::default();
    let scope = ExecutionScope::root(&journal, checkpoints, self.root(), config.debug);
    let carriers = execute(self.root(), scope, batch).await?;

    let (executed, reused) = journal.into_parts();
    event!(
      Level::INFO,
      executed = executed.len(),
      reused = reused.len(),
      "Pipeline execution completed."
    );
    Ok(RunOutcome {
      carriers,
      executed,
      reused,
    })
  }
}

impl StageNode {
  /// Transforms a single carrier in memory. Checkpoints are never touched.
  pub async fn process(&self, carrier: Carrier) -> ConveyorResult<Carrier> {
    let mut processed = self.process_all(vec![carrier]).await?;
    processed
      .pop()
      .ok_or_else(|| ConveyorError::Internal(format!("'{}' returned no carrier", self.name())))
  }

  /// Transforms a whole batch in memory. Checkpoints are never touched.
  pub async fn process_all(&self, batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
    let journal = RunJournal::default();
    let scope = ExecutionScope::root(&journal, None, self, false);
    execute(self, scope, batch).await
  }
}

fn execute<'a>(node: &'a StageNode, scope: ExecutionScope<'a>, batch: Vec<Carrier>) -> BoxFuture<'a, ConveyorResult<Vec<Carrier>>> {
  let node_span = span!(
    Level::DEBUG,
    "node_execution",
    node = node.name(),
    path = %scope.path,
    under_debug = scope.under_debug
  );

  async move {
    let expected = batch.len();
    let output = match node {
      StageNode::Leaf(leaf) => run_leaf(leaf, &scope, batch).await?,
      StageNode::Serial(composite) => match scope.active_checkpoints() {
        Some(checkpoints) => run_serial_resumable(node, composite, &scope, checkpoints, batch).await?,
        None => run_serial(composite, &scope, batch).await?,
      },
      StageNode::Parallel(composite) => match scope.active_checkpoints() {
        Some(checkpoints) => run_parallel_resumable(node, composite, &scope, checkpoints, batch).await?,
        None => run_parallel(composite, &scope, batch).await?,
      },
    };

    if output.len() != expected {
      event!(Level::ERROR, expected, actual = output.len(), "Node changed the batch size.");
      return Err(ConveyorError::BatchShape {
        stage: node.name().to_string(),
        expected,
        actual: output.len(),
      });
    }
    Ok(output)
  }
  .instrument(node_span)
  .boxed()
}

async fn run_leaf(leaf: &LeafNode, scope: &ExecutionScope<'_>, batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
  let stage = leaf.stage();
  event!(Level::DEBUG, stage = %stage.name(), "Stage starting.");
  let output = stage.process_all(batch).await?;
  scope.journal.record_executed(stage.name());
  event!(Level::DEBUG, stage = %stage.name(), "Stage finished.");
  Ok(output)
}

async fn run_serial(composite: &Composite, scope: &ExecutionScope<'_>, mut batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
  for (idx, child) in composite.children().iter().enumerate() {
    batch = execute(child, scope.child(idx, child), batch).await?;
  }
  Ok(batch)
}

async fn run_parallel(composite: &Composite, scope: &ExecutionScope<'_>, batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
  let children = composite.children();
  let outputs = try_join_all(
    children
      .iter()
      .enumerate()
      .map(|(idx, child)| execute(child, scope.child(idx, child), replicate(&batch))),
  )
  .await?;

  let branches = children
    .iter()
    .zip(outputs)
    .map(|(child, carriers)| BranchOutput {
      name: child.name(),
      carriers,
    })
    .collect();
  merge_branches(composite.name(), &batch, branches)
}

async fn run_serial_resumable(
  node: &StageNode,
  composite: &Composite,
  scope: &ExecutionScope<'_>,
  checkpoints: Checkpointing<'_>,
  batch: Vec<Carrier>,
) -> ConveyorResult<Vec<Carrier>> {
  let store = checkpoints.store;
  let children = composite.children();
  let fingerprint = tree_fingerprint(&scope.path, node);
  let input_hash = content_hash(&batch);
  let limit = children
    .iter()
    .position(StageNode::contains_debugging)
    .unwrap_or(children.len());

  let plan = plan_serial(store, &fingerprint, children, &input_hash, limit)?;
  let (start, mut current) = match plan.snapshot {
    Some(snapshot) if snapshot.carriers.len() != batch.len() => {
      event!(
        Level::WARN,
        composite = %composite.name(),
        "Snapshot does not match the batch size; starting from the first stage."
      );
      (0, batch)
    }
    Some(snapshot) => match check_side_data(checkpoints, &children[..plan.start]) {
      Ok(()) => {
        restore_side_data(checkpoints, &children[..plan.start])?;
        scope.journal.record_reused(&children[..plan.start]);
        (plan.start, snapshot.carriers)
      }
      Err(e) => {
        event!(Level::WARN, composite = %composite.name(), error = %e, "Side data could not be restored; starting from the first stage.");
        (0, batch)
      }
    },
    None => (0, batch),
  };

  store.write_hash(&fingerprint, &input_hash)?;
  for (position, child) in children.iter().enumerate().skip(start) {
    store.remove_snapshot(&fingerprint, position, child.name())?;
  }

  for (position, child) in children.iter().enumerate().skip(start) {
    current = execute(child, scope.child(position, child), current).await?;
    if child.contains_debugging() {
      continue;
    }
    if let StageNode::Leaf(leaf) = child {
      persist_side_data(checkpoints, leaf)?;
    }
    let key = SnapshotKey {
      tree_fingerprint: &fingerprint,
      position,
      stage: child.name(),
      input_hash: &input_hash,
    };
    store.save(key, &current)?;
  }

  store.retain(&fingerprint, &expected_files(store, &fingerprint, children));
  Ok(current)
}

async fn run_parallel_resumable(
  node: &StageNode,
  composite: &Composite,
  scope: &ExecutionScope<'_>,
  checkpoints: Checkpointing<'_>,
  batch: Vec<Carrier>,
) -> ConveyorResult<Vec<Carrier>> {
  let store = checkpoints.store;
  let children = composite.children();
  let fingerprint = tree_fingerprint(&scope.path, node);
  let input_hash = content_hash(&batch);

  let reusable = verify_batch(store, &fingerprint, &input_hash)? == HashCheck::Match;
  store.write_hash(&fingerprint, &input_hash)?;

  let mut outputs: Vec<Option<Vec<Carrier>>> = children
    .iter()
    .enumerate()
    .map(|(position, child)| {
      if reusable && !child.contains_debugging() {
        load_branch(checkpoints, scope, &fingerprint, &input_hash, position, child, batch.len())
      } else {
        Ok(None)
      }
    })
    .collect::<ConveyorResult<_>>()?;

  let pending = children
    .iter()
    .enumerate()
    .filter(|(position, _)| outputs[*position].is_none())
    .map(|(position, child)| {
      let copy = replicate(&batch);
      let child_scope = scope.child(position, child);
      let fingerprint = fingerprint.as_str();
      let input_hash = input_hash.as_str();
      async move {
        let carriers = execute(child, child_scope, copy).await?;
        if !child.contains_debugging() {
          if let StageNode::Leaf(leaf) = child {
            persist_side_data(checkpoints, leaf)?;
          }
          let key = SnapshotKey {
            tree_fingerprint: fingerprint,
            position,
            stage: child.name(),
            input_hash,
          };
          checkpoints.store.save(key, &carriers)?;
        }
        Ok::<_, ConveyorError>((position, carriers))
      }
    });
  let finished = try_join_all(pending).await?;
  for (position, carriers) in finished {
    outputs[position] = Some(carriers);
  }

  let branches = children
    .iter()
    .zip(outputs)
    .map(|(child, carriers)| {
      let carriers = carriers
        .ok_or_else(|| ConveyorError::Internal(format!("branch '{}' produced no output", child.name())))?;
      Ok(BranchOutput {
        name: child.name(),
        carriers,
      })
    })
    .collect::<ConveyorResult<Vec<_>>>()?;
  let merged = merge_branches(composite.name(), &batch, branches)?;

  store.retain(&fingerprint, &expected_files(store, &fingerprint, children));
  Ok(merged)
}

fn load_branch(
  checkpoints: Checkpointing<'_>,
  scope: &ExecutionScope<'_>,
  fingerprint: &str,
  input_hash: &str,
  position: usize,
  child: &StageNode,
  batch_len: usize,
) -> ConveyorResult<Option<Vec<Carrier>>> {
  let key = SnapshotKey {
    tree_fingerprint: fingerprint,
    position,
    stage: child.name(),
    input_hash,
  };
  let Some(snapshot) = checkpoints.store.load(key) else {
    return Ok(None);
  };
  if snapshot.carriers.len() != batch_len {
    event!(Level::WARN, branch = %child.name(), "Branch snapshot does not match the batch size; re-running branch.");
    return Ok(None);
  }
  let branch = std::slice::from_ref(child);
  if let Err(e) = check_side_data(checkpoints, branch) {
    event!(Level::WARN, branch = %child.name(), error = %e, "Side data could not be restored; re-running branch.");
    return Ok(None);
  }
  restore_side_data(checkpoints, branch)?;
  event!(Level::INFO, branch = %child.name(), position, "Branch restored from checkpoint.");
  scope.journal.record_reused(branch);
  Ok(Some(snapshot.carriers))
}

/// Fails if any leaf under `skipped` has side data that cannot be restored.
/// Nothing is restored here, so a failure leaves every stage's state untouched.
fn check_side_data(checkpoints: Checkpointing<'_>, skipped: &[StageNode]) -> ConveyorResult<()> {
  for node in skipped {
    for (_, leaf) in node.leaves() {
      let stage = leaf.stage();
      let Some(side_data) = stage.side_data() else {
        continue;
      };
      let dir = side_data_dir(checkpoints.shared_root, stage.name());
      if !dir.is_dir() || !side_data.can_restore(&dir) {
        return Err(ConveyorError::SideData {
          stage: stage.name().to_string(),
          action: "restored",
          source: anyhow::anyhow!("no usable side data in {}", dir.display()),
        });
      }
    }
  }
  Ok(())
}

/// Restores side data of every leaf under `skipped`. Run [`check_side_data`]
/// first: an error here is fatal because earlier stages may already hold
/// restored state.
fn restore_side_data(checkpoints: Checkpointing<'_>, skipped: &[StageNode]) -> ConveyorResult<()> {
  for node in skipped {
    for (_, leaf) in node.leaves() {
      let stage = leaf.stage();
      let Some(side_data) = stage.side_data() else {
        continue;
      };
      let dir = side_data_dir(checkpoints.shared_root, stage.name());
      side_data.restore(&dir).map_err(|source| ConveyorError::SideData {
        stage: stage.name().to_string(),
        action: "restored",
        source,
      })?;
      event!(Level::DEBUG, stage = %stage.name(), "Side data restored.");
    }
  }
  Ok(())
}

fn persist_side_data(checkpoints: Checkpointing<'_>, leaf: &LeafNode) -> ConveyorResult<()> {
  let stage = leaf.stage();
  let Some(side_data) = stage.side_data() else {
    return Ok(());
  };
  let dir = side_data_dir(checkpoints.shared_root, stage.name());
  create_dir(&dir)?;
  side_data.persist(&dir).map_err(|source| ConveyorError::SideData {
    stage: stage.name().to_string(),
    action: "persisted",
    source,
  })?;
  event!(Level::DEBUG, stage = %stage.name(), "Side data persisted.");
  Ok(())
}

/// Files a finished composite keeps: the hash file and one snapshot per
/// checkpointable child.
fn expected_files(store: &CheckpointStore, fingerprint: &str, children: &[StageNode]) -> Vec<PathBuf> {
  children
    .iter()
    .enumerate()
    .filter(|(_, child)| !child.contains_debugging())
    .map(|(position, child)| store.snapshot_path(fingerprint, position, child.name()))
    .chain(std::iter::once(store.hash_path(fingerprint)))
    .collect()
}

fn replicate(batch: &[Carrier]) -> Vec<Carrier> {
  batch.iter().map(Carrier::replicate).collect()
}
