// src/lib.rs

//! Conveyor: an ASYNC batch transformation engine with checkpointed resume.
//!
//! A batch of [`Carrier`]s is pushed through a tree of stages:
//!  - Leaf stages implement [`Stage`] (or wrap a closure with [`FnStage`]).
//!  - Serial composites run their children one after another over the whole batch.
//!  - Parallel composites run branches concurrently on copies of the batch and
//!    merge the properties they compute onto the primary branch.
//!  - Declared ordering constraints (`always_before`, `not_after`) are checked
//!    before a run starts.
//!  - In resumable mode every composite snapshots the batch after each child,
//!    so an interrupted run picks up after the last completed stage.

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod validation;

// --- Re-exports for the Public API ---

pub use crate::core::{
  Capability, Carrier, Composite, DataKind, FnStage, LeafNode, Properties, SharedState, SideData, Stage,
  StageDescriptor, StageHandler, StageNode, TreePath,
};

pub use crate::pipeline::{Pipeline, RunOutcome};

pub use crate::checkpoint::{content_hash, tree_fingerprint, CheckpointStore};
pub use crate::config::RunConfig;
pub use crate::validation::{check_dependencies, DependencyReport, DependencyViolation};

pub use crate::error::{ConveyorError, ConveyorResult};

/*
    Core Workflow:
    1. Describe each stage with a `StageDescriptor` (name, input/output kinds,
       ordering constraints) and implement `Stage` for it, or use `FnStage`.
    2. Build the tree: `StageNode::serial("root").then(StageNode::leaf(stage))?`,
       nesting `StageNode::parallel(..)` where branches can run side by side.
    3. Create a `Pipeline` with a `RunConfig` (`RunConfig::from_env()` or
       `RunConfig::resumable_in(dir)`).
    4. `pipeline.run(batch).await` returns the processed carriers together with
       the stages it executed and the ones it reused from checkpoints.
*/
