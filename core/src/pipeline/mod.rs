// conveyor/src/pipeline/mod.rs

//! Defines the `Pipeline` struct, its construction and execution logic.

pub mod definition;
pub mod execution;
pub mod merge;

pub use definition::{Pipeline, RunOutcome};
pub use merge::{merge_branches, merge_carrier, BranchOutput};
