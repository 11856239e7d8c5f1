// conveyor/src/validation.rs

//! Dependency validation over a stage tree.
//!
//! Execution order for the purpose of these checks is the pre-order,
//! left-to-right traversal of the tree, with parallel branches counted in
//! declaration order. Every violation is collected; nothing short-circuits.

use crate::core::node::{LeafNode, StageNode, TreePath};
use std::fmt;
use tracing::{event, instrument, Level};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyViolation {
  /// `stage` requires stage types that never execute before it.
  MissingPredecessors {
    stage: String,
    path: TreePath,
    missing: Vec<String>,
  },
  /// `offender` executes after `stage`, which lists it in `not_after`.
  ExecutesAfter {
    stage: String,
    path: TreePath,
    offender: String,
    offender_path: TreePath,
  },
}

impl DependencyViolation {
  /// Stage whose declaration is violated.
  pub fn stage(&self) -> &str {
    match self {
      DependencyViolation::MissingPredecessors { stage, .. } | DependencyViolation::ExecutesAfter { stage, .. } => stage,
    }
  }
}

impl fmt::Display for DependencyViolation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DependencyViolation::MissingPredecessors { stage, path, missing } => write!(
        f,
        "stage '{}' at {} requires [{}] to run before it",
        stage,
        path,
        missing.join(", ")
      ),
      DependencyViolation::ExecutesAfter {
        stage,
        path,
        offender,
        offender_path,
      } => write!(
        f,
        "stage '{}' at {} runs after stage '{}' at {}, which forbids it",
        offender, offender_path, stage, path
      ),
    }
  }
}

/// Outcome of [`check_dependencies`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
  pub violations: Vec<DependencyViolation>,
}

impl DependencyReport {
  pub fn is_satisfied(&self) -> bool {
    self.violations.is_empty()
  }

  /// Stage types named as missing predecessors, across all violations.
  pub fn missing_dependencies(&self) -> Vec<&str> {
    self
      .violations
      .iter()
      .filter_map(|v| match v {
        DependencyViolation::MissingPredecessors { missing, .. } => Some(missing),
        _ => None,
      })
      .flatten()
      .map(String::as_str)
      .collect()
  }
}

impl fmt::Display for DependencyReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.violations.is_empty() {
      return f.write_str("all dependencies satisfied");
    }
    let parts: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
    f.write_str(&parts.join("; "))
  }
}

/// Walks `leaves` in order up to `target`, crossing off required predecessor
/// types as they are seen. Whatever is left when `target` is reached is missing.
/// An out-of-range `target` has nothing to check.
pub fn check_always_before(leaves: &[(TreePath, &LeafNode)], target: usize) -> Option<DependencyViolation> {
  let (target_path, target_leaf) = leaves.get(target)?;
  let descriptor = target_leaf.stage().descriptor();

  let mut remaining: Vec<&str> = Vec::new();
  for dep in &descriptor.always_before {
    if !remaining.contains(&dep.as_str()) {
      remaining.push(dep.as_str());
    }
  }

  for (_, visited) in &leaves[..target] {
    if remaining.is_empty() {
      break;
    }
    let visited_name = visited.stage().name();
    remaining.retain(|dep| *dep != visited_name);
  }

  if remaining.is_empty() {
    None
  } else {
    Some(DependencyViolation::MissingPredecessors {
      stage: descriptor.name.clone(),
      path: target_path.clone(),
      missing: remaining.into_iter().map(str::to_string).collect(),
    })
  }
}

/// Reports every stage after `target` whose type `target` lists in `not_after`.
pub fn check_not_after(leaves: &[(TreePath, &LeafNode)], target: usize) -> Vec<DependencyViolation> {
  let Some((target_path, target_leaf)) = leaves.get(target) else {
    return Vec::new();
  };
  let descriptor = target_leaf.stage().descriptor();
  if descriptor.not_after.is_empty() {
    return Vec::new();
  }

  leaves[target + 1..]
    .iter()
    .filter(|(_, later)| descriptor.not_after.iter().any(|dep| dep == later.stage().name()))
    .map(|(later_path, later)| DependencyViolation::ExecutesAfter {
      stage: descriptor.name.clone(),
      path: target_path.clone(),
      offender: later.stage().name().to_string(),
      offender_path: later_path.clone(),
    })
    .collect()
}

/// Checks the `always_before` and `not_after` declarations of every stage in the tree.
#[instrument(name = "validation::check_dependencies", skip_all, fields(root = %root.name()))]
pub fn check_dependencies(root: &StageNode) -> DependencyReport {
  let leaves = root.leaves();
  let mut report = DependencyReport::default();

  for idx in 0..leaves.len() {
    if let Some(violation) = check_always_before(&leaves, idx) {
      report.violations.push(violation);
    }
    report.violations.extend(check_not_after(&leaves, idx));
  }

  if report.is_satisfied() {
    event!(Level::DEBUG, num_stages = leaves.len(), "Stage dependencies satisfied.");
  } else {
    for violation in &report.violations {
      event!(Level::ERROR, stage = %violation.stage(), "{}", violation);
    }
  }
  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::carrier::Carrier;
  use crate::core::descriptor::{DataKind, StageDescriptor};
  use crate::core::stage::FnStage;

  const TEXT: DataKind = DataKind::named("text");

  fn stage(descriptor: StageDescriptor) -> StageNode {
    StageNode::leaf(FnStage::new(descriptor, |c: Carrier| async move { Ok(c) }))
  }

  fn plain(name: &str) -> StageDescriptor {
    StageDescriptor::new(name, TEXT, TEXT)
  }

  #[test]
  fn self_dependency_is_not_satisfied_by_itself() {
    let root = StageNode::serial("root")
      .then(stage(plain("dedupe").always_before(["dedupe"])))
      .unwrap();
    let report = check_dependencies(&root);
    assert_eq!(report.missing_dependencies(), vec!["dedupe"]);
  }

  #[test]
  fn earlier_instance_satisfies_self_dependency() {
    let root = StageNode::serial("root")
      .then(stage(plain("dedupe")))
      .unwrap()
      .then(stage(plain("dedupe").always_before(["dedupe"])))
      .unwrap();
    assert!(check_dependencies(&root).is_satisfied());
  }

  #[test]
  fn reports_every_not_after_offender() {
    let root = StageNode::serial("root")
      .then(stage(plain("freeze").not_after(["mutate"])))
      .unwrap()
      .then(stage(plain("mutate")))
      .unwrap()
      .then(stage(plain("mutate")))
      .unwrap();
    let report = check_dependencies(&root);
    assert_eq!(report.violations.len(), 2);
    assert!(report
      .violations
      .iter()
      .all(|v| matches!(v, DependencyViolation::ExecutesAfter { offender, .. } if offender == "mutate")));
  }

  #[test]
  fn out_of_range_target_has_no_violations() {
    let root = StageNode::serial("root")
      .then(stage(plain("freeze").always_before(["load"]).not_after(["mutate"])))
      .unwrap();
    let leaves = root.leaves();
    assert!(check_always_before(&leaves, 1).is_none());
    assert!(check_not_after(&leaves, 5).is_empty());
    assert!(check_always_before(&leaves, 0).is_some());
  }
}
