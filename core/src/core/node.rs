// conveyor/src/core/node.rs

//! The stage tree: leaves wrap a [`Stage`], composites hold ordered children
//! and run them serially or as parallel branches.
//!
//! A node is moved into its composite when it is added, so every node has at
//! most one parent and there are no back-pointers to maintain.

use crate::core::descriptor::{Capability, DataKind};
use crate::core::stage::Stage;
use crate::error::{ConveyorError, ConveyorResult};
use std::fmt;
use std::sync::Arc;
use tracing::{event, Level};

/// A leaf of the tree: one stage plus its debugging marker.
#[derive(Clone)]
pub struct LeafNode {
  pub(crate) stage: Arc<dyn Stage>,
  pub(crate) debugging: bool,
}

impl LeafNode {
  pub fn stage(&self) -> &dyn Stage {
    self.stage.as_ref()
  }

  pub fn is_debugging(&self) -> bool {
    self.debugging
  }
}

/// Children of a serial or parallel node.
#[derive(Clone)]
pub struct Composite {
  pub(crate) name: String,
  pub(crate) children: Vec<StageNode>,
  pub(crate) debugging: bool,
}

impl Composite {
  fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      children: Vec::new(),
      debugging: false,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn children(&self) -> &[StageNode] {
    &self.children
  }

  pub fn is_debugging(&self) -> bool {
    self.debugging
  }
}

#[derive(Clone)]
pub enum StageNode {
  Leaf(LeafNode),
  /// Children run one after another, each over the whole batch.
  Serial(Composite),
  /// Child 0 is the primary branch; the others run concurrently on copies of
  /// the input and contribute properties.
  ///
  /// Branches are polled together on the calling task, so they overlap only
  /// at `.await` points. A CPU-bound stage should move its work onto a
  /// blocking or spawned task itself.
  Parallel(Composite),
}

impl StageNode {
  pub fn leaf(stage: impl Stage + 'static) -> Self {
    StageNode::Leaf(LeafNode {
      stage: Arc::new(stage),
      debugging: false,
    })
  }

  pub fn shared_leaf(stage: Arc<dyn Stage>) -> Self {
    StageNode::Leaf(LeafNode { stage, debugging: false })
  }

  pub fn serial(name: impl Into<String>) -> Self {
    StageNode::Serial(Composite::new(name))
  }

  pub fn parallel(name: impl Into<String>) -> Self {
    StageNode::Parallel(Composite::new(name))
  }

  /// Marks this node as debugging: it is always re-executed and its output is
  /// never checkpointed. On a composite the marker covers every descendant.
  pub fn debugging(mut self) -> Self {
    match &mut self {
      StageNode::Leaf(leaf) => leaf.debugging = true,
      StageNode::Serial(c) | StageNode::Parallel(c) => c.debugging = true,
    }
    self
  }

  /// Adds `child` to this composite, checking data-kind compatibility.
  pub fn push(&mut self, child: StageNode) -> ConveyorResult<()> {
    let child_input = child.input_kind().cloned().ok_or_else(|| ConveyorError::EmptyComposite {
      composite: child.name().to_string(),
    })?;

    let (composite, expected) = match self {
      StageNode::Leaf(leaf) => {
        return Err(ConveyorError::Config(format!(
          "cannot add '{}' to stage '{}': only composites have children",
          child.name(),
          leaf.stage.name()
        )))
      }
      StageNode::Serial(c) => {
        let expected = c.children.last().and_then(|last| last.output_kind()).cloned();
        (c, expected)
      }
      StageNode::Parallel(c) => {
        let expected = c.children.first().and_then(|first| first.input_kind()).cloned();
        (c, expected)
      }
    };

    if let Some(expected) = expected {
      if expected != child_input {
        event!(Level::ERROR, composite = %composite.name, stage = %child.name(), %expected, found = %child_input, "Incompatible stage.");
        return Err(ConveyorError::IncompatibleStage {
          composite: composite.name.clone(),
          stage: child.name().to_string(),
          expected: expected.to_string(),
          found: child_input.to_string(),
        });
      }
    }

    event!(Level::TRACE, composite = %composite.name, stage = %child.name(), "Stage added.");
    composite.children.push(child);
    Ok(())
  }

  /// Builder form of [`StageNode::push`].
  pub fn then(mut self, child: StageNode) -> ConveyorResult<Self> {
    self.push(child)?;
    Ok(self)
  }

  pub fn name(&self) -> &str {
    match self {
      StageNode::Leaf(leaf) => leaf.stage.name(),
      StageNode::Serial(c) | StageNode::Parallel(c) => &c.name,
    }
  }

  /// Input kind; `None` for an empty composite.
  pub fn input_kind(&self) -> Option<&DataKind> {
    match self {
      StageNode::Leaf(leaf) => Some(&leaf.stage.descriptor().input),
      StageNode::Serial(c) | StageNode::Parallel(c) => c.children.first().and_then(StageNode::input_kind),
    }
  }

  /// Output kind: last child's for serial, primary branch's for parallel.
  pub fn output_kind(&self) -> Option<&DataKind> {
    match self {
      StageNode::Leaf(leaf) => Some(&leaf.stage.descriptor().output),
      StageNode::Serial(c) => c.children.last().and_then(StageNode::output_kind),
      StageNode::Parallel(c) => c.children.first().and_then(StageNode::output_kind),
    }
  }

  pub fn children(&self) -> &[StageNode] {
    match self {
      StageNode::Leaf(_) => &[],
      StageNode::Serial(c) | StageNode::Parallel(c) => &c.children,
    }
  }

  pub fn is_debugging(&self) -> bool {
    match self {
      StageNode::Leaf(leaf) => leaf.debugging,
      StageNode::Serial(c) | StageNode::Parallel(c) => c.debugging,
    }
  }

  /// True if this node or any descendant is marked debugging.
  pub fn contains_debugging(&self) -> bool {
    self.is_debugging() || self.children().iter().any(StageNode::contains_debugging)
  }

  /// Structural description: kinds, names and parameters, recursively.
  /// Debugging markers are deliberately left out.
  pub fn describe(&self) -> String {
    match self {
      StageNode::Leaf(leaf) => format!("{}({})", leaf.stage.name(), leaf.stage.parameters()),
      StageNode::Serial(c) => format!("serial:{}[{}]", c.name, describe_children(&c.children)),
      StageNode::Parallel(c) => format!("parallel:{}[{}]", c.name, describe_children(&c.children)),
    }
  }

  /// Leaves in pre-order, left to right, with their tree paths.
  pub fn leaves(&self) -> Vec<(TreePath, &LeafNode)> {
    let mut out = Vec::new();
    self.collect_leaves(TreePath::root(), &mut out);
    out
  }

  fn collect_leaves<'a>(&'a self, path: TreePath, out: &mut Vec<(TreePath, &'a LeafNode)>) {
    match self {
      StageNode::Leaf(leaf) => out.push((path, leaf)),
      StageNode::Serial(c) | StageNode::Parallel(c) => {
        for (idx, child) in c.children.iter().enumerate() {
          child.collect_leaves(path.child(idx), out);
        }
      }
    }
  }

  pub fn leaf_names(&self) -> Vec<&str> {
    self.leaves().into_iter().map(|(_, leaf)| leaf.stage.name()).collect()
  }

  /// Names of stages carrying `capability`, in execution order.
  pub fn stages_with(&self, capability: Capability) -> Vec<&str> {
    self
      .leaves()
      .into_iter()
      .filter(|(_, leaf)| leaf.stage.descriptor().has_capability(capability))
      .map(|(_, leaf)| leaf.stage.name())
      .collect()
  }
}

fn describe_children(children: &[StageNode]) -> String {
  children.iter().map(StageNode::describe).collect::<Vec<_>>().join(",")
}

impl fmt::Debug for StageNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StageNode::Leaf(leaf) => f
        .debug_struct("Leaf")
        .field("stage", &leaf.stage.name())
        .field("debugging", &leaf.debugging)
        .finish(),
      StageNode::Serial(c) => f
        .debug_struct("Serial")
        .field("name", &c.name)
        .field("debugging", &c.debugging)
        .field("children", &c.children)
        .finish(),
      StageNode::Parallel(c) => f
        .debug_struct("Parallel")
        .field("name", &c.name)
        .field("debugging", &c.debugging)
        .field("children", &c.children)
        .finish(),
    }
  }
}

/// Position of a node in the tree, as child indices from the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TreePath(Vec<usize>);

impl TreePath {
  pub fn root() -> Self {
    TreePath(Vec::new())
  }

  pub fn child(&self, idx: usize) -> Self {
    let mut indices = self.0.clone();
    indices.push(idx);
    TreePath(indices)
  }

  pub fn indices(&self) -> &[usize] {
    &self.0
  }
}

impl fmt::Display for TreePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("root")?;
    for idx in &self.0 {
      write!(f, "/{}", idx)?;
    }
    Ok(())
  }
}
