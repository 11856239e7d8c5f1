// conveyor/src/pipeline/merge.rs

//! Folds the outputs of parallel branches into one batch.
//!
//! Branch 0 is the primary branch: its carriers are the result. Every other
//! branch only contributes properties, compared against the carrier it was
//! handed, in declaration order.

use crate::core::carrier::Carrier;
use crate::error::{ConveyorError, ConveyorResult};
use tracing::{event, Level};

/// Output of one parallel branch.
#[derive(Debug)]
pub struct BranchOutput<'a> {
  pub name: &'a str,
  pub carriers: Vec<Carrier>,
}

/// Merges side branches onto the primary branch.
///
/// `original` is the batch every branch received. All branches must return a
/// batch of the same length.
pub fn merge_branches(composite: &str, original: &[Carrier], branches: Vec<BranchOutput<'_>>) -> ConveyorResult<Vec<Carrier>> {
  let mut branches = branches.into_iter();
  let primary = match branches.next() {
    Some(primary) => primary,
    None => return Ok(original.to_vec()),
  };
  check_shape(primary.name, original.len(), primary.carriers.len())?;

  let mut merged = primary.carriers;
  for side in branches {
    check_shape(side.name, original.len(), side.carriers.len())?;
    for ((target, before), after) in merged.iter_mut().zip(original).zip(&side.carriers) {
      merge_carrier(composite, side.name, target, before, after);
    }
  }
  Ok(merged)
}

/// Applies what one side branch did to `before` onto `target`.
pub fn merge_carrier(composite: &str, branch: &str, target: &mut Carrier, before: &Carrier, after: &Carrier) {
  for (key, value) in after.properties() {
    if before.property(key) == Some(value) {
      continue;
    }
    if let Some(existing) = target.property(key) {
      if existing != value {
        event!(
          Level::WARN,
          %composite,
          %branch,
          carrier = %target.name(),
          property = %key,
          "Parallel branches disagree on a property; the later branch wins."
        );
      }
    }
    target.set_property(key.clone(), value.clone());
  }

  if after.data() != before.data() || after.target() != before.target() {
    event!(Level::WARN, %composite, %branch, carrier = %after.name(), "Side branch changed data or target; change discarded.");
  }

  if before.is_valid() && !after.is_valid() {
    event!(Level::DEBUG, %composite, %branch, carrier = %after.name(), "Side branch invalidated carrier.");
    target.invalidate();
  }
}

fn check_shape(stage: &str, expected: usize, actual: usize) -> ConveyorResult<()> {
  if expected == actual {
    Ok(())
  } else {
    Err(ConveyorError::BatchShape {
      stage: stage.to_string(),
      expected,
      actual,
    })
  }
}
