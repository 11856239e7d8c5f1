// conveyor/src/checkpoint/fingerprint.rs

//! Fingerprints keying checkpoints: one over the structure of a composite,
//! one over the identities of the carriers entering it.

use crate::core::carrier::Carrier;
use crate::core::node::{StageNode, TreePath};

/// MD5 over each carrier's name in batch order.
///
/// Names are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
/// Property values and payloads do not take part: they are exactly what
/// stages change.
pub fn content_hash(batch: &[Carrier]) -> String {
  let mut context = md5::Context::new();
  for carrier in batch {
    let name = carrier.name().as_bytes();
    context.consume((name.len() as u64).to_le_bytes());
    context.consume(name);
  }
  format!("{:x}", context.compute())
}

/// MD5 over a composite's position in the tree and its structural description.
pub fn tree_fingerprint(path: &TreePath, node: &StageNode) -> String {
  let description = format!("{}|{}", path, node.describe());
  format!("{:x}", md5::compute(description.as_bytes()))
}

/// Every composite fingerprint in the tree rooted at `node`, pre-order.
pub fn composite_fingerprints(node: &StageNode) -> Vec<String> {
  let mut out = Vec::new();
  collect_fingerprints(node, TreePath::root(), &mut out);
  out
}

fn collect_fingerprints(node: &StageNode, path: TreePath, out: &mut Vec<String>) {
  if let StageNode::Leaf(_) = node {
    return;
  }
  out.push(tree_fingerprint(&path, node));
  for (idx, child) in node.children().iter().enumerate() {
    collect_fingerprints(child, path.child(idx), out);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn batch(names: &[&str]) -> Vec<Carrier> {
    names.iter().map(|n| Carrier::new(*n, json!(null))).collect()
  }

  #[test]
  fn empty_batch_hashes_to_md5_of_nothing() {
    assert_eq!(content_hash(&[]), "d41d8cd98f00b204e9800998ecf8427e");
  }

  #[test]
  fn hash_depends_on_identity_and_order_only() {
    let base = content_hash(&batch(&["a.txt", "b.txt"]));
    assert_ne!(base, content_hash(&batch(&["b.txt", "a.txt"])));
    assert_ne!(base, content_hash(&batch(&["a.txt", "b.txt", "c.txt"])));

    let mut annotated = batch(&["a.txt", "b.txt"]);
    annotated[0].set_property("tokens", 10);
    annotated[1].set_data("changed");
    annotated[1].invalidate();
    assert_eq!(base, content_hash(&annotated));
  }

  #[test]
  fn name_boundaries_matter() {
    assert_ne!(content_hash(&batch(&["ab", "c"])), content_hash(&batch(&["a", "bc"])));
  }
}
