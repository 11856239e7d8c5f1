pub mod carrier;
pub mod descriptor;
pub mod node;
pub mod shared;
pub mod stage;

// Re-export key types for easier access from other conveyor modules (and lib.rs)
pub use carrier::{Carrier, Properties};
pub use descriptor::{Capability, DataKind, StageDescriptor};
pub use node::{Composite, LeafNode, StageNode, TreePath};
pub use shared::{SharedState, SideData};
pub use stage::{FnStage, Stage, StageHandler};
