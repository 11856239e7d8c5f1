// conveyor/src/checkpoint/mod.rs

//! Content-addressed checkpoints of composite progress.
//!
//! Each composite running in resumable mode owns a directory named after its
//! structure fingerprint. After every child it completes, the batch is
//! snapshotted there together with the hash of the batch that entered the
//! composite. On the next run the composite skips every child up to the most
//! advanced snapshot whose batch hash still matches.

pub mod fingerprint;
pub mod resume;
pub mod snapshot;
pub mod store;

pub use fingerprint::{composite_fingerprints, content_hash, tree_fingerprint};
pub use resume::{plan_serial, verify_batch, HashCheck, ResumePlan};
pub use snapshot::{Snapshot, SnapshotError, SnapshotKey, SNAPSHOT_VERSION};
pub use store::{side_data_dir, CheckpointStore};
