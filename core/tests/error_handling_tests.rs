// tests/error_handling_tests.rs
mod common;
use async_trait::async_trait;
use common::*;
use conveyor::{Carrier, ConveyorError, ConveyorResult, Pipeline, RunConfig, Stage, StageDescriptor, StageNode};
use serial_test::serial;
use std::error::Error as _;

/// Batch stage that loses the last carrier.
struct DroppingStage {
  descriptor: StageDescriptor,
}

#[async_trait]
impl Stage for DroppingStage {
  fn descriptor(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn process(&self, carrier: Carrier) -> anyhow::Result<Carrier> {
    Ok(carrier)
  }

  async fn process_all(&self, mut batch: Vec<Carrier>) -> ConveyorResult<Vec<Carrier>> {
    batch.pop();
    Ok(batch)
  }
}

#[tokio::test]
#[serial]
async fn stage_failure_names_stage_and_carrier() {
  setup_tracing();
  let later = RecordingStage::new("export");
  let later_calls = later.calls();
  let root = serial_of(
    "root",
    vec![RecordingStage::new("parse").failing_on("b.txt").node(), later.node()],
  );
  let pipeline = Pipeline::new(root, RunConfig::default()).unwrap();

  let err = pipeline.run(batch(&["a.txt", "b.txt", "c.txt"])).await.unwrap_err();
  let message = err.to_string();
  assert!(message.contains("parse"), "{}", message);
  assert!(message.contains("b.txt"), "{}", message);
  assert!(err.source().is_some());
  assert!(!err.is_configuration_error());
  assert_eq!(count(&later_calls), 0);
}

#[tokio::test]
#[serial]
async fn batch_size_changes_are_fatal() {
  setup_tracing();
  let dropping = DroppingStage {
    descriptor: StageDescriptor::new("dropper", TEXT, TEXT),
  };
  let root = serial_of("root", vec![StageNode::leaf(dropping), RecordingStage::new("after").node()]);

  let err = root.process_all(batch(&["a.txt", "b.txt"])).await.unwrap_err();
  match err {
    ConveyorError::BatchShape {
      stage,
      expected,
      actual,
    } => {
      assert_eq!(stage, "dropper");
      assert_eq!(expected, 2);
      assert_eq!(actual, 1);
    }
    other => panic!("Expected BatchShape, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn unwritable_checkpoint_root_is_fatal() {
  setup_tracing();
  let dir = tempfile::tempdir().unwrap();
  let blocker = dir.path().join("not_a_dir");
  std::fs::write(&blocker, b"occupied").unwrap();

  let stage = RecordingStage::new("only");
  let calls = stage.calls();
  let config = RunConfig::resumable_in(dir.path()).with_checkpoint_root(blocker.join("checkpoints"));
  let pipeline = Pipeline::new(serial_of("root", vec![stage.node()]), config).unwrap();

  let err = pipeline.run(batch(&["a.txt"])).await.unwrap_err();
  assert!(matches!(err, ConveyorError::CheckpointIo { .. }), "{:?}", err);
  assert_eq!(count(&calls), 0);
}

#[test]
#[serial]
fn invalid_config_is_rejected_before_running() {
  let config = RunConfig::default().with_resumable(true).with_checkpoint_root("");
  let err = Pipeline::new(serial_of("root", vec![RecordingStage::new("only").node()]), config).unwrap_err();
  assert!(matches!(err, ConveyorError::Config(_)));
  assert!(err.is_configuration_error());
}

#[test]
#[serial]
fn config_from_env_reports_bad_flags() {
  std::env::set_var("CONVEYOR_RESUMABLE", "maybe");
  let result = RunConfig::from_env();
  std::env::remove_var("CONVEYOR_RESUMABLE");

  match result {
    Err(ConveyorError::Config(message)) => assert!(message.contains("CONVEYOR_RESUMABLE")),
    other => panic!("Expected Config error, got {:?}", other),
  }
}

#[test]
#[serial]
fn config_from_env_reads_roots() {
  std::env::set_var("CONVEYOR_RESUMABLE", "true");
  std::env::set_var("CONVEYOR_CHECKPOINT_ROOT", "/tmp/conveyor-ck");
  let result = RunConfig::from_env();
  std::env::remove_var("CONVEYOR_RESUMABLE");
  std::env::remove_var("CONVEYOR_CHECKPOINT_ROOT");

  let config = result.unwrap();
  assert!(config.resumable);
  assert_eq!(config.checkpoint_root, std::path::PathBuf::from("/tmp/conveyor-ck"));
}
