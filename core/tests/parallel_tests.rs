// tests/parallel_tests.rs
mod common;

use common::*;
use conveyor::{Carrier, ConveyorError, FnStage, Pipeline, RunConfig, SharedState, StageDescriptor, StageNode};
use serde_json::json;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn side_branches_only_contribute_properties() {
  setup_tracing();
  let root = serial_of(
    "root",
    vec![
      RecordingStage::new("load").node(),
      parallel_of(
        "features",
        vec![
          RecordingStage::new("clean").node(),
          // Changes data too, which must not leak into the result.
          RecordingStage::new("length").setting("length", 5).node(),
          RecordingStage::new("lang").setting("lang", "en").properties_only().node(),
        ],
      ),
    ],
  );
  let pipeline = Pipeline::new(root, RunConfig::default()).unwrap();

  let outcome = pipeline.run(batch(&["a.txt", "b.txt"])).await.unwrap();
  for carrier in &outcome.carriers {
    assert_eq!(carrier.data(), &json!(">load>clean"));
    assert_eq!(carrier.property("length"), Some(&json!(5)));
    assert_eq!(carrier.property("lang"), Some(&json!("en")));
    let keys: Vec<&str> = carrier.properties().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["load", "clean", "length", "lang"]);
  }
}

#[tokio::test]
#[serial]
async fn branches_do_not_see_each_others_changes() {
  setup_tracing();
  let slow_primary = FnStage::new(StageDescriptor::new("primary", TEXT, TEXT), |mut c: Carrier| async move {
    tokio::time::sleep(Duration::from_millis(5)).await;
    c.set_property("primary_saw_side", c.has_property("side"));
    Ok(c)
  });
  let side = FnStage::new(StageDescriptor::new("side", TEXT, TEXT), |mut c: Carrier| async move {
    c.set_property("side_saw_primary", c.has_property("primary_saw_side"));
    c.set_property("side", true);
    Ok(c)
  });
  let root = parallel_of("branches", vec![StageNode::leaf(slow_primary), StageNode::leaf(side)]);

  let merged = root.process_all(batch(&["a.txt", "b.txt", "c.txt"])).await.unwrap();
  let names: Vec<&str> = merged.iter().map(Carrier::name).collect();
  assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
  for carrier in &merged {
    assert_eq!(carrier.property("primary_saw_side"), Some(&json!(false)));
    assert_eq!(carrier.property("side_saw_primary"), Some(&json!(false)));
    assert_eq!(carrier.property("side"), Some(&json!(true)));
  }
}

#[tokio::test]
#[serial]
async fn conflicting_properties_resolve_to_the_last_branch() {
  setup_tracing();
  let root = parallel_of(
    "scores",
    vec![
      RecordingStage::new("a").setting("score", 1).node(),
      RecordingStage::new("b").setting("score", 2).properties_only().node(),
      RecordingStage::new("c").setting("score", 3).properties_only().node(),
    ],
  );
  let merged = root.process_all(batch(&["a.txt"])).await.unwrap();
  assert_eq!(merged[0].property("score"), Some(&json!(3)));
}

#[tokio::test]
#[serial]
async fn side_branch_invalidation_reaches_the_result() {
  setup_tracing();
  let root = parallel_of(
    "filters",
    vec![
      RecordingStage::new("keep").node(),
      RecordingStage::new("reject").invalidating("b.txt").properties_only().node(),
    ],
  );
  let merged = root.process_all(batch(&["a.txt", "b.txt"])).await.unwrap();
  assert!(merged[0].is_valid());
  assert!(!merged[1].is_valid());
}

#[tokio::test]
#[serial]
async fn failing_branch_fails_the_composite() {
  setup_tracing();
  let root = parallel_of(
    "features",
    vec![
      RecordingStage::new("ok").node(),
      RecordingStage::new("broken").failing_on("a.txt").properties_only().node(),
    ],
  );
  let err = root.process_all(batch(&["a.txt"])).await.unwrap_err();
  assert!(matches!(err, ConveyorError::StageFailure { ref stage, .. } if stage == "broken"));
}

#[tokio::test]
#[serial]
async fn resumed_branches_are_restored_and_merged() {
  setup_tracing();
  let dir = tempfile::tempdir().unwrap();
  let build = || {
    let clean = RecordingStage::new("clean");
    let length = RecordingStage::new("length").setting("length", 5).properties_only();
    let debug = RecordingStage::new("inspect").setting("inspected", true).properties_only();
    let calls = (clean.calls(), length.calls(), debug.calls());
    let root = serial_of(
      "root",
      vec![parallel_of("features", vec![clean.node(), length.node(), debug.node().debugging()])],
    );
    (Pipeline::new(root, RunConfig::resumable_in(dir.path())).unwrap(), calls)
  };
  let input = batch(&["a.txt", "b.txt"]);

  let (first_pipeline, _) = build();
  let first = first_pipeline.run(input.clone()).await.unwrap();

  let (second_pipeline, (clean_calls, length_calls, debug_calls)) = build();
  let second = second_pipeline.run(input).await.unwrap();

  assert_eq!(count(&clean_calls), 0);
  assert_eq!(count(&length_calls), 0);
  assert_eq!(count(&debug_calls), 2);
  assert_eq!(second.executed, vec!["inspect"]);
  assert_eq!(second.carriers, first.carriers);
  assert_eq!(second.carriers[0].property("length"), Some(&json!(5)));
  assert_eq!(second.carriers[0].property("inspected"), Some(&json!(true)));
}

#[tokio::test]
#[serial]
async fn changed_input_batch_reruns_every_branch() {
  setup_tracing();
  let dir = tempfile::tempdir().unwrap();
  let clean = RecordingStage::new("clean");
  let length = RecordingStage::new("length").setting("length", 5).properties_only();
  let (clean_calls, length_calls) = (clean.calls(), length.calls());
  let root = parallel_of("features", vec![clean.node(), length.node()]);
  let pipeline = Pipeline::new(root, RunConfig::resumable_in(dir.path())).unwrap();

  pipeline.run(batch(&["a.txt", "b.txt"])).await.unwrap();
  let outcome = pipeline.run(batch(&["a.txt", "c.txt"])).await.unwrap();

  assert!(outcome.reused.is_empty());
  assert!(outcome.was_executed("clean") && outcome.was_executed("length"));
  assert_eq!(count(&clean_calls), 4);
  assert_eq!(count(&length_calls), 4);
  assert_eq!(outcome.carriers[1].name(), "c.txt");
  assert_eq!(outcome.carriers[1].property("length"), Some(&json!(5)));
}

#[tokio::test]
#[serial]
async fn branch_with_partially_lost_side_data_restores_nothing() {
  setup_tracing();
  let dir = tempfile::tempdir().unwrap();
  let input = batch(&["a.txt"]);
  let build = |first: &SharedState<Vec<String>>, second: &SharedState<Vec<String>>| {
    let branch = serial_of(
      "vocab",
      vec![
        RecordingStage::new("count").remembering(first.clone()).node(),
        RecordingStage::new("index").remembering(second.clone()).node(),
      ],
    );
    let side = RecordingStage::new("length").setting("length", 5).properties_only().node();
    Pipeline::new(parallel_of("features", vec![branch, side]), RunConfig::resumable_in(dir.path())).unwrap()
  };

  let (s1, s2) = (SharedState::default(), SharedState::default());
  build(&s1, &s2).run(input.clone()).await.unwrap();
  std::fs::remove_dir_all(dir.path().join("shared").join("index")).unwrap();

  let (s1, s2) = (SharedState::default(), SharedState::default());
  let outcome = build(&s1, &s2).run(input).await.unwrap();

  assert_eq!(outcome.reused, vec!["length"]);
  assert_eq!(outcome.executed, vec!["count", "index"]);
  assert_eq!(*s1.read(), vec!["a.txt"]);
  assert_eq!(*s2.read(), vec!["a.txt"]);
}
