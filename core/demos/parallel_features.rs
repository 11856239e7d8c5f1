// core/demos/parallel_features.rs

use conveyor::{
  Capability, Carrier, ConveyorError, DataKind, FnStage, Pipeline, RunConfig, StageDescriptor, StageNode,
};
use tracing::info;

const TEXT: DataKind = DataKind::named("text");

fn feature(name: &'static str, compute: fn(&str) -> serde_json::Value) -> StageNode {
  let descriptor = StageDescriptor::new(name, TEXT, TEXT).capability(Capability::ComputesProperties);
  StageNode::leaf(FnStage::new(descriptor, move |mut c: Carrier| async move {
    let value = compute(c.data().as_str().unwrap_or_default());
    c.set_property(name, value);
    Ok(c)
  }))
}

#[tokio::main]
async fn main() -> Result<(), ConveyorError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Parallel Features Example ---");

  let clean = FnStage::new(StageDescriptor::new("clean", TEXT, TEXT), |mut c: Carrier| async move {
    let cleaned: String = c
      .data()
      .as_str()
      .unwrap_or_default()
      .chars()
      .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace())
      .collect();
    c.set_data(cleaned);
    Ok(c)
  });

  // Branch 0 is the primary branch; the others only add properties.
  let features = StageNode::parallel("features")
    .then(feature("length", |text| text.len().into()))?
    .then(feature("words", |text| text.split_whitespace().count().into()))?
    .then(feature("shouting", |text| text.chars().filter(|c| c.is_uppercase()).count().into()))?;

  let root = StageNode::serial("root")
    .then(StageNode::leaf(clean))?
    .then(features)?;
  info!("Feature columns: {:?}", root.stages_with(Capability::ComputesProperties));

  let pipeline = Pipeline::new(root, RunConfig::default())?;
  let outcome = pipeline
    .run(vec![
      Carrier::new("a.txt", "Hello, World!"),
      Carrier::new("b.txt", "quiet words only"),
    ])
    .await?;

  for carrier in &outcome.carriers {
    info!("{} -> {:?}", carrier.name(), carrier.properties());
  }
  assert!(outcome.carriers.iter().all(|c| c.properties().len() == 3));
  Ok(())
}
