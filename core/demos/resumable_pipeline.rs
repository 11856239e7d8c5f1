// core/demos/resumable_pipeline.rs

//! Simulates a crash in the middle of a batch and a restart that resumes
//! after the last completed stage.
//!
//! Checkpoint locations come from `CONVEYOR_*` environment variables (or a
//! `.env` file); without them a temporary directory is used.

use conveyor::{Carrier, ConveyorError, DataKind, FnStage, Pipeline, RunConfig, SharedState, StageDescriptor, StageNode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const TEXT: DataKind = DataKind::named("text");

fn build(vocabulary: SharedState<BTreeMap<String, usize>>, crash_on: Option<&'static str>) -> Result<StageNode, ConveyorError> {
  let vocab = vocabulary.clone();
  let count_words = FnStage::new(StageDescriptor::new("vocabulary", TEXT, TEXT), move |c: Carrier| {
    let vocab = vocab.clone();
    async move {
      {
        let mut words = vocab.write();
        for word in c.data().as_str().unwrap_or_default().split_whitespace() {
          *words.entry(word.to_string()).or_insert(0) += 1;
        }
      }
      Ok(c)
    }
  })
  .with_side_data(Arc::new(vocabulary));

  let score = FnStage::new(StageDescriptor::new("score", TEXT, TEXT), move |mut c: Carrier| async move {
    if Some(c.name()) == crash_on {
      anyhow::bail!("simulated crash while scoring {}", c.name());
    }
    let length = c.data().as_str().map(str::len).unwrap_or_default();
    c.set_property("score", length);
    Ok(c)
  })
  .with_parameters("metric=length");

  StageNode::serial("corpus")
    .then(StageNode::leaf(count_words))?
    .then(StageNode::leaf(score))
}

fn batch() -> Vec<Carrier> {
  vec![
    Carrier::new("a.txt", "to be or not to be"),
    Carrier::new("b.txt", "that is the question"),
    Carrier::new("c.txt", "whether tis nobler"),
  ]
}

#[tokio::main]
async fn main() -> Result<(), ConveyorError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Resumable Pipeline Example ---");

  let scratch = std::env::temp_dir().join("conveyor-resumable-demo");
  let config = match RunConfig::from_env()? {
    config if config.resumable => config,
    _ => RunConfig::resumable_in(&scratch),
  };
  info!("Checkpoints under {}", config.checkpoint_root.display());

  // First attempt dies on b.txt after the vocabulary stage finished.
  let vocabulary = SharedState::default();
  let crashing = Pipeline::new(build(vocabulary, Some("b.txt"))?, config.clone())?;
  match crashing.run(batch()).await {
    Ok(_) => info!("Batch unexpectedly finished."),
    Err(e) => warn!("First attempt failed: {}", e),
  }

  // The restart reuses the vocabulary checkpoint and restores its state.
  let vocabulary: SharedState<BTreeMap<String, usize>> = SharedState::default();
  let restarted = Pipeline::new(build(vocabulary.clone(), None)?, config)?;
  let outcome = restarted.run(batch()).await?;

  info!("Reused: {:?}", outcome.reused);
  info!("Executed: {:?}", outcome.executed);
  info!("Vocabulary restored with {} words", vocabulary.read().len());
  for carrier in &outcome.carriers {
    info!("{} score={:?}", carrier.name(), carrier.property("score"));
  }

  restarted.prune_checkpoints()?;
  Ok(())
}
