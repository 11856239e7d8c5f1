// core/demos/basic_pipeline.rs

use async_trait::async_trait;
use conveyor::{Carrier, ConveyorError, DataKind, FnStage, Pipeline, RunConfig, Stage, StageDescriptor, StageNode};
use tracing::info;

const TEXT: DataKind = DataKind::named("text");
const TOKENS: DataKind = DataKind::named("tokens");

// 1. A stage implemented as a type: splits the payload into words.
struct Tokenize {
  descriptor: StageDescriptor,
}

impl Tokenize {
  fn new() -> Self {
    Self {
      descriptor: StageDescriptor::new("tokenize", TEXT, TOKENS).always_before(["normalize"]),
    }
  }
}

#[async_trait]
impl Stage for Tokenize {
  fn descriptor(&self) -> &StageDescriptor {
    &self.descriptor
  }

  async fn process(&self, mut carrier: Carrier) -> anyhow::Result<Carrier> {
    let text = carrier
      .data()
      .as_str()
      .ok_or_else(|| anyhow::anyhow!("payload of {} is not text", carrier.name()))?
      .to_string();
    let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    carrier.set_property("num_tokens", tokens.len());
    carrier.set_data(tokens);
    Ok(carrier)
  }
}

#[tokio::main]
async fn main() -> Result<(), ConveyorError> {
  // Initialize tracing (optional, for demonstration)
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Pipeline Example ---");

  // 2. Stages built from closures.
  let normalize = FnStage::new(StageDescriptor::new("normalize", TEXT, TEXT), |mut c: Carrier| async move {
    let lowered = c.data().as_str().unwrap_or_default().to_lowercase();
    c.set_data(lowered);
    Ok(c)
  });
  let drop_empty = FnStage::new(StageDescriptor::new("drop_empty", TOKENS, TOKENS), |mut c: Carrier| async move {
    if c.property("num_tokens").and_then(|v| v.as_u64()) == Some(0) {
      c.invalidate();
    }
    Ok(c)
  });

  // 3. Compose them; kinds are checked as each stage is added.
  let root = StageNode::serial("documents")
    .then(StageNode::leaf(normalize))?
    .then(StageNode::leaf(Tokenize::new()))?
    .then(StageNode::leaf(drop_empty))?;
  info!("Tree: {}", root.describe());

  // 4. Run the batch.
  let pipeline = Pipeline::new(root, RunConfig::default())?;
  let batch = vec![
    Carrier::new("a.txt", "The Quick brown fox"),
    Carrier::new("b.txt", "   "),
    Carrier::new("c.txt", "Jumps over the lazy dog"),
  ];
  let outcome = pipeline.run(batch).await?;

  // 5. Inspect the results. Invalid carriers keep their position.
  for carrier in &outcome.carriers {
    info!(
      "{} valid={} tokens={:?} data={}",
      carrier.name(),
      carrier.is_valid(),
      carrier.property("num_tokens"),
      carrier.data()
    );
  }
  assert_eq!(outcome.carriers.len(), 3);
  assert_eq!(outcome.valid_carriers().count(), 2);
  assert_eq!(outcome.executed, vec!["normalize", "tokenize", "drop_empty"]);

  Ok(())
}
