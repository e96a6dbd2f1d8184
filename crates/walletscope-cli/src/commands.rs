//! Subcommand implementations.
//!
//! Each analysis command drains the processing queue for its stage,
//! marking items completed only once the pass has succeeded: a pass
//! that fails leaves them pending, so a re-run picks them up again.

use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use walletscope_core::{
  cluster::{QueueStatus, Stage},
  entity::{Address, Entity, EntityType},
  evidence::{EvidenceSource, NewEvidence},
  relationship::{Relationship, RelationshipType},
  store::{EntityQuery, GraphStore},
};
use walletscope_engine::{
  cleanup::run_cleanup,
  cluster::{TransferObservation, run_clustering},
  params::EngineParams,
  propagate::run_propagation,
  reassess::reassess_entity,
};
use walletscope_store_sqlite::SqliteStore;

// ─── init ─────────────────────────────────────────────────────────────────────

fn default_seed_confidence() -> f64 { 0.9 }
fn default_seed_source() -> EvidenceSource { EvidenceSource::VerifiedLabel }

/// One seed from the `--seeds` file. An identity-less seed just creates
/// the entity and enqueues it for clustering.
#[derive(Debug, Deserialize)]
struct SeedLabel {
  address:     Address,
  identity:    Option<String>,
  #[serde(default = "default_seed_confidence")]
  confidence:  f64,
  #[serde(default = "default_seed_source")]
  source:      EvidenceSource,
  entity_type: Option<EntityType>,
}

pub async fn init(store: &SqliteStore, seeds: Option<&Path>) -> Result<()> {
  let Some(path) = seeds else {
    // Opening the store already ran schema initialisation.
    println!("store initialised");
    return Ok(());
  };

  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading seeds file {}", path.display()))?;
  let seeds: Vec<SeedLabel> =
    serde_json::from_str(&raw).context("parsing seeds file")?;

  let mut loaded = 0usize;
  for seed in seeds {
    match &seed.identity {
      Some(identity) => {
        store
          .add_evidence(NewEvidence::new(
            seed.address.clone(),
            seed.source,
            identity,
            seed.confidence,
          ))
          .await
          .with_context(|| format!("seeding {}", seed.address))?;
        reassess_entity(store, &seed.address).await?;
      }
      None => {
        store.ensure_entity(seed.address.clone()).await?;
      }
    }
    if let Some(entity_type) = seed.entity_type {
      store.set_entity_type(&seed.address, entity_type).await?;
    }
    store.queue_push(&seed.address, Stage::Clustering).await?;
    loaded += 1;
  }

  println!("store initialised, {loaded} seed labels loaded");
  Ok(())
}

// ─── cluster ──────────────────────────────────────────────────────────────────

pub async fn cluster(
  store: &SqliteStore,
  params: &EngineParams,
  observations: Option<&Path>,
) -> Result<()> {
  let observations: Vec<TransferObservation> = match observations {
    Some(path) => {
      let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading observations {}", path.display()))?;
      serde_json::from_str(&raw).context("parsing observations file")?
    }
    None => Vec::new(),
  };

  for obs in &observations {
    store.queue_push(&obs.from, Stage::Clustering).await?;
    store.queue_push(&obs.to, Stage::Clustering).await?;
  }
  let pending = store.queue_pending(Stage::Clustering).await?;

  let report = run_clustering(store, params, &observations).await?;

  // Marked only after the pass succeeded; a failed pass leaves every
  // item pending for the next run.
  for address in &pending {
    store
      .queue_mark(address, Stage::Clustering, QueueStatus::Completed)
      .await?;
    store.queue_push(address, Stage::Propagation).await?;
  }

  println!(
    "clustering: {} clusters, {} members, {} merges rejected",
    report.clusters_written, report.members_assigned, report.rejected_merges
  );
  Ok(())
}

// ─── propagate ────────────────────────────────────────────────────────────────

pub async fn propagate(
  store: &SqliteStore,
  params: &EngineParams,
) -> Result<()> {
  let pending = store.queue_pending(Stage::Propagation).await?;

  let report = run_propagation(store, params).await?;

  for address in &pending {
    store
      .queue_mark(address, Stage::Propagation, QueueStatus::Completed)
      .await?;
    store.queue_push(address, Stage::Cleanup).await?;
  }

  println!(
    "propagation: {} labels written, {} entities visited",
    report.labels_written, report.entities_visited
  );
  Ok(())
}

// ─── cleanup ──────────────────────────────────────────────────────────────────

pub async fn cleanup(store: &SqliteStore, params: &EngineParams) -> Result<()> {
  let pending = store.queue_pending(Stage::Cleanup).await?;

  let report = run_cleanup(store, params).await?;

  for address in &pending {
    store
      .queue_mark(address, Stage::Cleanup, QueueStatus::Completed)
      .await?;
  }

  println!(
    "cleanup: {} stripped, {} demoted, {} evicted",
    report.stripped, report.demoted, report.evicted
  );
  Ok(())
}

// ─── query ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct QueryArgs {
  /// Look up one address exactly (overrides the other filters).
  #[arg(long)]
  pub address: Option<String>,

  /// Case-insensitive substring match over identity labels.
  #[arg(long)]
  pub identity: Option<String>,

  /// Entity type (individual, fund, protocol, bot, exchange, unknown).
  #[arg(long)]
  pub entity_type: Option<EntityType>,

  /// Restrict to members of one cluster.
  #[arg(long, value_name = "UUID")]
  pub cluster: Option<Uuid>,

  /// Only entities at or above this confidence.
  #[arg(long)]
  pub min_confidence: Option<f64>,

  #[arg(long, default_value_t = 50)]
  pub limit: usize,

  /// Emit JSON instead of a table.
  #[arg(long)]
  pub json: bool,
}

pub async fn query(store: &SqliteStore, args: &QueryArgs) -> Result<()> {
  if let Some(raw) = &args.address {
    let address = Address::parse(raw).context("parsing --address")?;
    match store.get_entity(&address).await? {
      Some(entity) if args.json => {
        println!("{}", serde_json::to_string_pretty(&entity)?)
      }
      Some(entity) => print_entities(&[entity]),
      None => println!("no entity for {address}"),
    }
    return Ok(());
  }

  let query = EntityQuery {
    identity:       args.identity.clone(),
    entity_type:    args.entity_type,
    cluster_id:     args.cluster,
    min_confidence: args.min_confidence,
    limit:          Some(args.limit),
  };
  let entities = store.query_entities(&query).await?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&entities)?);
    return Ok(());
  }

  if entities.is_empty() {
    println!("no matching entities");
    return Ok(());
  }
  print_entities(&entities);
  Ok(())
}

fn print_entities(entities: &[Entity]) {
  println!(
    "{:<44} {:<32} {:>6}  {:<10} {}",
    "ADDRESS", "IDENTITY", "CONF", "TYPE", "CLUSTER"
  );
  for entity in entities {
    println!(
      "{:<44} {:<32} {:>6.2}  {:<10} {}",
      entity.address,
      entity.identity.as_deref().unwrap_or("-"),
      entity.confidence,
      entity.entity_type,
      entity
        .cluster_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".into()),
    );
  }
}

// ─── export ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ExportDump {
  entities:      Vec<Entity>,
  relationships: Vec<Relationship>,
  clusters:      Vec<walletscope_core::cluster::Cluster>,
}

pub async fn export(store: &SqliteStore, output: Option<&Path>) -> Result<()> {
  let mut relationships = Vec::new();
  for rel_type in [
    RelationshipType::SameEntity,
    RelationshipType::SameCluster,
    RelationshipType::FundedBy,
    RelationshipType::SharedDeposits,
    RelationshipType::TemporalCorrelation,
    RelationshipType::CounterpartyOverlap,
    RelationshipType::TradedWith,
  ] {
    relationships.extend(store.relationships_of_type(rel_type).await?);
  }

  let dump = ExportDump {
    entities: store.list_entities().await?,
    relationships,
    clusters: store.list_clusters().await?,
  };
  let json = serde_json::to_string_pretty(&dump)?;

  match output {
    Some(path) => {
      std::fs::write(path, &json)
        .with_context(|| format!("writing export to {}", path.display()))?;
      info!(
        path = %path.display(),
        entities = dump.entities.len(),
        "export written"
      );
    }
    None => println!("{json}"),
  }
  Ok(())
}
