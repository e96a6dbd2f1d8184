//! Label propagation with multiplicative confidence decay.
//!
//! Every independently-sourced identity seeds a best-candidate-first
//! traversal of the relationship graph. A neighbour reached over an edge
//! of confidence `e` and type weight `w` is offered the label at
//! `c * e * w`; the offer is written only when it strictly beats the
//! neighbour's current confidence, so propagation never downgrades a
//! better-supported identity. Newly labeled nodes keep propagating at
//! their already-decayed confidence — no re-inflation. Confidence
//! strictly decreases per hop and offers below the floor are dropped,
//! so the traversal is finite.
//!
//! Every propagated write appends a `propagation` evidence row, keeping
//! the decision auditable and reversible.

use std::{
  cmp::Ordering,
  collections::{BinaryHeap, HashMap},
};

use tracing::{debug, info};
use walletscope_core::{
  entity::Address,
  evidence::{EvidenceSource, NewEvidence},
  label::{base_identity, is_cleanup_state, is_propagated, mark_propagated},
  relationship::{Relationship, RelationshipType},
  store::GraphStore,
};

use crate::{
  error::{Error, Result},
  params::EngineParams,
};

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PropagationReport {
  /// Identities written onto previously weaker-labeled entities.
  pub labels_written:   usize,
  /// Nodes pulled from the frontier, labeled or not.
  pub entities_visited: usize,
}

// ─── Frontier entry ──────────────────────────────────────────────────────────

/// Max-heap entry; ordering on confidence alone, tie-broken by address
/// so the traversal is deterministic.
struct Offer {
  confidence: f64,
  address:    Address,
  /// Base identity text (marker-free); the marker is applied at write
  /// time.
  identity:   String,
}

impl PartialEq for Offer {
  fn eq(&self, other: &Self) -> bool {
    self.confidence == other.confidence && self.address == other.address
  }
}
impl Eq for Offer {}

impl Ord for Offer {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .confidence
      .total_cmp(&other.confidence)
      .then_with(|| other.address.cmp(&self.address))
  }
}
impl PartialOrd for Offer {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

// ─── Pass ────────────────────────────────────────────────────────────────────

/// Run the propagation pass over a snapshot of the graph.
pub async fn run_propagation<S: GraphStore>(
  store: &S,
  params: &EngineParams,
) -> Result<PropagationReport> {
  params.validate()?;

  let entities = store.list_entities().await.map_err(Error::store)?;

  // Adjacency snapshot across every edge type that carries weight.
  let mut adjacency: HashMap<Address, Vec<Relationship>> = HashMap::new();
  for rel_type in [
    RelationshipType::SameEntity,
    RelationshipType::SameCluster,
    RelationshipType::FundedBy,
    RelationshipType::SharedDeposits,
    RelationshipType::TemporalCorrelation,
    RelationshipType::CounterpartyOverlap,
    RelationshipType::TradedWith,
  ] {
    for edge in store
      .relationships_of_type(rel_type)
      .await
      .map_err(Error::store)?
    {
      adjacency
        .entry(edge.source.clone())
        .or_default()
        .push(edge.clone());
      adjacency.entry(edge.target.clone()).or_default().push(edge);
    }
  }

  // The bar each node's offer must beat: its current confidence.
  let mut best: HashMap<Address, f64> = entities
    .iter()
    .map(|e| (e.address.clone(), e.confidence))
    .collect();
  // Current base label per node, to avoid rewriting the same identity.
  let mut current: HashMap<Address, Option<String>> = entities
    .iter()
    .map(|e| {
      (
        e.address.clone(),
        e.identity.as_deref().map(|i| base_identity(i).to_owned()),
      )
    })
    .collect();
  // Which nodes carry the inherited marker. An unmarked label keeps its
  // text even when an offer raises its confidence.
  let mut inherited: HashMap<Address, bool> = entities
    .iter()
    .map(|e| {
      (
        e.address.clone(),
        e.identity.as_deref().is_some_and(is_propagated),
      )
    })
    .collect();

  let mut frontier: BinaryHeap<Offer> = BinaryHeap::new();
  for entity in &entities {
    let Some(identity) = entity.identity.as_deref() else { continue };
    // Only independently-sourced labels seed; inherited and cleanup-state
    // labels spread nothing on their own.
    if is_propagated(identity) || is_cleanup_state(identity) {
      continue;
    }
    if entity.confidence < params.propagation_floor {
      continue;
    }
    frontier.push(Offer {
      confidence: entity.confidence,
      address:    entity.address.clone(),
      identity:   base_identity(identity).to_owned(),
    });
  }

  let seed_count = frontier.len();
  let mut report = PropagationReport::default();

  while let Some(offer) = frontier.pop() {
    // Stale entry: a stronger offer already landed on this node.
    if best
      .get(&offer.address)
      .is_some_and(|&b| offer.confidence < b)
    {
      continue;
    }
    report.entities_visited += 1;

    let Some(edges) = adjacency.get(&offer.address) else { continue };
    for edge in edges {
      let neighbour = edge.other(&offer.address);
      let candidate =
        offer.confidence * edge.confidence * edge.relationship_type.weight();
      if candidate < params.propagation_floor {
        continue;
      }
      let bar = best.get(neighbour).copied().unwrap_or(0.0);
      if candidate <= bar {
        continue;
      }
      let same_label = current
        .get(neighbour)
        .and_then(|c| c.as_deref())
        .is_some_and(|c| c == offer.identity);
      // An independently-sourced label with the same base text only has
      // its confidence raised; marking it would erase its standing as a
      // conflict witness.
      let keep_text =
        same_label && !inherited.get(neighbour).copied().unwrap_or(false);

      let written = if keep_text {
        offer.identity.clone()
      } else {
        mark_propagated(&offer.identity)
      };
      store
        .set_identity(neighbour, Some(written.clone()), candidate)
        .await
        .map_err(Error::store)?;
      if !same_label {
        debug!(
          target_addr = %neighbour, identity = %offer.identity,
          confidence = candidate, "label propagated"
        );
      }
      store
        .add_evidence(
          NewEvidence::new(
            neighbour.clone(),
            EvidenceSource::Propagation,
            written,
            candidate,
          )
          .with_raw_data(serde_json::json!({
            "from": offer.address,
            "edge_type": edge.relationship_type.to_string(),
            "edge_confidence": edge.confidence,
            "decayed_from": offer.confidence,
          })),
        )
        .await
        .map_err(Error::store)?;

      best.insert(neighbour.clone(), candidate);
      current.insert(neighbour.clone(), Some(offer.identity.clone()));
      inherited.insert(neighbour.clone(), !keep_text);
      report.labels_written += 1;

      frontier.push(Offer {
        confidence: candidate,
        address:    neighbour.clone(),
        identity:   offer.identity.clone(),
      });
    }
  }

  info!(
    seeds = seed_count,
    labels = report.labels_written,
    visited = report.entities_visited,
    "propagation pass complete"
  );
  Ok(report)
}
