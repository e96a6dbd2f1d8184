//! Conflict resolver — audits propagated labels and cluster membership.
//!
//! Three checks, run in a fixed order because later checks depend on
//! earlier ones having removed the most obviously broken cases:
//!
//! 1. high-conflict strip: a propagated-only label contradicted by
//!    three or more distinct independent neighbour identities carries no
//!    signal and becomes an explicit `conflicted` state;
//! 2. cross-cluster demotion: one or two contradictions demote the
//!    label to `unverified (previously X)`, keeping the old label in
//!    the audit trail;
//! 3. cluster outlier removal: members whose timezone signal disagrees
//!    with the cluster majority are evicted (cluster_id cleared, edges
//!    removed — the entity row stays).
//!
//! Every check is idempotent: stripped and demoted identities are
//! unmarked, so a second run finds nothing new to do, and check 3
//! recomputes an unchanged majority with no disagreeing members left.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};
use walletscope_core::{
  entity::{Address, Entity},
  evidence::{EvidenceSource, NewEvidence},
  label::{
    CONFLICTED_IDENTITY, base_identity, demoted_identity, is_cleanup_state,
    is_propagated,
  },
  store::GraphStore,
};

use crate::{
  error::{Error, Result},
  params::EngineParams,
};

/// Confidence assigned to a stripped (`conflicted`) identity.
const STRIPPED_CONFIDENCE: f64 = 0.20;
/// Confidence assigned to a demoted (`unverified …`) identity.
const DEMOTED_CONFIDENCE: f64 = 0.35;
/// Distinct contradicting identities at which a label is stripped
/// outright rather than demoted.
const STRIP_THRESHOLD: usize = 3;

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
  pub stripped: usize,
  pub demoted:  usize,
  pub evicted:  usize,
}

// ─── Conflict counting ───────────────────────────────────────────────────────

/// Distinct independently-sourced base identities among
/// correlation-class neighbours that contradict `entity`'s own base
/// label. Labels differing only by the propagation marker count as the
/// same identity.
async fn conflicting_identities<S: GraphStore>(
  store: &S,
  entity: &Entity,
  own_base: &str,
  params: &EngineParams,
) -> Result<BTreeSet<String>> {
  let mut conflicts = BTreeSet::new();

  let edges = store
    .relationships_of(&entity.address)
    .await
    .map_err(Error::store)?;
  for edge in edges {
    if !edge.relationship_type.is_correlation_class() {
      continue;
    }
    if edge.confidence < params.conflict_edge_min_confidence {
      continue;
    }
    let neighbour_addr = edge.other(&entity.address).clone();
    let Some(neighbour) =
      store.get_entity(&neighbour_addr).await.map_err(Error::store)?
    else {
      continue;
    };
    let Some(identity) = neighbour.identity.as_deref() else { continue };
    // Only independently-sourced neighbour labels are witnesses.
    if is_propagated(identity) || is_cleanup_state(identity) {
      continue;
    }
    let base = base_identity(identity);
    if base != own_base {
      conflicts.insert(base.to_owned());
    }
  }

  Ok(conflicts)
}

/// Propagated-only entities: label carries the marker and no independent
/// evidence backs the address.
async fn propagated_only<S: GraphStore>(
  store: &S,
) -> Result<Vec<(Entity, String)>> {
  let mut out = Vec::new();
  for entity in store.list_entities().await.map_err(Error::store)? {
    let Some(identity) = entity.identity.clone() else { continue };
    if !is_propagated(&identity) {
      continue;
    }
    if store
      .has_independent_evidence(&entity.address)
      .await
      .map_err(Error::store)?
    {
      // Independent evidence outranks a propagation conflict.
      continue;
    }
    let base = base_identity(&identity).to_owned();
    out.push((entity, base));
  }
  Ok(out)
}

// ─── Checks ──────────────────────────────────────────────────────────────────

/// Check 1: strip labels contradicted by three or more distinct
/// identities.
async fn strip_high_conflict<S: GraphStore>(
  store: &S,
  params: &EngineParams,
  report: &mut CleanupReport,
) -> Result<()> {
  for (entity, own_base) in propagated_only(store).await? {
    let conflicts =
      conflicting_identities(store, &entity, &own_base, params).await?;
    if conflicts.len() < STRIP_THRESHOLD {
      continue;
    }

    warn!(
      address = %entity.address, previous = %own_base,
      conflicts = conflicts.len(), "stripping high-conflict label"
    );
    store
      .set_identity(
        &entity.address,
        Some(CONFLICTED_IDENTITY.to_owned()),
        STRIPPED_CONFIDENCE,
      )
      .await
      .map_err(Error::store)?;
    store
      .add_evidence(
        NewEvidence::new(
          entity.address.clone(),
          EvidenceSource::Cleanup,
          "",
          STRIPPED_CONFIDENCE,
        )
        .with_raw_data(serde_json::json!({
          "action": "conflict_strip",
          "previous": own_base,
          "conflicting_identities": conflicts,
        })),
      )
      .await
      .map_err(Error::store)?;
    report.stripped += 1;
  }
  Ok(())
}

/// Check 2: demote labels with one or two contradictions.
async fn demote_cross_cluster<S: GraphStore>(
  store: &S,
  params: &EngineParams,
  report: &mut CleanupReport,
) -> Result<()> {
  for (entity, own_base) in propagated_only(store).await? {
    let conflicts =
      conflicting_identities(store, &entity, &own_base, params).await?;
    if conflicts.is_empty() || conflicts.len() >= STRIP_THRESHOLD {
      continue;
    }

    info!(
      address = %entity.address, previous = %own_base,
      conflicts = conflicts.len(), "demoting cross-cluster label"
    );
    store
      .set_identity(
        &entity.address,
        Some(demoted_identity(&own_base)),
        DEMOTED_CONFIDENCE,
      )
      .await
      .map_err(Error::store)?;
    store
      .add_evidence(
        NewEvidence::new(
          entity.address.clone(),
          EvidenceSource::Cleanup,
          "",
          DEMOTED_CONFIDENCE,
        )
        .with_raw_data(serde_json::json!({
          "action": "cross_cluster_demotion",
          "previous": own_base,
          "conflicting_identities": conflicts,
        })),
      )
      .await
      .map_err(Error::store)?;
    report.demoted += 1;
  }
  Ok(())
}

/// Check 3: evict cluster members whose timezone signal disagrees with
/// the member majority. Runs last so it sees membership already free of
/// the worst false merges.
async fn remove_cluster_outliers<S: GraphStore>(
  store: &S,
  report: &mut CleanupReport,
) -> Result<()> {
  for cluster in store.list_clusters().await.map_err(Error::store)? {
    let fingerprints = store
      .fingerprints_for_cluster(cluster.cluster_id)
      .await
      .map_err(Error::store)?;

    let signals: Vec<(Address, String)> = fingerprints
      .into_iter()
      .filter_map(|(member, fp)| fp.timezone_signal.map(|tz| (member, tz)))
      .collect();
    if signals.len() < 2 {
      continue;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, tz) in &signals {
      *counts.entry(tz.as_str()).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<&str> = counts
      .iter()
      .filter(|&(_, &n)| n == top)
      .map(|(&tz, _)| tz)
      .collect();
    // No clear majority: an eviction either way would be arbitrary.
    if leaders.len() != 1 {
      continue;
    }
    let majority = leaders[0].to_owned();

    let mut evicted_here = 0usize;
    for (member, tz) in &signals {
      if tz == &majority {
        continue;
      }
      warn!(
        address = %member, cluster = %cluster.cluster_id,
        member_tz = %tz, majority_tz = %majority, "evicting cluster outlier"
      );
      store
        .set_cluster(member, None)
        .await
        .map_err(Error::store)?;
      store
        .remove_same_cluster_edges(member)
        .await
        .map_err(Error::store)?;
      store
        .add_evidence(
          NewEvidence::new(
            member.clone(),
            EvidenceSource::Cleanup,
            "",
            DEMOTED_CONFIDENCE,
          )
          .with_raw_data(serde_json::json!({
            "action": "timezone_outlier_eviction",
            "cluster_id": cluster.cluster_id,
            "member_timezone": tz,
            "majority_timezone": majority,
          })),
        )
        .await
        .map_err(Error::store)?;
      evicted_here += 1;
      report.evicted += 1;
    }

    // A second run finds no disagreeing members and touches nothing.
    if evicted_here > 0 {
      store
        .update_cluster_size(cluster.cluster_id)
        .await
        .map_err(Error::store)?;
    }
  }
  Ok(())
}

// ─── Pass ────────────────────────────────────────────────────────────────────

/// Run all three cleanup checks in order.
pub async fn run_cleanup<S: GraphStore>(
  store: &S,
  params: &EngineParams,
) -> Result<CleanupReport> {
  params.validate()?;

  let mut report = CleanupReport::default();
  strip_high_conflict(store, params, &mut report).await?;
  demote_cross_cluster(store, params, &mut report).await?;
  remove_cluster_outliers(store, &mut report).await?;

  info!(
    stripped = report.stripped,
    demoted = report.demoted,
    evicted = report.evicted,
    "cleanup pass complete"
  );
  Ok(report)
}
