//! Common-ownership cluster builder.
//!
//! Infers `same_cluster` edges from indirect ownership signals: a shared
//! funding source within a short window, circular funding among a small
//! set of addresses, and shared custodial deposit destinations already
//! recorded as `shared_deposits` edges. Candidate pairs are coalesced
//! with a union-find, guarded against the failure modes that make naive
//! transitive clustering explode: shared infrastructure, size runaway,
//! under-corroborated joins into large clusters, and merges across
//! distinct verified identities.
//!
//! A rejected merge is not an error. It is logged with its blocking
//! guardrail and the pair is retained as a weaker `temporal_correlation`
//! edge, preserving the signal as future evidence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walletscope_core::{
  cluster::Cluster,
  entity::{Address, Entity},
  evidence::{EvidenceSource, NewEvidence},
  label::{base_identity, is_cleanup_state, is_propagated},
  relationship::{RelationshipType, canonical_pair},
  store::GraphStore,
};

use crate::{
  error::{Error, Result},
  params::EngineParams,
  unionfind::DisjointSet,
};

/// Link confidence assigned to a shared-funder candidate pair.
const SHARED_FUNDER_CONFIDENCE: f64 = 0.75;
/// Link confidence assigned to a circular-funding candidate pair.
const CIRCULAR_FUNDING_CONFIDENCE: f64 = 0.80;
/// Confidence of the downgraded edge kept for a rejected merge.
const REJECTED_EDGE_CONFIDENCE: f64 = 0.50;
/// Aggregate confidence cap, shared with evidence aggregation.
const CLUSTER_CONFIDENCE_CAP: f64 = 0.95;

// ─── Input ───────────────────────────────────────────────────────────────────

/// One observed transfer, handed over by an external collaborator
/// (the CLI loads a JSON batch of these).
#[derive(Debug, Clone, Deserialize)]
pub struct TransferObservation {
  pub from:        Address,
  pub to:          Address,
  pub observed_at: DateTime<Utc>,
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// What a clustering pass did, so callers can tell zero findings from
/// failure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterReport {
  pub clusters_written: usize,
  pub members_assigned: usize,
  pub rejected_merges:  usize,
}

// ─── Candidates ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Candidate {
  /// Strongest single link seen for the pair.
  confidence: f64,
  /// Independent corroborating links (events), not signal types.
  links:      usize,
  methods:    BTreeSet<&'static str>,
}

/// Candidate pairs keyed by canonical order; BTreeMap keeps the merge
/// order deterministic.
type Candidates = BTreeMap<(Address, Address), Candidate>;

fn add_candidate(
  candidates: &mut Candidates,
  a: &Address,
  b: &Address,
  confidence: f64,
  method: &'static str,
) {
  if a == b {
    return;
  }
  let key = canonical_pair(a.clone(), b.clone());
  let entry = candidates.entry(key).or_insert(Candidate {
    confidence: 0.0,
    links: 0,
    methods: BTreeSet::new(),
  });
  entry.confidence = entry.confidence.max(confidence);
  entry.links += 1;
  entry.methods.insert(method);
}

/// Recipients funded by one funder within the window of each other.
fn shared_funder_candidates(
  candidates: &mut Candidates,
  observations: &[TransferObservation],
  params: &EngineParams,
) {
  let mut by_funder: BTreeMap<&Address, Vec<&TransferObservation>> =
    BTreeMap::new();
  for obs in observations {
    if params.is_excluded(&obs.from) || params.is_excluded(&obs.to) {
      continue;
    }
    by_funder.entry(&obs.from).or_default().push(obs);
  }

  for (funder, mut group) in by_funder {
    group.sort_by_key(|obs| obs.observed_at);
    for (i, first) in group.iter().enumerate() {
      for second in &group[i + 1..] {
        let gap = second.observed_at - first.observed_at;
        if gap.num_seconds() > params.funding_window_secs {
          break;
        }
        debug!(%funder, a = %first.to, b = %second.to, "shared-funder candidate");
        add_candidate(
          candidates,
          &first.to,
          &second.to,
          SHARED_FUNDER_CONFIDENCE,
          "shared_funder",
        );
      }
    }
  }
}

/// Funding cycles of length 2 or 3 whose hops all fall within the
/// window. Every pair on the cycle becomes a candidate.
fn circular_funding_candidates(
  candidates: &mut Candidates,
  observations: &[TransferObservation],
  params: &EngineParams,
) {
  // Adjacency over non-excluded endpoints only.
  let mut edges: HashMap<&Address, Vec<(&Address, DateTime<Utc>)>> =
    HashMap::new();
  for obs in observations {
    if obs.from == obs.to
      || params.is_excluded(&obs.from)
      || params.is_excluded(&obs.to)
    {
      continue;
    }
    edges.entry(&obs.from).or_default().push((&obs.to, obs.observed_at));
  }

  let within = |times: &[DateTime<Utc>]| -> bool {
    let min = times.iter().min().copied();
    let max = times.iter().max().copied();
    match (min, max) {
      (Some(min), Some(max)) => {
        (max - min).num_seconds() <= params.funding_window_secs
      }
      _ => false,
    }
  };

  for (&a, outs) in &edges {
    for &(b, t_ab) in outs {
      // 2-cycle: a -> b -> a.
      if let Some(back) = edges.get(b) {
        for &(c, t_ba) in back {
          if c == a && a < b && within(&[t_ab, t_ba]) {
            add_candidate(
              candidates,
              a,
              b,
              CIRCULAR_FUNDING_CONFIDENCE,
              "circular_funding",
            );
          }
        }
      }
      // 3-cycle: a -> b -> c -> a; anchor on the smallest address so each
      // cycle is counted once.
      if let Some(from_b) = edges.get(b) {
        for &(c, t_bc) in from_b {
          if c == a || c == b {
            continue;
          }
          let Some(from_c) = edges.get(c) else { continue };
          for &(back, t_ca) in from_c {
            if back == a && a < b && a < c && within(&[t_ab, t_bc, t_ca]) {
              add_candidate(candidates, a, b, CIRCULAR_FUNDING_CONFIDENCE, "circular_funding");
              add_candidate(candidates, b, c, CIRCULAR_FUNDING_CONFIDENCE, "circular_funding");
              add_candidate(candidates, a, c, CIRCULAR_FUNDING_CONFIDENCE, "circular_funding");
            }
          }
        }
      }
    }
  }
}

/// `shared_deposits` edges written by collaborators are direct
/// candidates once they clear the confidence bar.
async fn shared_deposit_candidates<S: GraphStore>(
  store: &S,
  candidates: &mut Candidates,
  params: &EngineParams,
) -> Result<()> {
  let edges = store
    .relationships_of_type(RelationshipType::SharedDeposits)
    .await
    .map_err(Error::store)?;

  for edge in edges {
    if edge.confidence < params.shared_deposit_min_confidence {
      continue;
    }
    if params.is_excluded(&edge.source) || params.is_excluded(&edge.target) {
      continue;
    }
    add_candidate(
      candidates,
      &edge.source,
      &edge.target,
      edge.confidence,
      "shared_deposits",
    );
  }
  Ok(())
}

// ─── Verified identities ─────────────────────────────────────────────────────

/// The self-declared identity that can veto a merge: unmarked (not
/// inherited through propagation) and not a cleanup end-state.
fn verified_identity(entity: &Entity) -> Option<String> {
  let identity = entity.identity.as_deref()?;
  if is_propagated(identity) || is_cleanup_state(identity) {
    return None;
  }
  Some(base_identity(identity).to_owned())
}

// ─── Pass ────────────────────────────────────────────────────────────────────

/// Run the clustering pass: derive candidate pairs from the observation
/// batch and the stored graph, coalesce them under the guardrails, and
/// persist the surviving clusters with both membership representations
/// rewritten consistently.
pub async fn run_clustering<S: GraphStore>(
  store: &S,
  params: &EngineParams,
  observations: &[TransferObservation],
) -> Result<ClusterReport> {
  params.validate()?;

  let mut candidates = Candidates::new();
  shared_funder_candidates(&mut candidates, observations, params);
  circular_funding_candidates(&mut candidates, observations, params);
  shared_deposit_candidates(store, &mut candidates, params).await?;

  if candidates.is_empty() {
    info!("clustering pass: no candidate pairs");
    return Ok(ClusterReport::default());
  }

  // Snapshot of entity state for the identity veto.
  let entities: HashMap<Address, Entity> = store
    .list_entities()
    .await
    .map_err(Error::store)?
    .into_iter()
    .map(|e| (e.address.clone(), e))
    .collect();

  // Index every address appearing in a candidate.
  let mut addresses: Vec<Address> = candidates
    .keys()
    .flat_map(|(a, b)| [a.clone(), b.clone()])
    .collect();
  addresses.sort();
  addresses.dedup();
  let index: HashMap<&Address, usize> =
    addresses.iter().enumerate().map(|(i, a)| (a, i)).collect();

  let mut ds = DisjointSet::new(addresses.len());
  // Verified identities per component root, maintained across unions.
  let mut identities: HashMap<usize, BTreeSet<String>> = HashMap::new();
  for (i, addr) in addresses.iter().enumerate() {
    if let Some(id) = entities.get(addr).and_then(verified_identity) {
      identities.entry(i).or_default().insert(id);
    }
  }

  // Strongest-first merge order: corroboration, then confidence, then
  // pair order for determinism.
  let mut ordered: Vec<(&(Address, Address), &Candidate)> =
    candidates.iter().collect();
  ordered.sort_by(|(pa, ca), (pb, cb)| {
    cb.links
      .cmp(&ca.links)
      .then(cb.confidence.total_cmp(&ca.confidence))
      .then(pa.cmp(pb))
  });

  let mut rejected: Vec<((Address, Address), &'static str)> = Vec::new();

  for (pair, candidate) in ordered {
    let (a, b) = pair;
    let ia = index[a];
    let ib = index[b];
    let ra = ds.find(ia);
    let rb = ds.find(ib);
    if ra == rb {
      continue;
    }

    let size_a = ds.size_of(ra);
    let size_b = ds.size_of(rb);

    if size_a + size_b > params.max_cluster_size {
      warn!(
        a = %a, b = %b, combined = size_a + size_b,
        guardrail = "size_cap", "merge rejected"
      );
      rejected.push((pair.clone(), "size_cap"));
      continue;
    }

    if size_a.max(size_b) >= params.large_cluster_threshold
      && candidate.links < params.required_corroboration
    {
      warn!(
        a = %a, b = %b, links = candidate.links,
        guardrail = "insufficient_corroboration", "merge rejected"
      );
      rejected.push((pair.clone(), "insufficient_corroboration"));
      continue;
    }

    let ids_a = identities.get(&ra).cloned().unwrap_or_default();
    let ids_b = identities.get(&rb).cloned().unwrap_or_default();
    let merged: BTreeSet<String> = ids_a.union(&ids_b).cloned().collect();
    if merged.len() >= 2 {
      warn!(
        a = %a, b = %b, identities = ?merged,
        guardrail = "identity_conflict", "merge rejected"
      );
      rejected.push((pair.clone(), "identity_conflict"));
      continue;
    }

    let root = ds.union(ia, ib);
    identities.remove(&ra);
    identities.remove(&rb);
    if !merged.is_empty() {
      identities.insert(root, merged);
    }
  }

  // Collect components of two or more members.
  let mut components: BTreeMap<usize, Vec<Address>> = BTreeMap::new();
  for (i, addr) in addresses.iter().enumerate() {
    components.entry(ds.find(i)).or_default().push(addr.clone());
  }
  components.retain(|_, members| members.len() >= 2);

  let mut report = ClusterReport { rejected_merges: rejected.len(), ..Default::default() };

  for members in components.into_values() {
    // A merge absorbs existing clusters whole: pull in every member of
    // every cluster any component member already belongs to.
    let mut full: BTreeSet<Address> = members.iter().cloned().collect();
    let mut old_ids: BTreeSet<Uuid> = BTreeSet::new();
    // Membership is read back from the store, not the pass-start
    // snapshot: an earlier component in this loop may already have
    // merged and retired a cluster these members belonged to.
    for member in &members {
      let current = store.get_entity(member).await.map_err(Error::store)?;
      if let Some(id) = current.and_then(|e| e.cluster_id) {
        old_ids.insert(id);
      }
    }
    for &id in &old_ids {
      let existing = store.cluster_members(id).await.map_err(Error::store)?;
      full.extend(existing);
    }

    // Validation pass: guardrails re-checked against the final
    // membership, since violations can emerge only after merges compose.
    if full.len() > params.max_cluster_size {
      warn!(
        members = full.len(),
        guardrail = "size_cap", "cluster rejected at validation"
      );
      for pair in component_pairs(&members, &candidates) {
        rejected.push((pair, "size_cap"));
        report.rejected_merges += 1;
      }
      continue;
    }
    let distinct: BTreeSet<String> = full
      .iter()
      .filter_map(|a| entities.get(a).and_then(verified_identity))
      .collect();
    if distinct.len() >= 2 {
      warn!(
        identities = ?distinct,
        guardrail = "identity_conflict", "cluster rejected at validation"
      );
      for pair in component_pairs(&members, &candidates) {
        rejected.push((pair, "identity_conflict"));
        report.rejected_merges += 1;
      }
      continue;
    }

    persist_cluster(store, &full, &old_ids, &candidates, &mut report).await?;
  }

  // A rejected merge keeps its signal as a weaker correlation edge.
  for ((a, b), guardrail) in rejected {
    info!(%a, %b, guardrail, "retaining rejected candidate as correlation edge");
    store
      .add_relationship(
        a,
        b,
        RelationshipType::TemporalCorrelation,
        REJECTED_EDGE_CONFIDENCE,
      )
      .await
      .map_err(Error::store)?;
  }

  info!(
    clusters = report.clusters_written,
    members = report.members_assigned,
    rejected = report.rejected_merges,
    "clustering pass complete"
  );
  Ok(report)
}

/// Candidate pairs internal to a component, for downgrading on rejection.
fn component_pairs(
  members: &[Address],
  candidates: &Candidates,
) -> Vec<(Address, Address)> {
  let set: BTreeSet<&Address> = members.iter().collect();
  candidates
    .keys()
    .filter(|(a, b)| set.contains(a) && set.contains(b))
    .cloned()
    .collect()
}

/// Write one cluster: rewrite `cluster_id` on every member, replace the
/// `same_cluster` edge set with exactly the member pairs, retire merged
/// cluster rows, and leave a `cluster_analysis` evidence row per member.
async fn persist_cluster<S: GraphStore>(
  store: &S,
  members: &BTreeSet<Address>,
  old_ids: &BTreeSet<Uuid>,
  candidates: &Candidates,
  report: &mut ClusterReport,
) -> Result<()> {
  let member_vec: Vec<Address> = members.iter().cloned().collect();

  // Confidence and formation methods from the links internal to the
  // final membership.
  let internal: Vec<&Candidate> = candidates
    .iter()
    .filter(|((a, b), _)| members.contains(a) && members.contains(b))
    .map(|(_, c)| c)
    .collect();
  let confidence = if internal.is_empty() {
    SHARED_FUNDER_CONFIDENCE
  } else {
    (internal.iter().map(|c| c.confidence).sum::<f64>() / internal.len() as f64)
      .min(CLUSTER_CONFIDENCE_CAP)
  };
  let methods: BTreeSet<&'static str> =
    internal.iter().flat_map(|c| c.methods.iter().copied()).collect();
  let method = if methods.is_empty() {
    "merge".to_owned()
  } else {
    methods.into_iter().collect::<Vec<_>>().join(",")
  };

  // Reuse the id when extending a single existing cluster; otherwise a
  // fresh id replaces whatever was merged.
  let (reuse, cluster_id) = match old_ids.iter().copied().collect::<Vec<_>>()[..] {
    [only] => (true, only),
    _ => (false, Uuid::new_v4()),
  };

  if !reuse {
    let retired: Vec<Uuid> = old_ids.iter().copied().collect();
    store.retire_clusters(&retired).await.map_err(Error::store)?;
    store
      .create_cluster(Cluster {
        cluster_id,
        label: format!("common-ownership cluster {}", &cluster_id.to_string()[..8]),
        method: method.clone(),
        confidence,
        member_count: member_vec.len(),
        created_at: Utc::now(),
      })
      .await
      .map_err(Error::store)?;
  }

  // Rewrite both membership representations. Stale edges from the
  // pre-merge state are dropped first so no duplicates survive.
  for member in &member_vec {
    store
      .remove_same_cluster_edges(member)
      .await
      .map_err(Error::store)?;
  }
  for member in &member_vec {
    store
      .set_cluster(member, Some(cluster_id))
      .await
      .map_err(Error::store)?;
    store
      .add_evidence(
        NewEvidence::new(
          member.clone(),
          EvidenceSource::ClusterAnalysis,
          "",
          confidence,
        )
        .with_raw_data(serde_json::json!({
          "cluster_id": cluster_id,
          "method": method,
          "member_count": member_vec.len(),
        })),
      )
      .await
      .map_err(Error::store)?;
  }
  for (i, a) in member_vec.iter().enumerate() {
    for b in &member_vec[i + 1..] {
      store
        .add_relationship(
          a.clone(),
          b.clone(),
          RelationshipType::SameCluster,
          confidence,
        )
        .await
        .map_err(Error::store)?;
    }
  }

  store
    .update_cluster_size(cluster_id)
    .await
    .map_err(Error::store)?;

  report.clusters_written += 1;
  report.members_assigned += member_vec.len();
  Ok(())
}
