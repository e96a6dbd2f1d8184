//! Scenario tests for the analysis passes, run against an in-memory
//! store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use walletscope_core::{
  cluster::BehavioralFingerprint,
  entity::Address,
  evidence::{EvidenceSource, NewEvidence},
  relationship::RelationshipType,
  store::GraphStore,
};
use walletscope_store_sqlite::SqliteStore;

use crate::{
  cleanup::run_cleanup,
  cluster::{TransferObservation, run_clustering},
  params::EngineParams,
  propagate::run_propagation,
  reassess::reassess_entity,
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn addr(n: u32) -> Address {
  Address::parse(&format!("0x{n:040x}")).expect("valid test address")
}

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// Transfer `from -> to` at `t0 + minutes`.
fn obs(from: u32, to: u32, minutes: i64) -> TransferObservation {
  TransferObservation {
    from:        addr(from),
    to:          addr(to),
    observed_at: t0() + Duration::minutes(minutes),
  }
}

async fn verified(store: &SqliteStore, n: u32, identity: &str, conf: f64) {
  store
    .set_identity(&addr(n), Some(identity.into()), conf)
    .await
    .unwrap();
}

// ─── Clustering ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn circular_funding_forms_cluster() {
  let s = store().await;
  let params = EngineParams::default();

  let report = run_clustering(
    &s,
    &params,
    &[obs(1, 2, 0), obs(2, 3, 10), obs(3, 1, 20)],
  )
  .await
  .unwrap();

  assert_eq!(report.clusters_written, 1);
  assert_eq!(report.members_assigned, 3);
  assert_eq!(report.rejected_merges, 0);

  let clusters = s.list_clusters().await.unwrap();
  assert_eq!(clusters.len(), 1);
  assert_eq!(clusters[0].member_count, 3);
  assert!(clusters[0].method.contains("circular_funding"));

  // All three members point at the same cluster and carry the full
  // pairwise edge set.
  let id = clusters[0].cluster_id;
  for n in 1..=3 {
    let e = s.get_entity(&addr(n)).await.unwrap().unwrap();
    assert_eq!(e.cluster_id, Some(id));
  }
  let edges = s
    .relationships_of_type(RelationshipType::SameCluster)
    .await
    .unwrap();
  assert_eq!(edges.len(), 3);

  // Each member picked up a cluster_analysis evidence row.
  let rows = s.evidence_for(&addr(1)).await.unwrap();
  assert!(rows.iter().any(|e| e.source == EvidenceSource::ClusterAnalysis));
}

#[tokio::test]
async fn shared_funder_respects_window() {
  let s = store().await;
  let params = EngineParams::default();

  // A and B funded an hour apart; C ten hours later falls outside the
  // six-hour window.
  run_clustering(
    &s,
    &params,
    &[obs(9, 1, 0), obs(9, 2, 60), obs(9, 3, 600)],
  )
  .await
  .unwrap();

  let clusters = s.list_clusters().await.unwrap();
  assert_eq!(clusters.len(), 1);
  assert_eq!(clusters[0].member_count, 2);

  // The out-of-window recipient never joined anything.
  let c = s.get_entity(&addr(3)).await.unwrap();
  assert!(c.is_none_or(|e| e.cluster_id.is_none()));
}

#[tokio::test]
async fn shared_infrastructure_contributes_no_signal() {
  let s = store().await;
  let params = EngineParams::default();
  let router = params.exclusions[0].clone();

  let report = run_clustering(
    &s,
    &params,
    &[
      TransferObservation { from: router.clone(), to: addr(1), observed_at: t0() },
      TransferObservation {
        from:        router,
        to:          addr(2),
        observed_at: t0() + Duration::minutes(5),
      },
    ],
  )
  .await
  .unwrap();

  assert_eq!(report.clusters_written, 0);
  assert!(s.list_clusters().await.unwrap().is_empty());
}

#[tokio::test]
async fn identity_conflict_vetoes_merge() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.9).await;
  verified(&s, 2, "Bob", 0.9).await;

  let report =
    run_clustering(&s, &params, &[obs(9, 1, 0), obs(9, 2, 30)]).await.unwrap();

  assert_eq!(report.clusters_written, 0);
  assert_eq!(report.rejected_merges, 1);
  assert!(s.list_clusters().await.unwrap().is_empty());

  // The rejected pair is retained as a weaker correlation edge.
  let edges = s
    .relationships_of_type(RelationshipType::TemporalCorrelation)
    .await
    .unwrap();
  assert_eq!(edges.len(), 1);
  assert_eq!(edges[0].confidence, 0.5);
}

#[tokio::test]
async fn size_cap_rejects_runaway_merge() {
  let s = store().await;
  let params = EngineParams { max_cluster_size: 2, ..Default::default() };

  let report = run_clustering(
    &s,
    &params,
    &[obs(1, 2, 0), obs(2, 3, 10), obs(3, 1, 20)],
  )
  .await
  .unwrap();

  assert!(report.rejected_merges >= 1);
  for cluster in s.list_clusters().await.unwrap() {
    assert!(cluster.member_count <= 2);
  }
}

#[tokio::test]
async fn merging_clusters_retires_old_rows_completely() {
  let s = store().await;
  let params = EngineParams::default();

  // Two separate clusters from two funders.
  run_clustering(&s, &params, &[obs(8, 1, 0), obs(8, 2, 30)]).await.unwrap();
  run_clustering(&s, &params, &[obs(9, 3, 0), obs(9, 4, 30)]).await.unwrap();
  let old: Vec<_> = s
    .list_clusters()
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.cluster_id)
    .collect();
  assert_eq!(old.len(), 2);

  // A bridge between members 2 and 3 merges everything.
  run_clustering(&s, &params, &[obs(7, 2, 0), obs(7, 3, 30)]).await.unwrap();

  let clusters = s.list_clusters().await.unwrap();
  assert_eq!(clusters.len(), 1);
  let merged = &clusters[0];
  assert_eq!(merged.member_count, 4);
  assert!(!old.contains(&merged.cluster_id));

  for n in 1..=4 {
    let e = s.get_entity(&addr(n)).await.unwrap().unwrap();
    assert_eq!(e.cluster_id, Some(merged.cluster_id));
  }
  // Both membership representations rewritten: exactly C(4, 2) edges.
  let edges = s
    .relationships_of_type(RelationshipType::SameCluster)
    .await
    .unwrap();
  assert_eq!(edges.len(), 6);
}

#[tokio::test]
async fn later_component_sees_freshly_merged_cluster() {
  let s = store().await;
  let params = EngineParams::default();

  // Two pre-existing clusters from two funders.
  run_clustering(&s, &params, &[obs(8, 1, 0), obs(8, 2, 30)]).await.unwrap();
  run_clustering(&s, &params, &[obs(9, 3, 0), obs(9, 4, 30)]).await.unwrap();

  // One pass with two disjoint components: {1,3} bridges both clusters,
  // {4,5} touches only the second. The second component must see the
  // merged cluster, not the id retired moments earlier.
  s.add_relationship(addr(1), addr(3), RelationshipType::SharedDeposits, 0.8)
    .await
    .unwrap();
  s.add_relationship(addr(4), addr(5), RelationshipType::SharedDeposits, 0.8)
    .await
    .unwrap();
  run_clustering(&s, &params, &[]).await.unwrap();

  let clusters = s.list_clusters().await.unwrap();
  assert_eq!(clusters.len(), 1);
  let id = clusters[0].cluster_id;
  assert_eq!(clusters[0].member_count, 5);
  assert_eq!(s.cluster_members(id).await.unwrap().len(), 5);

  // Nobody references a retired id and the edge set is exactly C(5, 2).
  for n in 1..=5 {
    let e = s.get_entity(&addr(n)).await.unwrap().unwrap();
    assert_eq!(e.cluster_id, Some(id));
  }
  let edges = s
    .relationships_of_type(RelationshipType::SameCluster)
    .await
    .unwrap();
  assert_eq!(edges.len(), 10);
}

#[tokio::test]
async fn shared_deposit_edges_seed_clusters() {
  let s = store().await;
  let params = EngineParams::default();
  s.add_relationship(addr(1), addr(2), RelationshipType::SharedDeposits, 0.85)
    .await
    .unwrap();

  let report = run_clustering(&s, &params, &[]).await.unwrap();
  assert_eq!(report.clusters_written, 1);
  assert_eq!(report.members_assigned, 2);
}

// ─── Propagation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn propagation_decays_multiplicatively() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.9).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();
  s.add_relationship(addr(2), addr(3), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();
  s.ensure_entity(addr(2)).await.unwrap();
  s.ensure_entity(addr(3)).await.unwrap();

  let report = run_propagation(&s, &params).await.unwrap();
  assert_eq!(report.labels_written, 2);

  // One hop: 0.9 * 0.9 * 0.90.
  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert_eq!(b.identity.as_deref(), Some("Alice (associated)"));
  assert!((b.confidence - 0.729).abs() < 1e-9);

  // Two hops keep decaying from the already-decayed value.
  let c = s.get_entity(&addr(3)).await.unwrap().unwrap();
  assert_eq!(c.identity.as_deref(), Some("Alice (associated)"));
  assert!((c.confidence - 0.729 * 0.81).abs() < 1e-9);
  assert!(c.confidence < b.confidence);

  // Every write left a propagation evidence row.
  let rows = s.evidence_for(&addr(2)).await.unwrap();
  assert!(rows.iter().any(|e| e.source == EvidenceSource::Propagation));
}

#[tokio::test]
async fn propagation_never_downgrades_stronger_labels() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.9).await;
  verified(&s, 2, "Bob", 0.95).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();

  run_propagation(&s, &params).await.unwrap();

  let a = s.get_entity(&addr(1)).await.unwrap().unwrap();
  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert_eq!(a.identity.as_deref(), Some("Alice"));
  assert_eq!(a.confidence, 0.9);
  assert_eq!(b.identity.as_deref(), Some("Bob"));
  assert_eq!(b.confidence, 0.95);
}

#[tokio::test]
async fn propagation_stops_at_floor() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.5).await;
  // traded_with decays at 0.40: 0.5 * 0.8 * 0.40 = 0.16, under the floor.
  s.add_relationship(addr(1), addr(2), RelationshipType::TradedWith, 0.8)
    .await
    .unwrap();
  s.ensure_entity(addr(2)).await.unwrap();

  let report = run_propagation(&s, &params).await.unwrap();
  assert_eq!(report.labels_written, 0);
  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert!(b.identity.is_none());
}

#[tokio::test]
async fn propagation_is_idempotent() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.9).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();
  s.ensure_entity(addr(2)).await.unwrap();

  let first = run_propagation(&s, &params).await.unwrap();
  assert_eq!(first.labels_written, 1);
  let evidence_after_first = s.evidence_for(&addr(2)).await.unwrap().len();

  let second = run_propagation(&s, &params).await.unwrap();
  assert_eq!(second.labels_written, 0);
  // No marker stacking and no duplicate evidence on the second run.
  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert_eq!(b.identity.as_deref(), Some("Alice (associated)"));
  assert_eq!(s.evidence_for(&addr(2)).await.unwrap().len(), evidence_after_first);
}

#[tokio::test]
async fn matching_independent_label_keeps_its_text() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Alice", 0.9).await;
  // Address 2 already carries the same label from its own source.
  verified(&s, 2, "Alice", 0.4).await;
  s.add_evidence(NewEvidence::new(
    addr(2),
    EvidenceSource::VerifiedLabel,
    "Alice",
    0.4,
  ))
  .await
  .unwrap();
  s.add_relationship(addr(1), addr(2), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();

  run_propagation(&s, &params).await.unwrap();

  // Confidence rises, but the label stays marker-free: the node is
  // still an independently-sourced witness.
  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert_eq!(b.identity.as_deref(), Some("Alice"));
  assert!((b.confidence - 0.729).abs() < 1e-9);
}

#[tokio::test]
async fn inherited_labels_do_not_seed() {
  let s = store().await;
  let params = EngineParams::default();
  s.set_identity(&addr(1), Some("Alice (associated)".into()), 0.8)
    .await
    .unwrap();
  s.add_relationship(addr(1), addr(2), RelationshipType::SameCluster, 0.9)
    .await
    .unwrap();
  s.ensure_entity(addr(2)).await.unwrap();

  let report = run_propagation(&s, &params).await.unwrap();
  assert_eq!(report.labels_written, 0);
}

// ─── Cleanup ─────────────────────────────────────────────────────────────────

/// Give `n` a propagated-only label (marker plus propagation evidence,
/// nothing independent).
async fn propagated_label(store: &SqliteStore, n: u32, base: &str, conf: f64) {
  let marked = format!("{base} (associated)");
  store
    .set_identity(&addr(n), Some(marked.clone()), conf)
    .await
    .unwrap();
  store
    .add_evidence(NewEvidence::new(
      addr(n),
      EvidenceSource::Propagation,
      &marked,
      conf,
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn high_conflict_label_is_stripped() {
  let s = store().await;
  let params = EngineParams::default();
  propagated_label(&s, 1, "Mallory", 0.6).await;
  for (n, name) in [(2, "Alice"), (3, "Bob"), (4, "Carol")] {
    verified(&s, n, name, 0.9).await;
    s.add_relationship(addr(1), addr(n), RelationshipType::TemporalCorrelation, 0.8)
      .await
      .unwrap();
  }

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.stripped, 1);
  assert_eq!(report.demoted, 0);

  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.identity.as_deref(), Some("conflicted"));
  assert_eq!(e.confidence, 0.20);

  // The strip left an audit row naming the witnesses.
  let rows = s.evidence_for(&addr(1)).await.unwrap();
  let audit = rows.iter().find(|e| e.source == EvidenceSource::Cleanup).unwrap();
  assert_eq!(audit.raw_data["action"], "conflict_strip");
  assert_eq!(audit.raw_data["previous"], "Mallory");
}

#[tokio::test]
async fn minor_conflict_demotes_instead() {
  let s = store().await;
  let params = EngineParams::default();
  propagated_label(&s, 1, "Mallory", 0.6).await;
  verified(&s, 2, "Alice", 0.9).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::CounterpartyOverlap, 0.8)
    .await
    .unwrap();

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.stripped, 0);
  assert_eq!(report.demoted, 1);

  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.identity.as_deref(), Some("unverified (previously Mallory)"));
  assert_eq!(e.confidence, 0.35);
}

#[tokio::test]
async fn independent_evidence_shields_from_cleanup() {
  let s = store().await;
  let params = EngineParams::default();
  propagated_label(&s, 1, "Mallory", 0.6).await;
  s.add_evidence(NewEvidence::new(
    addr(1),
    EvidenceSource::SelfDeclared,
    "mallory.eth",
    0.55,
  ))
  .await
  .unwrap();
  for (n, name) in [(2, "Alice"), (3, "Bob"), (4, "Carol")] {
    verified(&s, n, name, 0.9).await;
    s.add_relationship(addr(1), addr(n), RelationshipType::TemporalCorrelation, 0.8)
      .await
      .unwrap();
  }

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.stripped, 0);
  assert_eq!(report.demoted, 0);
  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.identity.as_deref(), Some("Mallory (associated)"));
}

#[tokio::test]
async fn matching_neighbours_are_not_conflicts() {
  let s = store().await;
  let params = EngineParams::default();
  propagated_label(&s, 1, "Alice", 0.6).await;
  // The neighbour agrees modulo the marker; no conflict.
  verified(&s, 2, "Alice", 0.9).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::TemporalCorrelation, 0.8)
    .await
    .unwrap();

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.stripped + report.demoted, 0);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
  let s = store().await;
  let params = EngineParams::default();
  propagated_label(&s, 1, "Mallory", 0.6).await;
  verified(&s, 2, "Alice", 0.9).await;
  s.add_relationship(addr(1), addr(2), RelationshipType::TemporalCorrelation, 0.8)
    .await
    .unwrap();

  let first = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(first.demoted, 1);
  let evidence_after_first = s.evidence_for(&addr(1)).await.unwrap().len();

  let second = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(second.stripped + second.demoted + second.evicted, 0);
  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.identity.as_deref(), Some("unverified (previously Mallory)"));
  assert_eq!(s.evidence_for(&addr(1)).await.unwrap().len(), evidence_after_first);
}

#[tokio::test]
async fn timezone_outlier_is_evicted() {
  let s = store().await;
  let params = EngineParams::default();

  // Build a three-member cluster, then give one member a disagreeing
  // timezone signal.
  run_clustering(&s, &params, &[obs(1, 2, 0), obs(2, 3, 10), obs(3, 1, 20)])
    .await
    .unwrap();
  let cluster_id = s.list_clusters().await.unwrap()[0].cluster_id;

  for n in [1, 2] {
    s.put_fingerprint(
      &addr(n),
      BehavioralFingerprint {
        timezone_signal: Some("UTC+8".into()),
        ..Default::default()
      },
    )
    .await
    .unwrap();
  }
  s.put_fingerprint(
    &addr(3),
    BehavioralFingerprint {
      timezone_signal: Some("UTC-5".into()),
      ..Default::default()
    },
  )
  .await
  .unwrap();

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.evicted, 1);

  let evicted = s.get_entity(&addr(3)).await.unwrap().unwrap();
  assert!(evicted.cluster_id.is_none());
  assert!(
    s.relationships_of(&addr(3))
      .await
      .unwrap()
      .iter()
      .all(|r| r.relationship_type != RelationshipType::SameCluster)
  );
  let cluster = s.get_cluster(cluster_id).await.unwrap().unwrap();
  assert_eq!(cluster.member_count, 2);
  assert_eq!(s.cluster_members(cluster_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn tied_timezone_vote_evicts_nobody() {
  let s = store().await;
  let params = EngineParams::default();
  run_clustering(&s, &params, &[obs(9, 1, 0), obs(9, 2, 10)]).await.unwrap();

  for (n, tz) in [(1, "UTC+8"), (2, "UTC-5")] {
    s.put_fingerprint(
      &addr(n),
      BehavioralFingerprint {
        timezone_signal: Some(tz.into()),
        ..Default::default()
      },
    )
    .await
    .unwrap();
  }

  let report = run_cleanup(&s, &params).await.unwrap();
  assert_eq!(report.evicted, 0);
}

// ─── Reassessment ────────────────────────────────────────────────────────────

#[tokio::test]
async fn reassess_weighs_sources_not_row_counts() {
  let s = store().await;
  s.add_evidence(NewEvidence::new(
    addr(1),
    EvidenceSource::VerifiedLabel,
    "Binance 14",
    0.95,
  ))
  .await
  .unwrap();
  for _ in 0..5 {
    s.add_evidence(NewEvidence::new(addr(1), EvidenceSource::Behavioral, "", 0.3))
      .await
      .unwrap();
  }

  assert!(reassess_entity(&s, &addr(1)).await.unwrap());
  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.identity.as_deref(), Some("Binance 14"));
  // Dominated by the verified source despite the behavioral flood.
  assert!(e.confidence > 0.7 && e.confidence < 0.85);
}

#[tokio::test]
async fn reassess_never_weakens_an_entity() {
  let s = store().await;
  verified(&s, 1, "Binance 14", 0.95).await;
  s.add_evidence(NewEvidence::new(addr(1), EvidenceSource::Behavioral, "bot", 0.3))
    .await
    .unwrap();

  assert!(!reassess_entity(&s, &addr(1)).await.unwrap());
  let e = s.get_entity(&addr(1)).await.unwrap().unwrap();
  assert_eq!(e.confidence, 0.95);
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn cluster_then_propagate_labels_members() {
  let s = store().await;
  let params = EngineParams::default();
  verified(&s, 1, "Wintermute", 0.9).await;

  run_clustering(&s, &params, &[obs(9, 1, 0), obs(9, 2, 30)]).await.unwrap();
  let report = run_propagation(&s, &params).await.unwrap();
  assert_eq!(report.labels_written, 1);

  let b = s.get_entity(&addr(2)).await.unwrap().unwrap();
  assert_eq!(b.identity.as_deref(), Some("Wintermute (associated)"));
  // Decayed through the same_cluster edge written by clustering.
  assert!(b.confidence < 0.9);
  assert!(b.confidence >= params.propagation_floor);
}
