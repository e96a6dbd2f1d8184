//! The `GraphStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `walletscope-store-sqlite`). The analysis engine and the CLI depend on
//! this abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  cluster::{BehavioralFingerprint, Cluster, QueueStatus, Stage},
  entity::{Address, Entity, EntityType},
  evidence::{Evidence, NewEvidence},
  relationship::{Relationship, RelationshipType},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`GraphStore::query_entities`].
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
  /// Case-insensitive substring match over `identity`.
  pub identity:       Option<String>,
  pub entity_type:    Option<EntityType>,
  pub cluster_id:     Option<Uuid>,
  /// Only entities at or above this confidence.
  pub min_confidence: Option<f64>,
  pub limit:          Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a walletscope graph backend.
///
/// Evidence writes are append-only. Relationship writes are
/// confidence-preserving upserts: a new confidence replaces the old only
/// if strictly greater. Entities are never deleted; cleanup clears
/// fields.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait GraphStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Entities ──────────────────────────────────────────────────────────

  /// Ensure an entity row exists for `address`, creating an unresolved
  /// one if needed, and return it.
  fn ensure_entity(
    &self,
    address: Address,
  ) -> impl Future<Output = Result<Entity, Self::Error>> + Send + '_;

  /// Retrieve an entity. Returns `None` if the address has never been
  /// seen.
  fn get_entity<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + 'a;

  /// List every entity in the store.
  fn list_entities(
    &self,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + '_;

  /// Filtered entity listing; see [`EntityQuery`].
  fn query_entities<'a>(
    &'a self,
    query: &'a EntityQuery,
  ) -> impl Future<Output = Result<Vec<Entity>, Self::Error>> + Send + 'a;

  /// Set (or clear) the identity and confidence for an address, creating
  /// the entity if needed. Enforces the identity/confidence invariant
  /// and confidence range at the write boundary.
  fn set_identity<'a>(
    &'a self,
    address: &'a Address,
    identity: Option<String>,
    confidence: f64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Update the predicted entity type.
  fn set_entity_type<'a>(
    &'a self,
    address: &'a Address,
    entity_type: EntityType,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Evidence ──────────────────────────────────────────────────────────

  /// Append one evidence row. The id and timestamp are assigned by the
  /// store; the entity row is created if this is the first contact.
  fn add_evidence(
    &self,
    input: NewEvidence,
  ) -> impl Future<Output = Result<Evidence, Self::Error>> + Send + '_;

  /// All evidence rows for an address, oldest first.
  fn evidence_for<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<Vec<Evidence>, Self::Error>> + Send + 'a;

  /// Whether any evidence row for the address comes from an independent
  /// source (not `Propagation`/`Cleanup`).
  fn has_independent_evidence<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Relationships ─────────────────────────────────────────────────────

  /// Confidence-preserving upsert of one edge. Creates entity rows for
  /// both endpoints if needed. An existing edge keeps the higher of the
  /// old and new confidence.
  fn add_relationship(
    &self,
    a: Address,
    b: Address,
    relationship_type: RelationshipType,
    confidence: f64,
  ) -> impl Future<Output = Result<Relationship, Self::Error>> + Send + '_;

  /// Every edge touching an address, any type.
  fn relationships_of<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<Vec<Relationship>, Self::Error>> + Send + 'a;

  /// Every edge of one type in the store.
  fn relationships_of_type(
    &self,
    relationship_type: RelationshipType,
  ) -> impl Future<Output = Result<Vec<Relationship>, Self::Error>> + Send + '_;

  /// Remove every `same_cluster` edge touching an address. Used when a
  /// member is evicted from a cluster or a cluster is rebuilt; never
  /// touches other edge types.
  fn remove_same_cluster_edges<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  // ── Clusters ──────────────────────────────────────────────────────────

  /// Persist a new cluster record.
  fn create_cluster(
    &self,
    cluster: Cluster,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_cluster(
    &self,
    cluster_id: Uuid,
  ) -> impl Future<Output = Result<Option<Cluster>, Self::Error>> + Send + '_;

  fn list_clusters(
    &self,
  ) -> impl Future<Output = Result<Vec<Cluster>, Self::Error>> + Send + '_;

  /// Addresses whose `cluster_id` points at this cluster.
  fn cluster_members(
    &self,
    cluster_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Address>, Self::Error>> + Send + '_;

  /// Point an entity at a cluster (or clear with `None`). Clearing never
  /// deletes the entity row.
  fn set_cluster<'a>(
    &'a self,
    address: &'a Address,
    cluster_id: Option<Uuid>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Recount and store `member_count` for a cluster.
  fn update_cluster_size(
    &self,
    cluster_id: Uuid,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete retired cluster rows. Callers must rewrite membership and
  /// edges first; this only removes the cluster records themselves.
  fn retire_clusters<'a>(
    &'a self,
    cluster_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Behavioral fingerprints ───────────────────────────────────────────

  /// Insert or replace the fingerprint for an address.
  fn put_fingerprint<'a>(
    &'a self,
    address: &'a Address,
    fingerprint: BehavioralFingerprint,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn fingerprint_for<'a>(
    &'a self,
    address: &'a Address,
  ) -> impl Future<Output = Result<Option<BehavioralFingerprint>, Self::Error>>
  + Send
  + 'a;

  /// Fingerprints of every member of a cluster, keyed by address. Members
  /// without a fingerprint are absent.
  fn fingerprints_for_cluster(
    &self,
    cluster_id: Uuid,
  ) -> impl Future<
    Output = Result<Vec<(Address, BehavioralFingerprint)>, Self::Error>,
  > + Send
  + '_;

  // ── Processing queue ──────────────────────────────────────────────────

  /// Enqueue an (address, stage) pair as `Pending`. Re-pushing an
  /// existing pair resets it to `Pending`.
  fn queue_push<'a>(
    &'a self,
    address: &'a Address,
    stage: Stage,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// All `Pending` addresses for a stage, oldest first.
  fn queue_pending(
    &self,
    stage: Stage,
  ) -> impl Future<Output = Result<Vec<Address>, Self::Error>> + Send + '_;

  /// Mark one item's status. Completion is always per-item: a batch that
  /// errors partway through leaves the unprocessed items untouched.
  fn queue_mark<'a>(
    &'a self,
    address: &'a Address,
    stage: Stage,
    status: QueueStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
