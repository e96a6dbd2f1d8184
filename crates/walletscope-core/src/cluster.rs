//! Cluster, fingerprint, and processing-queue records.
//!
//! A cluster is a guarded, size-capped set of addresses believed to
//! share one controller. Membership is recorded twice — as
//! `entities.cluster_id` and as the full `same_cluster` edge set — and
//! the store operations keep the two representations consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Cluster ─────────────────────────────────────────────────────────────────

/// A named set of addresses believed to share one controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
  pub cluster_id:   Uuid,
  /// Human-readable label, e.g. "shared-funder cluster #3".
  pub label:        String,
  /// Comma-joined formation methods, e.g. "shared_funder,circular_funding".
  pub method:       String,
  /// Mean corroborating-link confidence over the final membership.
  pub confidence:   f64,
  pub member_count: usize,
  pub created_at:   DateTime<Utc>,
}

// ─── BehavioralFingerprint ───────────────────────────────────────────────────

/// Behavioural signals for one address, written by an external
/// fingerprinting collaborator. The conflict resolver reads
/// `timezone_signal`: it should be invariant across one controller's
/// addresses, so disagreement inside a cluster marks an outlier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralFingerprint {
  pub timezone_signal: Option<String>,
  pub gas_strategy:    Option<String>,
  pub trading_style:   Option<String>,
  pub risk_profile:    Option<String>,
}

// ─── Processing queue ────────────────────────────────────────────────────────

/// Analysis stage an address is queued for.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Clustering,
  Propagation,
  Cleanup,
}

/// Per-item processing status. An item moves to `Completed` only once
/// its own processing has actually finished — never as a side effect of
/// a batch that errored partway through.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueStatus {
  Pending,
  InProgress,
  Completed,
  Failed,
}
