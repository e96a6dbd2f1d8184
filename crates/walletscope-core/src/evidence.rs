//! Evidence — the append-only ledger of sourced claims about an address.
//!
//! Evidence rows are never updated or deleted; corrections are new rows.
//! Each row is tagged with the collaborator (or core pass) that produced
//! it, and every source carries a fixed reliability weight used by
//! aggregation and propagation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Address;

// ─── EvidenceSource ──────────────────────────────────────────────────────────

/// Who produced a claim. `Propagation` and `Cleanup` are written by the
/// core itself; everything else comes from external signal producers.
///
/// Variants are declared in descending reliability order; aggregation
/// tie-breaks between disagreeing sources fall back to this order, never
/// to recency.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvidenceSource {
  /// Externally verified label, e.g. an exchange-confirmed tag.
  VerifiedLabel,
  /// Common-ownership cluster membership written by the cluster builder.
  ClusterAnalysis,
  /// Written by the conflict resolver when it strips or demotes a label.
  Cleanup,
  /// Funding-trace link from a chain scraper.
  FundingTrace,
  /// Temporal activity correlation.
  TemporalCorrelation,
  /// Written by the label propagator alongside every propagated label.
  Propagation,
  /// Counterparty-set overlap.
  CounterpartyOverlap,
  /// Self-declared name (ENS, registered handle); only partly trusted.
  SelfDeclared,
  /// Generic behavioural similarity; the noisiest signal we accept.
  Behavioral,
}

impl EvidenceSource {
  /// Fixed per-source reliability weight used by aggregation.
  pub fn weight(self) -> f64 {
    match self {
      Self::VerifiedLabel => 0.95,
      Self::ClusterAnalysis => 0.90,
      Self::Cleanup => 0.90,
      Self::FundingTrace => 0.85,
      Self::TemporalCorrelation => 0.85,
      Self::Propagation => 0.85,
      Self::CounterpartyOverlap => 0.80,
      Self::SelfDeclared => 0.55,
      Self::Behavioral => 0.35,
    }
  }

  /// Whether the source is independent of the core's own passes.
  /// Cleanup checks 1 and 2 only fire on entities with no independent
  /// evidence.
  pub fn is_independent(self) -> bool {
    !matches!(self, Self::Propagation | Self::Cleanup)
  }
}

// ─── Evidence ────────────────────────────────────────────────────────────────

/// An immutable, sourced claim about an entity. Once written, no field is
/// ever updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
  pub id:             Uuid,
  pub entity_address: Address,
  pub source:         EvidenceSource,
  /// The claimed identity label, or free text for non-identity claims.
  pub claim:          String,
  pub confidence:     f64,
  /// Opaque structured payload kept for traceability.
  pub raw_data:       serde_json::Value,
  /// Server-assigned; never changes after creation.
  pub created_at:     DateTime<Utc>,
}

// ─── NewEvidence ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::GraphStore::add_evidence`]. `id` and
/// `created_at` are always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewEvidence {
  pub entity_address: Address,
  pub source:         EvidenceSource,
  pub claim:          String,
  pub confidence:     f64,
  pub raw_data:       serde_json::Value,
}

impl NewEvidence {
  pub fn new(
    entity_address: Address,
    source: EvidenceSource,
    claim: impl Into<String>,
    confidence: f64,
  ) -> Self {
    Self {
      entity_address,
      source,
      claim: claim.into(),
      confidence,
      raw_data: serde_json::Value::Null,
    }
  }

  pub fn with_raw_data(mut self, raw_data: serde_json::Value) -> Self {
    self.raw_data = raw_data;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn weights_follow_declaration_order() {
    // The tie-break contract relies on more reliable sources sorting first.
    let sources = [
      EvidenceSource::VerifiedLabel,
      EvidenceSource::ClusterAnalysis,
      EvidenceSource::Cleanup,
      EvidenceSource::FundingTrace,
      EvidenceSource::TemporalCorrelation,
      EvidenceSource::Propagation,
      EvidenceSource::CounterpartyOverlap,
      EvidenceSource::SelfDeclared,
      EvidenceSource::Behavioral,
    ];
    for pair in sources.windows(2) {
      assert!(pair[0] < pair[1]);
      assert!(pair[0].weight() >= pair[1].weight());
    }
  }

  #[test]
  fn core_sources_are_not_independent() {
    assert!(!EvidenceSource::Propagation.is_independent());
    assert!(!EvidenceSource::Cleanup.is_independent());
    assert!(EvidenceSource::VerifiedLabel.is_independent());
    assert!(EvidenceSource::Behavioral.is_independent());
  }

  #[test]
  fn source_round_trips_through_strings() {
    use std::str::FromStr;
    let s = EvidenceSource::CounterpartyOverlap;
    assert_eq!(s.to_string(), "counterparty_overlap");
    assert_eq!(EvidenceSource::from_str("counterparty_overlap").unwrap(), s);
  }
}
