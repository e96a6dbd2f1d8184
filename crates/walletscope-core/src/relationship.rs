//! Relationship — typed, weighted edges between two addresses.
//!
//! Edges are directed in storage but symmetric in meaning: for a given
//! unordered pair and type at most one row exists, stored with the
//! lexicographically smaller address first. An upsert may strengthen an
//! edge but never weaken it.

use serde::{Deserialize, Serialize};

use crate::entity::Address;

// ─── RelationshipType ────────────────────────────────────────────────────────

/// The kind of link between two addresses. Each type carries a fixed
/// trust weight, shared with evidence reliability: an edge and an
/// evidence claim ultimately encode the same kind of belief.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationshipType {
  /// Confirmed to be the same actor (strongest link we model).
  SameEntity,
  /// Members of one common-ownership cluster.
  SameCluster,
  /// One address funded the other.
  FundedBy,
  /// Both deposit to the same custodial destination.
  SharedDeposits,
  /// Activity windows line up beyond chance.
  TemporalCorrelation,
  /// Significant counterparty-set overlap.
  CounterpartyOverlap,
  /// Direct trade history; weak on its own.
  TradedWith,
}

impl RelationshipType {
  /// Per-type decay weight applied during label propagation.
  pub fn weight(self) -> f64 {
    match self {
      Self::SameEntity => 0.95,
      Self::SameCluster => 0.90,
      Self::FundedBy => 0.85,
      Self::SharedDeposits => 0.85,
      Self::TemporalCorrelation => 0.85,
      Self::CounterpartyOverlap => 0.80,
      Self::TradedWith => 0.40,
    }
  }

  /// The edge classes the conflict resolver scans for contradicting
  /// neighbour identities.
  pub fn is_correlation_class(self) -> bool {
    matches!(self, Self::TemporalCorrelation | Self::CounterpartyOverlap)
  }
}

// ─── Relationship ────────────────────────────────────────────────────────────

/// A single stored edge. `source < target` always holds; use
/// [`Relationship::new`] to canonicalise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
  pub source:            Address,
  pub target:            Address,
  pub relationship_type: RelationshipType,
  pub confidence:        f64,
}

impl Relationship {
  /// Build an edge with the pair in canonical (low, high) order.
  pub fn new(
    a: Address,
    b: Address,
    relationship_type: RelationshipType,
    confidence: f64,
  ) -> Self {
    let (source, target) = canonical_pair(a, b);
    Self { source, target, relationship_type, confidence }
  }

  /// Given one endpoint, return the other.
  pub fn other(&self, addr: &Address) -> &Address {
    if &self.source == addr { &self.target } else { &self.source }
  }
}

/// Order an unordered pair for storage.
pub fn canonical_pair(a: Address, b: Address) -> (Address, Address) {
  if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn addr(last: char) -> Address {
    Address::parse(&format!("0x{}{}", "0".repeat(39), last)).unwrap()
  }

  #[test]
  fn new_canonicalises_pair_order() {
    let r1 = Relationship::new(addr('b'), addr('a'), RelationshipType::TradedWith, 0.5);
    let r2 = Relationship::new(addr('a'), addr('b'), RelationshipType::TradedWith, 0.5);
    assert_eq!(r1.source, r2.source);
    assert_eq!(r1.target, r2.target);
    assert_eq!(r1.source, addr('a'));
  }

  #[test]
  fn other_returns_opposite_endpoint() {
    let r = Relationship::new(addr('a'), addr('b'), RelationshipType::FundedBy, 0.8);
    assert_eq!(r.other(&addr('a')), &addr('b'));
    assert_eq!(r.other(&addr('b')), &addr('a'));
  }

  #[test]
  fn correlation_class_membership() {
    assert!(RelationshipType::TemporalCorrelation.is_correlation_class());
    assert!(RelationshipType::CounterpartyOverlap.is_correlation_class());
    assert!(!RelationshipType::SameCluster.is_correlation_class());
    assert!(!RelationshipType::FundedBy.is_correlation_class());
  }
}
