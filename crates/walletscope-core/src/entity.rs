//! Entity — the belief-state record for one wallet address.
//!
//! An entity holds the current best identity guess for an address, its
//! confidence, and cluster membership. Entities are created on first
//! contact and never hard-deleted; cleanup clears fields instead of
//! removing rows so the audit trail survives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ─── Address ─────────────────────────────────────────────────────────────────

/// A wallet address in canonical form: `0x` followed by 40 lowercase hex
/// digits. Construction goes through [`Address::parse`], which rejects
/// malformed input at the write boundary.
///
/// `Ord` is lexicographic, which gives unordered relationship pairs a
/// stable (low, high) canonical storage order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Address(String);

// Deserialisation goes through `parse` so config files and JSON batches
// cannot smuggle malformed addresses past the write boundary.
impl<'de> Deserialize<'de> for Address {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let raw = String::deserialize(deserializer)?;
    Self::parse(&raw).map_err(serde::de::Error::custom)
  }
}

impl Address {
  /// Parse and canonicalise an address. Accepts mixed-case hex; stores
  /// lowercase.
  pub fn parse(raw: &str) -> Result<Self> {
    let trimmed = raw.trim();
    let hex = trimmed
      .strip_prefix("0x")
      .or_else(|| trimmed.strip_prefix("0X"))
      .ok_or_else(|| Error::MalformedAddress(raw.to_owned()))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(Error::MalformedAddress(raw.to_owned()));
    }

    Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for Address {
  fn as_ref(&self) -> &str { &self.0 }
}

// ─── EntityType ──────────────────────────────────────────────────────────────

/// The kind of actor an address is believed to be. Predicted by an
/// external classifier; the core only stores and reports it.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityType {
  Individual,
  Fund,
  Protocol,
  Bot,
  Exchange,
  #[default]
  Unknown,
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// One row of the entity store.
///
/// Invariant: `identity` non-null implies `confidence > 0`. Enforced by
/// [`Entity::validate`] at every write boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
  pub address:       Address,
  /// Current best identity label, or `None` while unresolved.
  pub identity:      Option<String>,
  /// Belief strength in [0, 1].
  pub confidence:    f64,
  pub entity_type:   EntityType,
  pub cluster_id:    Option<Uuid>,
  /// Contract classification from an external resolver, if any.
  pub contract_type: Option<String>,
  /// Reverse-resolved ENS name, if any.
  pub ens_name:      Option<String>,
  pub last_updated:  DateTime<Utc>,
}

impl Entity {
  /// A fresh, unresolved entity for an address seen for the first time.
  pub fn unresolved(address: Address) -> Self {
    Self {
      address,
      identity: None,
      confidence: 0.0,
      entity_type: EntityType::Unknown,
      cluster_id: None,
      contract_type: None,
      ens_name: None,
      last_updated: Utc::now(),
    }
  }

  /// Check the identity/confidence invariant and confidence range.
  pub fn validate(&self) -> Result<()> {
    validate_confidence(self.confidence)?;
    if let Some(identity) = &self.identity {
      if self.confidence <= 0.0 {
        return Err(Error::UnsupportedIdentity(identity.clone()));
      }
    }
    Ok(())
  }
}

/// Reject confidences outside [0, 1] (NaN included) at the write boundary.
pub fn validate_confidence(value: f64) -> Result<()> {
  if value.is_nan() || !(0.0..=1.0).contains(&value) {
    return Err(Error::ConfidenceOutOfRange(value));
  }
  Ok(())
}
