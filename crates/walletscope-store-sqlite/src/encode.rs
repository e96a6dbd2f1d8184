//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, UUIDs as hyphenated
//! lowercase strings, enums as their snake_case discriminants, and
//! `raw_data` as compact JSON.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use walletscope_core::{
  cluster::{BehavioralFingerprint, Cluster},
  entity::{Address, Entity, EntityType},
  evidence::{Evidence, EvidenceSource},
  relationship::{Relationship, RelationshipType},
};

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

// ─── Address ─────────────────────────────────────────────────────────────────

/// Stored addresses are already canonical; a parse failure here means
/// the database was written by something else.
pub fn decode_address(s: &str) -> Result<Address> {
  Address::parse(s).map_err(Error::Core)
}

// ─── Enum discriminants ──────────────────────────────────────────────────────

fn unknown_discriminant(kind: &'static str, value: &str) -> Error {
  Error::Core(walletscope_core::Error::UnknownDiscriminant {
    kind,
    value: value.to_owned(),
  })
}

pub fn decode_entity_type(s: &str) -> Result<EntityType> {
  EntityType::from_str(s).map_err(|_| unknown_discriminant("entity type", s))
}

pub fn decode_source(s: &str) -> Result<EvidenceSource> {
  EvidenceSource::from_str(s)
    .map_err(|_| unknown_discriminant("evidence source", s))
}

pub fn decode_relationship_type(s: &str) -> Result<RelationshipType> {
  RelationshipType::from_str(s)
    .map_err(|_| unknown_discriminant("relationship type", s))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `entities` row.
pub struct RawEntity {
  pub address:       String,
  pub identity:      Option<String>,
  pub confidence:    f64,
  pub entity_type:   String,
  pub cluster_id:    Option<String>,
  pub contract_type: Option<String>,
  pub ens_name:      Option<String>,
  pub last_updated:  String,
}

impl RawEntity {
  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      address:       decode_address(&self.address)?,
      identity:      self.identity,
      confidence:    self.confidence,
      entity_type:   decode_entity_type(&self.entity_type)?,
      cluster_id:    self.cluster_id.as_deref().map(decode_uuid).transpose()?,
      contract_type: self.contract_type,
      ens_name:      self.ens_name,
      last_updated:  decode_dt(&self.last_updated)?,
    })
  }
}

/// Raw strings read directly from an `evidence` row.
pub struct RawEvidence {
  pub id:             String,
  pub entity_address: String,
  pub source:         String,
  pub claim:          String,
  pub confidence:     f64,
  pub raw_data:       String,
  pub created_at:     String,
}

impl RawEvidence {
  pub fn into_evidence(self) -> Result<Evidence> {
    Ok(Evidence {
      id:             decode_uuid(&self.id)?,
      entity_address: decode_address(&self.entity_address)?,
      source:         decode_source(&self.source)?,
      claim:          self.claim,
      confidence:     self.confidence,
      raw_data:       serde_json::from_str(&self.raw_data)?,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `relationships` row.
pub struct RawRelationship {
  pub source:            String,
  pub target:            String,
  pub relationship_type: String,
  pub confidence:        f64,
}

impl RawRelationship {
  pub fn into_relationship(self) -> Result<Relationship> {
    Ok(Relationship {
      source:            decode_address(&self.source)?,
      target:            decode_address(&self.target)?,
      relationship_type: decode_relationship_type(&self.relationship_type)?,
      confidence:        self.confidence,
    })
  }
}

/// Raw strings read directly from a `clusters` row.
pub struct RawCluster {
  pub cluster_id:   String,
  pub label:        String,
  pub method:       String,
  pub confidence:   f64,
  pub member_count: i64,
  pub created_at:   String,
}

impl RawCluster {
  pub fn into_cluster(self) -> Result<Cluster> {
    Ok(Cluster {
      cluster_id:   decode_uuid(&self.cluster_id)?,
      label:        self.label,
      method:       self.method,
      confidence:   self.confidence,
      member_count: self.member_count as usize,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `behavioral_fingerprints` row.
pub struct RawFingerprint {
  pub timezone_signal: Option<String>,
  pub gas_strategy:    Option<String>,
  pub trading_style:   Option<String>,
  pub risk_profile:    Option<String>,
}

impl RawFingerprint {
  pub fn into_fingerprint(self) -> BehavioralFingerprint {
    BehavioralFingerprint {
      timezone_signal: self.timezone_signal,
      gas_strategy:    self.gas_strategy,
      trading_style:   self.trading_style,
      risk_profile:    self.risk_profile,
    }
  }
}
