//! [`SqliteStore`] — the SQLite implementation of [`GraphStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use walletscope_core::{
  cluster::{BehavioralFingerprint, Cluster, QueueStatus, Stage},
  entity::{Address, Entity, EntityType, validate_confidence},
  evidence::{Evidence, NewEvidence},
  relationship::{Relationship, RelationshipType, canonical_pair},
  store::{EntityQuery, GraphStore},
};

use crate::{
  Error, Result,
  encode::{
    RawCluster, RawEntity, RawEvidence, RawFingerprint, RawRelationship,
    decode_address, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A walletscope graph store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert an unresolved entity row if the address is new.
  async fn insert_entity_if_missing(&self, address: &Address) -> Result<()> {
    let addr_str = address.as_str().to_owned();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO entities (address, last_updated) VALUES (?1, ?2)",
          rusqlite::params![addr_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_entity(&self, address: &Address) -> Result<Option<Entity>> {
    let addr_str = address.as_str().to_owned();

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT address, identity, confidence, entity_type, cluster_id,
                      contract_type, ens_name, last_updated
               FROM entities WHERE address = ?1",
              rusqlite::params![addr_str],
              read_entity_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }
}

// Row-mapper helpers shared across queries.

fn read_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
  Ok(RawEntity {
    address:       row.get(0)?,
    identity:      row.get(1)?,
    confidence:    row.get(2)?,
    entity_type:   row.get(3)?,
    cluster_id:    row.get(4)?,
    contract_type: row.get(5)?,
    ens_name:      row.get(6)?,
    last_updated:  row.get(7)?,
  })
}

fn read_relationship_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<RawRelationship> {
  Ok(RawRelationship {
    source:            row.get(0)?,
    target:            row.get(1)?,
    relationship_type: row.get(2)?,
    confidence:        row.get(3)?,
  })
}

fn read_evidence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvidence> {
  Ok(RawEvidence {
    id:             row.get(0)?,
    entity_address: row.get(1)?,
    source:         row.get(2)?,
    claim:          row.get(3)?,
    confidence:     row.get(4)?,
    raw_data:       row.get(5)?,
    created_at:     row.get(6)?,
  })
}

fn read_cluster_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCluster> {
  Ok(RawCluster {
    cluster_id:   row.get(0)?,
    label:        row.get(1)?,
    method:       row.get(2)?,
    confidence:   row.get(3)?,
    member_count: row.get(4)?,
    created_at:   row.get(5)?,
  })
}

// ─── GraphStore impl ─────────────────────────────────────────────────────────

impl GraphStore for SqliteStore {
  type Error = Error;

  // ── Entities ──────────────────────────────────────────────────────────────

  async fn ensure_entity(&self, address: Address) -> Result<Entity> {
    self.insert_entity_if_missing(&address).await?;
    // The row exists now; a missing read here is a real defect.
    self
      .fetch_entity(&address)
      .await?
      .ok_or_else(|| Error::Decode(format!("entity vanished: {address}")))
  }

  async fn get_entity(&self, address: &Address) -> Result<Option<Entity>> {
    self.fetch_entity(address).await
  }

  async fn list_entities(&self) -> Result<Vec<Entity>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT address, identity, confidence, entity_type, cluster_id,
                  contract_type, ens_name, last_updated
           FROM entities ORDER BY address",
        )?;
        let rows = stmt
          .query_map([], read_entity_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  async fn query_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
    let identity_pattern = query.identity.as_deref().map(|s| format!("%{s}%"));
    let type_str = query.entity_type.map(|t| t.to_string());
    let cluster_str = query.cluster_id.map(encode_uuid);
    let min_confidence = query.min_confidence;
    let limit_val = query.limit.unwrap_or(1000) as i64;

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        // Build WHERE clause dynamically; unreferenced placeholders are
        // still bindable because ?5 fixes the parameter count.
        let mut conds: Vec<&'static str> = vec![];
        if identity_pattern.is_some() {
          conds.push("LOWER(identity) LIKE LOWER(?1)");
        }
        if type_str.is_some() {
          conds.push("entity_type = ?2");
        }
        if cluster_str.is_some() {
          conds.push("cluster_id = ?3");
        }
        if min_confidence.is_some() {
          conds.push("confidence >= ?4");
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT address, identity, confidence, entity_type, cluster_id,
                  contract_type, ens_name, last_updated
           FROM entities
           {where_clause}
           ORDER BY confidence DESC, address
           LIMIT ?5"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              identity_pattern.as_deref(),
              type_str.as_deref(),
              cluster_str.as_deref(),
              min_confidence,
              limit_val,
            ],
            read_entity_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  async fn set_identity(
    &self,
    address: &Address,
    identity: Option<String>,
    confidence: f64,
  ) -> Result<()> {
    validate_confidence(confidence).map_err(Error::Core)?;
    if let Some(label) = &identity {
      if confidence <= 0.0 {
        return Err(Error::Core(
          walletscope_core::Error::UnsupportedIdentity(label.clone()),
        ));
      }
    }

    let addr_str = address.as_str().to_owned();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO entities (address, identity, confidence, last_updated)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (address) DO UPDATE SET
             identity     = excluded.identity,
             confidence   = excluded.confidence,
             last_updated = excluded.last_updated",
          rusqlite::params![addr_str, identity, confidence, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_entity_type(
    &self,
    address: &Address,
    entity_type: EntityType,
  ) -> Result<()> {
    self.insert_entity_if_missing(address).await?;

    let addr_str = address.as_str().to_owned();
    let type_str = entity_type.to_string();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE entities SET entity_type = ?2, last_updated = ?3
           WHERE address = ?1",
          rusqlite::params![addr_str, type_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Evidence ──────────────────────────────────────────────────────────────

  async fn add_evidence(&self, input: NewEvidence) -> Result<Evidence> {
    validate_confidence(input.confidence).map_err(Error::Core)?;
    self.insert_entity_if_missing(&input.entity_address).await?;

    let evidence = Evidence {
      id:             Uuid::new_v4(),
      entity_address: input.entity_address,
      source:         input.source,
      claim:          input.claim,
      confidence:     input.confidence,
      raw_data:       input.raw_data,
      created_at:     Utc::now(),
    };

    let id_str = encode_uuid(evidence.id);
    let addr_str = evidence.entity_address.as_str().to_owned();
    let source_str = evidence.source.to_string();
    let claim = evidence.claim.clone();
    let confidence = evidence.confidence;
    let raw_str = evidence.raw_data.to_string();
    let at_str = encode_dt(evidence.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO evidence (
             id, entity_address, source, claim, confidence, raw_data, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str, addr_str, source_str, claim, confidence, raw_str, at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(evidence)
  }

  async fn evidence_for(&self, address: &Address) -> Result<Vec<Evidence>> {
    let addr_str = address.as_str().to_owned();

    let raws: Vec<RawEvidence> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, entity_address, source, claim, confidence, raw_data, created_at
           FROM evidence WHERE entity_address = ?1
           ORDER BY created_at, id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![addr_str], read_evidence_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvidence::into_evidence).collect()
  }

  async fn has_independent_evidence(&self, address: &Address) -> Result<bool> {
    let addr_str = address.as_str().to_owned();

    let found: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM evidence
               WHERE entity_address = ?1
                 AND source NOT IN ('propagation', 'cleanup')
               LIMIT 1",
              rusqlite::params![addr_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;

    Ok(found)
  }

  // ── Relationships ─────────────────────────────────────────────────────────

  async fn add_relationship(
    &self,
    a: Address,
    b: Address,
    relationship_type: RelationshipType,
    confidence: f64,
  ) -> Result<Relationship> {
    validate_confidence(confidence).map_err(Error::Core)?;
    self.insert_entity_if_missing(&a).await?;
    self.insert_entity_if_missing(&b).await?;

    let (source, target) = canonical_pair(a, b);
    let source_str = source.as_str().to_owned();
    let target_str = target.as_str().to_owned();
    let type_str = relationship_type.to_string();

    // Monotonic upsert: an edge may be strengthened, never weakened.
    // Read back the stored confidence so callers see the winning value.
    let stored: f64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO relationships (source, target, relationship_type, confidence)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (source, target, relationship_type) DO UPDATE SET
             confidence = MAX(relationships.confidence, excluded.confidence)",
          rusqlite::params![source_str, target_str, type_str, confidence],
        )?;

        let stored: f64 = conn.query_row(
          "SELECT confidence FROM relationships
           WHERE source = ?1 AND target = ?2 AND relationship_type = ?3",
          rusqlite::params![source_str, target_str, type_str],
          |row| row.get(0),
        )?;
        Ok(stored)
      })
      .await?;

    Ok(Relationship { source, target, relationship_type, confidence: stored })
  }

  async fn relationships_of(
    &self,
    address: &Address,
  ) -> Result<Vec<Relationship>> {
    let addr_str = address.as_str().to_owned();

    let raws: Vec<RawRelationship> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT source, target, relationship_type, confidence
           FROM relationships WHERE source = ?1 OR target = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![addr_str], read_relationship_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawRelationship::into_relationship)
      .collect()
  }

  async fn relationships_of_type(
    &self,
    relationship_type: RelationshipType,
  ) -> Result<Vec<Relationship>> {
    let type_str = relationship_type.to_string();

    let raws: Vec<RawRelationship> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT source, target, relationship_type, confidence
           FROM relationships WHERE relationship_type = ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![type_str], read_relationship_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawRelationship::into_relationship)
      .collect()
  }

  async fn remove_same_cluster_edges(&self, address: &Address) -> Result<usize> {
    let addr_str = address.as_str().to_owned();

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM relationships
           WHERE relationship_type = 'same_cluster'
             AND (source = ?1 OR target = ?1)",
          rusqlite::params![addr_str],
        )?)
      })
      .await?;

    Ok(removed)
  }

  // ── Clusters ──────────────────────────────────────────────────────────────

  async fn create_cluster(&self, cluster: Cluster) -> Result<()> {
    let id_str = encode_uuid(cluster.cluster_id);
    let label = cluster.label;
    let method = cluster.method;
    let confidence = cluster.confidence;
    let member_count = cluster.member_count as i64;
    let at_str = encode_dt(cluster.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO clusters (
             cluster_id, label, method, confidence, member_count, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, label, method, confidence, member_count, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>> {
    let id_str = encode_uuid(cluster_id);

    let raw: Option<RawCluster> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT cluster_id, label, method, confidence, member_count, created_at
               FROM clusters WHERE cluster_id = ?1",
              rusqlite::params![id_str],
              read_cluster_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCluster::into_cluster).transpose()
  }

  async fn list_clusters(&self) -> Result<Vec<Cluster>> {
    let raws: Vec<RawCluster> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT cluster_id, label, method, confidence, member_count, created_at
           FROM clusters ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map([], read_cluster_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCluster::into_cluster).collect()
  }

  async fn cluster_members(&self, cluster_id: Uuid) -> Result<Vec<Address>> {
    let id_str = encode_uuid(cluster_id);

    let addrs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT address FROM entities WHERE cluster_id = ?1 ORDER BY address",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    addrs.iter().map(|s| decode_address(s)).collect()
  }

  async fn set_cluster(
    &self,
    address: &Address,
    cluster_id: Option<Uuid>,
  ) -> Result<()> {
    self.insert_entity_if_missing(address).await?;

    let addr_str = address.as_str().to_owned();
    let id_str = cluster_id.map(encode_uuid);
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE entities SET cluster_id = ?2, last_updated = ?3
           WHERE address = ?1",
          rusqlite::params![addr_str, id_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update_cluster_size(&self, cluster_id: Uuid) -> Result<usize> {
    let id_str = encode_uuid(cluster_id);

    let count: i64 = self
      .conn
      .call(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM entities WHERE cluster_id = ?1",
          rusqlite::params![id_str],
          |row| row.get(0),
        )?;
        conn.execute(
          "UPDATE clusters SET member_count = ?2 WHERE cluster_id = ?1",
          rusqlite::params![id_str, count],
        )?;
        Ok(count)
      })
      .await?;

    Ok(count as usize)
  }

  async fn retire_clusters(&self, cluster_ids: &[Uuid]) -> Result<()> {
    if cluster_ids.is_empty() {
      return Ok(());
    }
    let id_strs: Vec<String> =
      cluster_ids.iter().copied().map(encode_uuid).collect();

    self
      .conn
      .call(move |conn| {
        let placeholders = (1..=id_strs.len())
          .map(|i| format!("?{i}"))
          .collect::<Vec<_>>()
          .join(", ");
        let sql =
          format!("DELETE FROM clusters WHERE cluster_id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(id_strs.iter()))?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Behavioral fingerprints ───────────────────────────────────────────────

  async fn put_fingerprint(
    &self,
    address: &Address,
    fingerprint: BehavioralFingerprint,
  ) -> Result<()> {
    self.insert_entity_if_missing(address).await?;

    let addr_str = address.as_str().to_owned();
    let BehavioralFingerprint {
      timezone_signal,
      gas_strategy,
      trading_style,
      risk_profile,
    } = fingerprint;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO behavioral_fingerprints (
             address, timezone_signal, gas_strategy, trading_style, risk_profile
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            addr_str,
            timezone_signal,
            gas_strategy,
            trading_style,
            risk_profile,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fingerprint_for(
    &self,
    address: &Address,
  ) -> Result<Option<BehavioralFingerprint>> {
    let addr_str = address.as_str().to_owned();

    let raw: Option<RawFingerprint> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT timezone_signal, gas_strategy, trading_style, risk_profile
               FROM behavioral_fingerprints WHERE address = ?1",
              rusqlite::params![addr_str],
              |row| {
                Ok(RawFingerprint {
                  timezone_signal: row.get(0)?,
                  gas_strategy:    row.get(1)?,
                  trading_style:   row.get(2)?,
                  risk_profile:    row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    Ok(raw.map(RawFingerprint::into_fingerprint))
  }

  async fn fingerprints_for_cluster(
    &self,
    cluster_id: Uuid,
  ) -> Result<Vec<(Address, BehavioralFingerprint)>> {
    let id_str = encode_uuid(cluster_id);

    let rows: Vec<(String, RawFingerprint)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT f.address, f.timezone_signal, f.gas_strategy,
                  f.trading_style, f.risk_profile
           FROM behavioral_fingerprints f
           JOIN entities e ON e.address = f.address
           WHERE e.cluster_id = ?1
           ORDER BY f.address",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok((
              row.get(0)?,
              RawFingerprint {
                timezone_signal: row.get(1)?,
                gas_strategy:    row.get(2)?,
                trading_style:   row.get(3)?,
                risk_profile:    row.get(4)?,
              },
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(addr, raw)| Ok((decode_address(&addr)?, raw.into_fingerprint())))
      .collect()
  }

  // ── Processing queue ──────────────────────────────────────────────────────

  async fn queue_push(&self, address: &Address, stage: Stage) -> Result<()> {
    let addr_str = address.as_str().to_owned();
    let stage_str = stage.to_string();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO processing_queue (address, stage, status, updated_at)
           VALUES (?1, ?2, 'pending', ?3)
           ON CONFLICT (address, stage) DO UPDATE SET
             status     = 'pending',
             updated_at = excluded.updated_at",
          rusqlite::params![addr_str, stage_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn queue_pending(&self, stage: Stage) -> Result<Vec<Address>> {
    let stage_str = stage.to_string();

    let addrs: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT address FROM processing_queue
           WHERE stage = ?1 AND status = 'pending'
           ORDER BY updated_at, address",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![stage_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    addrs.iter().map(|s| decode_address(s)).collect()
  }

  async fn queue_mark(
    &self,
    address: &Address,
    stage: Stage,
    status: QueueStatus,
  ) -> Result<()> {
    let addr_str = address.as_str().to_owned();
    let stage_str = stage.to_string();
    let status_str = status.to_string();
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE processing_queue SET status = ?3, updated_at = ?4
           WHERE address = ?1 AND stage = ?2",
          rusqlite::params![addr_str, stage_str, status_str, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
