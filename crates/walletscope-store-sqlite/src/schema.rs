//! SQL schema for the walletscope SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated
//! on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per address, created on first contact, never deleted.
-- Cleanup clears fields; it does not remove rows.
CREATE TABLE IF NOT EXISTS entities (
    address       TEXT PRIMARY KEY,  -- 0x + 40 lowercase hex digits
    identity      TEXT,
    confidence    REAL NOT NULL DEFAULT 0,
    entity_type   TEXT NOT NULL DEFAULT 'unknown',
    cluster_id    TEXT,
    contract_type TEXT,
    ens_name      TEXT,
    last_updated  TEXT NOT NULL,     -- ISO 8601 UTC
    CHECK (identity IS NULL OR confidence > 0)
);

-- Evidence is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS evidence (
    id             TEXT PRIMARY KEY,
    entity_address TEXT NOT NULL REFERENCES entities(address),
    source         TEXT NOT NULL,    -- EvidenceSource discriminant
    claim          TEXT NOT NULL,
    confidence     REAL NOT NULL,
    raw_data       TEXT NOT NULL DEFAULT 'null',  -- JSON payload
    created_at     TEXT NOT NULL     -- ISO 8601 UTC; server-assigned
);

-- One row per (unordered pair, type); source < target canonically, so
-- duplicate edges for a pair are impossible by construction.
CREATE TABLE IF NOT EXISTS relationships (
    source            TEXT NOT NULL REFERENCES entities(address),
    target            TEXT NOT NULL REFERENCES entities(address),
    relationship_type TEXT NOT NULL,
    confidence        REAL NOT NULL,
    PRIMARY KEY (source, target, relationship_type),
    CHECK (source < target)
);

CREATE TABLE IF NOT EXISTS clusters (
    cluster_id   TEXT PRIMARY KEY,
    label        TEXT NOT NULL,
    method       TEXT NOT NULL,     -- comma-joined formation methods
    confidence   REAL NOT NULL,
    member_count INTEGER NOT NULL,
    created_at   TEXT NOT NULL
);

-- Written by the behavioural-fingerprinting collaborator; the conflict
-- resolver reads timezone_signal.
CREATE TABLE IF NOT EXISTS behavioral_fingerprints (
    address         TEXT PRIMARY KEY REFERENCES entities(address),
    timezone_signal TEXT,
    gas_strategy    TEXT,
    trading_style   TEXT,
    risk_profile    TEXT
);

-- Batch orchestration state; one row per (address, stage).
CREATE TABLE IF NOT EXISTS processing_queue (
    address    TEXT NOT NULL,
    stage      TEXT NOT NULL,       -- 'clustering' | 'propagation' | 'cleanup'
    status     TEXT NOT NULL DEFAULT 'pending',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (address, stage)
);

CREATE INDEX IF NOT EXISTS evidence_address_idx      ON evidence(entity_address);
CREATE INDEX IF NOT EXISTS evidence_source_idx       ON evidence(source);
CREATE INDEX IF NOT EXISTS relationships_source_idx  ON relationships(source);
CREATE INDEX IF NOT EXISTS relationships_target_idx  ON relationships(target);
CREATE INDEX IF NOT EXISTS relationships_type_idx    ON relationships(relationship_type);
CREATE INDEX IF NOT EXISTS entities_cluster_idx      ON entities(cluster_id);
CREATE INDEX IF NOT EXISTS queue_stage_status_idx    ON processing_queue(stage, status);

PRAGMA user_version = 1;
";
