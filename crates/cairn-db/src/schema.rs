//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Pins
-- ============================================================

CREATE TABLE IF NOT EXISTS pins (
    cid TEXT PRIMARY KEY,
    pin_id INTEGER NOT NULL UNIQUE,
    subject_id INTEGER NOT NULL,
    caller TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes > 0),
    target_replicas INTEGER NOT NULL CHECK (target_replicas > 0),
    current_replicas INTEGER NOT NULL DEFAULT 0,
    funding_source TEXT NOT NULL
        CHECK (funding_source IN ('pool', 'subject_account', 'caller_account')),
    price_charged TEXT NOT NULL,
    charge_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'failed')),
    error_code INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    revision INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pins_subject ON pins(subject_id);

-- Superseded records: failed pins replaced by a retry or resubmission.
CREATE TABLE IF NOT EXISTS pin_history (
    pin_id INTEGER PRIMARY KEY,
    cid TEXT NOT NULL,
    subject_id INTEGER NOT NULL,
    caller TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    target_replicas INTEGER NOT NULL,
    current_replicas INTEGER NOT NULL,
    funding_source TEXT NOT NULL,
    price_charged TEXT NOT NULL,
    charge_id TEXT NOT NULL,
    status TEXT NOT NULL,
    error_code INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    revision INTEGER NOT NULL,
    archived_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pin_history_cid ON pin_history(cid);

-- ============================================================
-- Billing
-- ============================================================

CREATE TABLE IF NOT EXISTS charges (
    charge_id TEXT PRIMARY KEY,
    pin_id INTEGER NOT NULL UNIQUE,
    cid TEXT NOT NULL,
    source TEXT NOT NULL
        CHECK (source IN ('pool', 'subject_account', 'caller_account')),
    payer_key TEXT NOT NULL,
    amount TEXT NOT NULL,
    cycle_id INTEGER,
    charged_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_charges_cid ON charges(cid);

CREATE TABLE IF NOT EXISTS quota_cycles (
    cycle_id INTEGER PRIMARY KEY,
    total TEXT NOT NULL,
    used TEXT NOT NULL,
    opened_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pool (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    balance TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subject_accounts (
    subject_id INTEGER PRIMARY KEY,
    balance TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS caller_accounts (
    caller TEXT PRIMARY KEY,
    balance TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
