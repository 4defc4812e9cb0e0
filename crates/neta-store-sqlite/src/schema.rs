//! SQL schema for the Neta SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id   TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,  -- natural key for cross-source matching
    party        TEXT,
    constituency TEXT,
    state        TEXT,
    created_at   TEXT NOT NULL,         -- ISO 8601 UTC
    updated_at   TEXT NOT NULL          -- bumped only when a field is written
);

-- One row per enrichable field; overwritten in place, no history retained.
-- Every value carries a provenance tag; sentinel values are tagged
-- 'fallback' so no row is ever provenance-free.
CREATE TABLE IF NOT EXISTS subject_fields (
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    field       TEXT NOT NULL,   -- discriminant of the Field variant
    value       TEXT NOT NULL,
    provenance  TEXT NOT NULL,   -- 'database' | 'registry' | 'knowledge' | 'fallback'
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, field)
);

-- Donations are append-only facts. Natural-key uniqueness on
-- (subject, donor_name, year) is enforced by an existence check at write
-- time because `year` may be NULL.
CREATE TABLE IF NOT EXISTS donations (
    donation_id TEXT PRIMARY KEY,
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    donor_name  TEXT NOT NULL,
    donor_type  TEXT NOT NULL,
    amount      REAL,            -- rupees, when disclosed
    year        INTEGER,
    recipient   TEXT NOT NULL,   -- 'politician' | 'party' | 'both'
    source      TEXT NOT NULL,
    source_url  TEXT,
    verified    INTEGER NOT NULL DEFAULT 0,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS subject_fields_subject_idx ON subject_fields(subject_id);
CREATE INDEX IF NOT EXISTS donations_subject_idx      ON donations(subject_id);
CREATE INDEX IF NOT EXISTS donations_natural_idx
    ON donations(subject_id, donor_name, IFNULL(year, 0));

PRAGMA user_version = 1;
";
