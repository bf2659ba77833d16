//! SQL schema for the journey SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Published playbook documents. Rows are never modified.
CREATE TABLE IF NOT EXISTS playbook_versions (
    version_id   TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL,
    playbook_id  TEXT NOT NULL,
    version      TEXT NOT NULL,
    checksum     TEXT NOT NULL,   -- hex sha-256 of raw_json
    raw_json     TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (tenant_id, checksum)
);

CREATE TABLE IF NOT EXISTS playbook_active (
    tenant_id    TEXT PRIMARY KEY,
    version_id   TEXT NOT NULL REFERENCES playbook_versions(version_id),
    activated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_instances (
    instance_id         TEXT PRIMARY KEY,
    tenant_id           TEXT NOT NULL,
    user_id             TEXT NOT NULL,
    playbook_version_id TEXT NOT NULL REFERENCES playbook_versions(version_id),
    node_slug           TEXT NOT NULL,
    state               TEXT NOT NULL,   -- NodeState, snake_case
    current_rev         INTEGER NOT NULL DEFAULT 0,
    locale              TEXT,
    edited              INTEGER NOT NULL DEFAULT 0,
    submitted_count     INTEGER NOT NULL DEFAULT 0,
    approved_count      INTEGER NOT NULL DEFAULT 0,
    rejected_count      INTEGER NOT NULL DEFAULT 0,
    opened_at           TEXT NOT NULL,
    submitted_at        TEXT,
    updated_at          TEXT NOT NULL,
    UNIQUE (user_id, node_slug, playbook_version_id)
);

CREATE TABLE IF NOT EXISTS node_slots (
    slot_id        TEXT PRIMARY KEY,
    instance_id    TEXT NOT NULL REFERENCES node_instances(instance_id) ON DELETE CASCADE,
    slot_key       TEXT NOT NULL,
    required       INTEGER NOT NULL,
    multiplicity   TEXT NOT NULL,              -- 'single' | 'multi'
    mime_whitelist TEXT NOT NULL DEFAULT '[]', -- JSON array
    max_files      INTEGER,
    position       INTEGER NOT NULL,           -- declaration order
    UNIQUE (instance_id, slot_key)
);

CREATE TABLE IF NOT EXISTS node_attachments (
    seq                          INTEGER PRIMARY KEY AUTOINCREMENT,
    attachment_id                TEXT NOT NULL UNIQUE,
    slot_id                      TEXT NOT NULL REFERENCES node_slots(slot_id) ON DELETE CASCADE,
    document_version_id          TEXT NOT NULL,
    mime                         TEXT NOT NULL,
    filename                     TEXT NOT NULL,
    size_bytes                   INTEGER NOT NULL,
    status                       TEXT NOT NULL DEFAULT 'submitted',
    is_active                    INTEGER NOT NULL DEFAULT 1,
    review_note                  TEXT,
    approved_by                  TEXT,
    approved_at                  TEXT,
    reviewed_document_version_id TEXT,
    reviewed_by                  TEXT,
    reviewed_at                  TEXT,
    attached_by                  TEXT NOT NULL,
    attached_at                  TEXT NOT NULL
);

-- Append-only: no UPDATE is ever issued against the next three tables.
CREATE TABLE IF NOT EXISTS form_revisions (
    instance_id TEXT NOT NULL REFERENCES node_instances(instance_id) ON DELETE CASCADE,
    rev         INTEGER NOT NULL,
    form_data   TEXT NOT NULL,
    edited_by   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (instance_id, rev)
);

CREATE TABLE IF NOT EXISTS node_outcomes (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    outcome_id  TEXT NOT NULL UNIQUE,
    instance_id TEXT NOT NULL REFERENCES node_instances(instance_id) ON DELETE CASCADE,
    value       TEXT NOT NULL,
    decided_by  TEXT NOT NULL,
    note        TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_events (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id    TEXT NOT NULL UNIQUE,
    instance_id TEXT NOT NULL REFERENCES node_instances(instance_id) ON DELETE CASCADE,
    event_type  TEXT NOT NULL,
    payload     TEXT NOT NULL DEFAULT '{}',
    actor_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS form_revisions_append_only
BEFORE UPDATE ON form_revisions
BEGIN SELECT RAISE(ABORT, 'form_revisions is append-only'); END;

CREATE TRIGGER IF NOT EXISTS node_outcomes_append_only
BEFORE UPDATE ON node_outcomes
BEGIN SELECT RAISE(ABORT, 'node_outcomes is append-only'); END;

CREATE TRIGGER IF NOT EXISTS node_events_append_only
BEFORE UPDATE ON node_events
BEGIN SELECT RAISE(ABORT, 'node_events is append-only'); END;

-- Journey projection: the latest instance per (user, node).
CREATE TABLE IF NOT EXISTS journey_states (
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    node_slug   TEXT NOT NULL,
    state       TEXT NOT NULL,
    instance_id TEXT NOT NULL REFERENCES node_instances(instance_id) ON DELETE CASCADE,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, user_id, node_slug)
);

CREATE INDEX IF NOT EXISTS node_instances_latest_idx
    ON node_instances(user_id, node_slug, updated_at);
CREATE INDEX IF NOT EXISTS node_attachments_slot_idx ON node_attachments(slot_id);
CREATE INDEX IF NOT EXISTS node_outcomes_instance_idx ON node_outcomes(instance_id);
CREATE INDEX IF NOT EXISTS node_events_instance_idx ON node_events(instance_id, created_at);

PRAGMA user_version = 1;
";
