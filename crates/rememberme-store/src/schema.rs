//! Database schema.

/// Statements creating the current schema; all idempotent.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS people (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        relationship    TEXT NOT NULL,
        key_facts       TEXT NOT NULL DEFAULT '',
        recent_topics   TEXT NOT NULL DEFAULT '',
        photo           BLOB,
        photo_sha256    TEXT,
        reference       BLOB,
        reference_model TEXT,
        created_at      TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS conversations (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        person_id     TEXT NOT NULL,
        person_name   TEXT NOT NULL,
        recorded_at   TEXT NOT NULL,
        bullet_points TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_conversations_person ON conversations(person_id, recorded_at)",
];
