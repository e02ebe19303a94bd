//! SQL schema for the Tether SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,   -- trimmed, lower-cased
    display_name  TEXT,
    status        TEXT NOT NULL,          -- 'active' | 'pending'
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    last_login_at TEXT
);

-- One row per linked third-party account.
-- Token columns are replaced wholesale on every refresh.
CREATE TABLE IF NOT EXISTS identities (
    identity_id   TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL REFERENCES users(user_id),
    provider      TEXT NOT NULL,          -- lower-cased, e.g. 'zoom'
    subject       TEXT NOT NULL,
    access_token  TEXT NOT NULL,
    refresh_token TEXT,
    scopes        TEXT NOT NULL DEFAULT '[]',
    expires_at    TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (provider, subject)
);

-- Bearer tokens are stored only as SHA-256 digests.
CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(user_id),
    token_hash  TEXT NOT NULL UNIQUE,
    issued_at   TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    ip          TEXT,
    user_agent  TEXT
);

CREATE INDEX IF NOT EXISTS identities_user_idx ON identities(user_id);
CREATE INDEX IF NOT EXISTS sessions_user_idx   ON sessions(user_id);

PRAGMA user_version = 1;
";
