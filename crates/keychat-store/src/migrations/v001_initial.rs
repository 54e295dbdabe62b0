//! v001 -- Initial schema creation.
//!
//! Creates `contacts`, `personas`, `chats` and `chat_messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts (paired peers)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    uri        TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    sub_name   TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL                    -- RFC-3339
);

-- ----------------------------------------------------------------
-- Personas (local identities, pending until the gateway assigns a URI)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS personas (
    name     TEXT PRIMARY KEY NOT NULL,
    sub_name TEXT NOT NULL DEFAULT '',
    uri      TEXT UNIQUE,
    status   INTEGER NOT NULL DEFAULT 0         -- 0 created, 1 confirming, 2 confirmed
);

-- ----------------------------------------------------------------
-- Chats (one per unordered participant pair, one for broadcast)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id            TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    participant_a TEXT NOT NULL,                -- lexically smaller URI
    participant_b TEXT NOT NULL,
    last_msg      TEXT,
    timestamp     INTEGER NOT NULL DEFAULT 0,   -- unix seconds

    UNIQUE (participant_a, participant_b)
);

-- ----------------------------------------------------------------
-- Chat messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id          TEXT PRIMARY KEY NOT NULL,      -- client-generated, dedup key
    chat_id     TEXT NOT NULL,
    direction   TEXT NOT NULL,                  -- 'send' | 'receive'
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    image_url   TEXT,
    msg         TEXT NOT NULL,                  -- ciphertext
    timestamp   INTEGER NOT NULL,               -- unix seconds

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_chat_ts
    ON chat_messages(chat_id, timestamp);

CREATE INDEX IF NOT EXISTS idx_chat_messages_receiver
    ON chat_messages(receiver_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
