//! v001 -- Initial schema creation.
//!
//! Creates the conversation log tables (`conversations`, `messages`), the
//! `mutes` table, the quota ledger (`quota_state`, `quota_uploads`) and the
//! `meta` key/value table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (one per unordered pair of users)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY NOT NULL,     -- "<lo>_<hi>" sorted user ids
    created_at TEXT NOT NULL                  -- RFC-3339, fixed width
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    kind            TEXT NOT NULL,              -- text|image|video|document|audio
    content         TEXT NOT NULL,              -- text body or stored file name
    timestamp       TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp ASC);

-- ----------------------------------------------------------------
-- Mutes (at most one per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS mutes (
    user_id          TEXT PRIMARY KEY NOT NULL,
    mute_end         TEXT NOT NULL,
    reason           TEXT NOT NULL,
    escalation_level INTEGER NOT NULL DEFAULT 0,
    is_admin         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mutes_end ON mutes(mute_end);

-- ----------------------------------------------------------------
-- Upload quota ledger
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS quota_state (
    user_id        TEXT NOT NULL,
    category       TEXT NOT NULL,             -- pictures|videos|documents|voice
    last_upload_at TEXT NOT NULL,

    PRIMARY KEY (user_id, category)
);

CREATE TABLE IF NOT EXISTS quota_uploads (
    user_id     TEXT NOT NULL,
    category    TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quota_uploads_user
    ON quota_uploads(user_id, category, uploaded_at);

-- ----------------------------------------------------------------
-- Process-wide bookkeeping (e.g. last daily quota reset)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
