//! Conversation records.
//!
//! A conversation is identified by its unordered participant pair, stored
//! with the smaller URI first. Any pair that includes the broadcast id maps
//! to the single broadcast conversation `(ALL, ALL)`.

use rusqlite::params;
use uuid::Uuid;

use keychat_shared::constants::BROADCAST_ID;
use keychat_shared::is_broadcast;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Conversation;

const SELECT_COLUMNS: &str = "SELECT id, participant_a, participant_b, last_msg, timestamp FROM chats";

/// Canonical storage key for a participant pair.
pub fn participant_key(a: &str, b: &str) -> (String, String) {
    if is_broadcast(a) || is_broadcast(b) {
        (BROADCAST_ID.to_string(), BROADCAST_ID.to_string())
    } else if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl Database {
    /// Return the conversation between `a` and `b`, creating it if needed.
    /// Argument order does not matter.
    pub fn get_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        let (first, second) = participant_key(a, b);
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chats (id, participant_a, participant_b, last_msg, timestamp)
             VALUES (?1, ?2, ?3, NULL, 0)",
            params![Uuid::new_v4().to_string(), first, second],
        )?;
        if inserted > 0 {
            tracing::debug!(participant_a = %first, participant_b = %second, "created conversation");
        }

        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE participant_a = ?1 AND participant_b = ?2"),
            params![first, second],
            row_to_conversation,
        )
        .map_err(not_found)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    /// Record the latest message preview and time.
    pub fn touch_conversation(&self, id: &str, last_msg: &str, timestamp: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chats SET last_msg = ?2, timestamp = ?3 WHERE id = ?1",
            params![id, last_msg, timestamp],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// All conversations, most recent first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, id"))?;
        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        last_msg: row.get(3)?,
        timestamp: row.get(4)?,
    })
}
