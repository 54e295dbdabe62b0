//! Chat message records. The message id is the primary key, so a second
//! insert of the same id fails with [`StoreError::Duplicate`].

use rusqlite::params;

use keychat_shared::constants::BROADCAST_ID;
use keychat_shared::ChatDirection;

use crate::database::Database;
use crate::error::{is_constraint_violation, not_found, Result, StoreError};
use crate::models::{Conversation, StoredMessage};

const SELECT_COLUMNS: &str = "SELECT id, chat_id, direction, sender_id, receiver_id, image_url, msg, timestamp
     FROM chat_messages";

impl Database {
    pub fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO chat_messages
                     (id, chat_id, direction, sender_id, receiver_id, image_url, msg, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id,
                    message.chat_id,
                    message.direction.as_str(),
                    message.sender_id,
                    message.receiver_id,
                    message.image_url,
                    message.msg,
                    message.timestamp,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate(message.id.clone())
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    /// True if a message with this id has been recorded.
    pub fn message_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_messages WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_message(&self, id: &str) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Messages of a conversation, oldest first. For the broadcast
    /// conversation this is every message addressed to `ALL`.
    pub fn messages_for_conversation(&self, conversation: &Conversation) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let (filter, key) = if conversation.is_broadcast() {
            ("receiver_id = ?1", BROADCAST_ID)
        } else {
            ("chat_id = ?1", conversation.id.as_str())
        };
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE {filter} ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![key], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let direction_str: String = row.get(2)?;
    let direction = ChatDirection::parse(&direction_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown direction {direction_str}").into(),
        )
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        direction,
        sender_id: row.get(3)?,
        receiver_id: row.get(4)?,
        image_url: row.get(5)?,
        msg: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
