use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use parley_shared::{ConversationId, MessageKind, UserId};

use crate::database::{conversion_error, decode_ts, encode_ts, Database};
use crate::error::Result;
use crate::models::{Conversation, Message};

impl Database {
    pub fn conversation_exists(&self, id: &ConversationId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, created_at FROM conversations ORDER BY id ASC")?;

        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let created_str: String = row.get(1)?;
            let id = ConversationId::parse(&id_str).map_err(|e| conversion_error(0, e))?;
            Ok(Conversation {
                id,
                created_at: decode_ts(1, &created_str)?,
            })
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Load a conversation log, oldest first.  Unknown conversations yield an
    /// empty log.
    pub fn load_conversation_log(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, kind, content, timestamp
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Atomically replace the whole log of a conversation.
    ///
    /// The conversation record is created if needed.  Either every message is
    /// written or the previous log stays untouched.
    pub fn replace_conversation_log(
        &mut self,
        id: &ConversationId,
        messages: &[Message],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)",
            params![id.as_str(), encode_ts(&now)],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id.as_str()],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, kind, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for message in messages {
                insert.execute(params![
                    message.id.to_string(),
                    id.as_str(),
                    message.sender_id.as_str(),
                    message.receiver_id.as_str(),
                    message.kind.as_str(),
                    message.content,
                    encode_ts(&message.timestamp),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Find the conversation that owns a message.
    pub fn find_message_conversation(&self, message_id: Uuid) -> Result<Option<ConversationId>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT conversation_id FROM messages WHERE id = ?1",
                params![message_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| ConversationId::parse(&s))
            .transpose()
            .map_err(|e| crate::StoreError::Corrupt(e.to_string()))
    }

    /// Remove a conversation and all of its messages.
    ///
    /// Returns `true` if the conversation record existed.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id.as_str()],
        )?;
        let affected = tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.as_str()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let content: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
    let sender_id = UserId::new(sender_str).map_err(|e| conversion_error(1, e))?;
    let receiver_id = UserId::new(receiver_str).map_err(|e| conversion_error(2, e))?;
    let kind: MessageKind = kind_str.parse().map_err(|e| conversion_error(3, e))?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        kind,
        content,
        timestamp: decode_ts(5, &ts_str)?,
    })
}
