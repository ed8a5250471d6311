use chrono::Utc;
use rusqlite::params;

use enleve_shared::models::{ChatHistoryEntry, ChatMessage};

use crate::database::{conversion_error, ts_from_sql, ts_to_sql, Database};
use crate::error::Result;

impl Database {
    pub fn append_chat_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<ChatHistoryEntry> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO n8n_chat_histories (session_id, message, created_at) VALUES (?1, ?2, ?3)",
            params![session_id, serde_json::to_string(message)?, ts_to_sql(now)],
        )?;

        Ok(ChatHistoryEntry {
            id: self.conn().last_insert_rowid(),
            session_id: session_id.to_string(),
            message: message.clone(),
            created_at: Some(now),
        })
    }

    /// Messages of one session in the order they were logged.
    pub fn chat_history(&self, session_id: &str) -> Result<Vec<ChatHistoryEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, message, created_at
             FROM n8n_chat_histories WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let raw: String = row.get(2)?;
            let message: ChatMessage =
                serde_json::from_str(&raw).map_err(|e| conversion_error(2, e))?;
            Ok(ChatHistoryEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                message,
                created_at: ts_from_sql(3, row.get(3)?)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
