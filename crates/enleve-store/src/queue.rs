//! Round-robin broker queue.
//!
//! Reproduces the contract of the hosted `rotacionar_fila` procedure: the
//! broker leaves its position, every broker behind it moves up by one, and
//! the broker re-enters last. Positions of corretores stay a contiguous
//! `1..=n` ranking.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use enleve_shared::types::UserId;

use crate::database::{ts_to_sql, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Rotate `broker` to the back of the queue. Returns its new position.
    ///
    /// A corretor without a position joins at the end.
    pub fn rotate_queue(&mut self, broker: UserId) -> Result<i32> {
        let now = ts_to_sql(Utc::now());
        let tx = self.conn_mut().transaction()?;

        let current: Option<Option<i32>> = tx
            .query_row(
                "SELECT posicao_fila FROM profiles WHERE id = ?1 AND role = 'corretor'",
                params![broker.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::NotFound);
        };

        if let Some(position) = current {
            tx.execute(
                "UPDATE profiles SET posicao_fila = NULL WHERE id = ?1",
                params![broker.to_string()],
            )?;
            tx.execute(
                "UPDATE profiles
                 SET posicao_fila = posicao_fila - 1, updated_at = ?1
                 WHERE role = 'corretor' AND posicao_fila > ?2",
                params![now, position],
            )?;
        }

        let last: i32 = tx.query_row(
            "SELECT COALESCE(MAX(posicao_fila), 0) FROM profiles
             WHERE role = 'corretor' AND id <> ?1",
            params![broker.to_string()],
            |row| row.get(0),
        )?;
        let new_position = last + 1;
        tx.execute(
            "UPDATE profiles SET posicao_fila = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_position, now, broker.to_string()],
        )?;

        tx.commit()?;

        tracing::debug!(broker = %broker, from = ?current, to = new_position, "queue rotated");
        Ok(new_position)
    }
}
