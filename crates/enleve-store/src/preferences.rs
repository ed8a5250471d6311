use chrono::Utc;
use rusqlite::params;

use enleve_shared::models::ClientPreference;
use enleve_shared::types::AttendanceId;

use crate::database::{ts_to_sql, Database};
use crate::error::Result;

impl Database {
    pub fn add_preference(
        &self,
        attendance: AttendanceId,
        category: &str,
        text_value: Option<&str>,
        numeric_value: Option<f64>,
    ) -> Result<ClientPreference> {
        self.conn().execute(
            "INSERT INTO preferenciacliente (atendimento_id, tipo, valor_texto, valor_numero, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attendance.0,
                category,
                text_value,
                numeric_value,
                ts_to_sql(Utc::now()),
            ],
        )?;

        Ok(ClientPreference {
            id: Some(self.conn().last_insert_rowid()),
            attendance_id: Some(attendance),
            category: category.to_string(),
            text_value: text_value.map(String::from),
            numeric_value,
        })
    }

    /// First `limit` preferences in insertion order.
    pub fn list_preferences(&self, limit: usize) -> Result<Vec<ClientPreference>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, atendimento_id, tipo, valor_texto, valor_numero
             FROM preferenciacliente ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ClientPreference {
                id: Some(row.get(0)?),
                attendance_id: Some(AttendanceId(row.get(1)?)),
                category: row.get(2)?,
                text_value: row.get(3)?,
                numeric_value: row.get(4)?,
            })
        })?;

        let mut preferences = Vec::new();
        for row in rows {
            preferences.push(row?);
        }
        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendances::NewAttendance;
    use enleve_shared::types::Channel;

    #[test]
    fn add_and_list_with_limit() {
        let db = Database::open_in_memory().unwrap();
        let lead = db
            .insert_attendance(&NewAttendance::automated(Channel::WhatsApp, "L", "x"))
            .unwrap();
        db.add_preference(lead.id, "bairro", Some("Centro"), None).unwrap();
        db.add_preference(lead.id, "quartos", None, Some(3.0)).unwrap();
        db.add_preference(lead.id, "bairro", Some("Jardins"), None).unwrap();

        let all = db.list_preferences(20).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].numeric_value, Some(3.0));
        assert_eq!(db.list_preferences(2).unwrap().len(), 2);
    }
}
