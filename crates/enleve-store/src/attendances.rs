use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use enleve_shared::backend::{AttendanceQuery, SortOrder};
use enleve_shared::models::{Attendance, AttendancePatch};
use enleve_shared::types::{AttendanceId, AttendanceStatus, Channel, UserId};

use crate::database::{conversion_error, ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};

const COLUMNS: &str = "id, canal, cliente_nome, cliente_contato, status, corretor_responsavel_id,
     timestamp_fila, relatorio_ia, session_id, created_at, updated_at";

/// A lead as delivered by the ingestion process.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub channel: Channel,
    pub customer_name: String,
    pub customer_contact: String,
    pub status: AttendanceStatus,
    pub ai_report: Option<String>,
    pub session_id: Option<String>,
}

impl NewAttendance {
    pub fn automated(channel: Channel, name: &str, contact: &str) -> Self {
        Self {
            channel,
            customer_name: name.to_string(),
            customer_contact: contact.to_string(),
            status: AttendanceStatus::Automatizado,
            ai_report: None,
            session_id: None,
        }
    }

    pub fn waiting(channel: Channel, name: &str, contact: &str) -> Self {
        Self {
            status: AttendanceStatus::EmEspera,
            ..Self::automated(channel, name, contact)
        }
    }

    pub fn report(mut self, report: &str) -> Self {
        self.ai_report = Some(report.to_string());
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

impl Database {
    pub fn insert_attendance(&self, new: &NewAttendance) -> Result<Attendance> {
        let now = ts_to_sql(Utc::now());
        // Leads that arrive already waiting enter the queue right away.
        let queued_at = (new.status == AttendanceStatus::EmEspera).then(|| now.clone());

        self.conn().execute(
            "INSERT INTO atendimento
                (canal, cliente_nome, cliente_contato, status, timestamp_fila,
                 relatorio_ia, session_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.channel.as_str(),
                new.customer_name,
                new.customer_contact,
                new.status.as_str(),
                queued_at,
                new.ai_report,
                new.session_id,
                now,
            ],
        )?;

        let id = AttendanceId(self.conn().last_insert_rowid());
        self.get_attendance(id)
    }

    pub fn get_attendance(&self, id: AttendanceId) -> Result<Attendance> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM atendimento WHERE id = ?1"),
                params![id.0],
                row_to_attendance,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_attendances(&self, query: &AttendanceQuery) -> Result<Vec<Attendance>> {
        let (where_sql, values) = where_clause(query);
        let mut sql = format!("SELECT {COLUMNS} FROM atendimento{where_sql}");

        if let Some((column, order)) = query.order {
            let dir = match order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {dir} NULLS LAST, id {dir}", column.column()));
        } else {
            sql.push_str(" ORDER BY id ASC");
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_attendance)?;

        let mut attendances = Vec::new();
        for row in rows {
            attendances.push(row?);
        }
        Ok(attendances)
    }

    pub fn count_attendances(&self, query: &AttendanceQuery) -> Result<u64> {
        let (where_sql, values) = where_clause(query);
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM atendimento{where_sql}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Apply `patch` if the row is still in `expected` status.
    ///
    /// Returns the updated row, or `None` when the row moved on in the
    /// meantime. Patches that would move the status backwards are rejected
    /// before touching the row.
    pub fn update_attendance_if(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        patch: &AttendancePatch,
    ) -> Result<Option<Attendance>> {
        if let Some(next) = patch.status {
            expected.check_transition(next)?;
        }

        let affected = self.conn().execute(
            "UPDATE atendimento
             SET status = COALESCE(?1, status),
                 corretor_responsavel_id = COALESCE(?2, corretor_responsavel_id),
                 updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                patch.status.map(|s| s.as_str()),
                patch.assigned_broker.map(|b| b.to_string()),
                ts_to_sql(Utc::now()),
                id.0,
                expected.as_str(),
            ],
        )?;

        if affected == 0 {
            // Distinguish a missing row from a lost race.
            self.get_attendance(id)?;
            return Ok(None);
        }
        self.get_attendance(id).map(Some)
    }

    /// Hand an automated lead over to the waiting queue.
    pub fn escalate_to_queue(&self, id: AttendanceId) -> Result<Option<Attendance>> {
        AttendanceStatus::Automatizado.check_transition(AttendanceStatus::EmEspera)?;
        let now = ts_to_sql(Utc::now());
        let affected = self.conn().execute(
            "UPDATE atendimento
             SET status = ?1, timestamp_fila = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                AttendanceStatus::EmEspera.as_str(),
                now,
                id.0,
                AttendanceStatus::Automatizado.as_str(),
            ],
        )?;
        if affected == 0 {
            self.get_attendance(id)?;
            return Ok(None);
        }
        self.get_attendance(id).map(Some)
    }

    pub fn find_attendance_by_session(&self, session_id: &str) -> Result<Option<Attendance>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM atendimento WHERE session_id = ?1 LIMIT 1"),
                params![session_id],
                row_to_attendance,
            )
            .optional()?)
    }
}

fn where_clause(query: &AttendanceQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = query.status {
        values.push(Value::Text(status.as_str().to_string()));
        conditions.push(format!("status = ?{}", values.len()));
    }
    if let Some(ref channel) = query.channel {
        values.push(Value::Text(channel.as_str().to_string()));
        conditions.push(format!("canal = ?{}", values.len()));
    }
    if let Some(broker) = query.assigned_broker {
        values.push(Value::Text(broker.to_string()));
        conditions.push(format!("corretor_responsavel_id = ?{}", values.len()));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn row_to_attendance(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    let status_str: String = row.get(4)?;
    let status = status_str.parse::<AttendanceStatus>().map_err(|e| {
        conversion_error(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let broker: Option<String> = row.get(5)?;
    let assigned_broker = broker
        .map(|s| UserId::parse(&s).map_err(|e| conversion_error(5, e)))
        .transpose()?;

    Ok(Attendance {
        id: AttendanceId(row.get(0)?),
        channel: Channel::from(row.get::<_, String>(1)?),
        customer_name: row.get(2)?,
        customer_contact: row.get(3)?,
        status,
        assigned_broker,
        queued_at: ts_from_sql(6, row.get(6)?)?,
        ai_report: row.get(7)?,
        session_id: row.get(8)?,
        created_at: ts_from_sql(9, row.get(9)?)?,
        updated_at: ts_from_sql(10, row.get(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enleve_shared::backend::AttendanceOrder;
    use enleve_shared::models::BrokerProfile;
    use enleve_shared::types::Role;

    fn broker(db: &Database) -> UserId {
        let id = UserId::new();
        db.upsert_profile(&BrokerProfile {
            id,
            display_name: "Carlos".into(),
            avatar_path: None,
            queue_position: Some(1),
            role: Role::Corretor,
            created_at: None,
            updated_at: None,
        })
        .unwrap();
        id
    }

    #[test]
    fn insert_and_filter_by_status() {
        let db = Database::open_in_memory().unwrap();
        db.insert_attendance(&NewAttendance::automated(Channel::WhatsApp, "A", "1"))
            .unwrap();
        let waiting = db
            .insert_attendance(&NewAttendance::waiting(Channel::Instagram, "B", "2"))
            .unwrap();
        assert!(waiting.queued_at.is_some());

        let query = AttendanceQuery::with_status(AttendanceStatus::EmEspera);
        let rows = db.list_attendances(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name, "B");

        let whatsapp = AttendanceQuery::with_status(AttendanceStatus::Automatizado)
            .channel(Channel::WhatsApp);
        assert_eq!(db.count_attendances(&whatsapp).unwrap(), 1);
        let instagram = AttendanceQuery::with_status(AttendanceStatus::Automatizado)
            .channel(Channel::Instagram);
        assert_eq!(db.count_attendances(&instagram).unwrap(), 0);
    }

    #[test]
    fn waiting_ordered_by_queue_time() {
        let db = Database::open_in_memory().unwrap();
        for name in ["first", "second", "third"] {
            db.insert_attendance(&NewAttendance::waiting(Channel::WhatsApp, name, "x"))
                .unwrap();
        }
        let query = AttendanceQuery::with_status(AttendanceStatus::EmEspera)
            .order_by(AttendanceOrder::QueuedAt, SortOrder::Asc);
        let names: Vec<_> = db
            .list_attendances(&query)
            .unwrap()
            .into_iter()
            .map(|a| a.customer_name)
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn conditional_update_loses_race() {
        let db = Database::open_in_memory().unwrap();
        let a = broker(&db);
        let b = broker(&db);
        let lead = db
            .insert_attendance(&NewAttendance::waiting(Channel::WhatsApp, "L", "x"))
            .unwrap();

        let first = db
            .update_attendance_if(lead.id, AttendanceStatus::EmEspera, &AttendancePatch::assign(a))
            .unwrap()
            .expect("first claim wins");
        assert_eq!(first.status, AttendanceStatus::ComCorretor);
        assert_eq!(first.assigned_broker, Some(a));

        let second = db
            .update_attendance_if(lead.id, AttendanceStatus::EmEspera, &AttendancePatch::assign(b))
            .unwrap();
        assert!(second.is_none());
        assert_eq!(db.get_attendance(lead.id).unwrap().assigned_broker, Some(a));
    }

    #[test]
    fn backwards_patch_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let lead = db
            .insert_attendance(&NewAttendance::automated(Channel::WhatsApp, "L", "x"))
            .unwrap();
        db.update_attendance_if(lead.id, AttendanceStatus::Automatizado, &AttendancePatch::finalize())
            .unwrap()
            .unwrap();

        let err = db
            .update_attendance_if(
                lead.id,
                AttendanceStatus::Finalizado,
                &AttendancePatch::assign(UserId::new()),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));
    }

    #[test]
    fn missing_row_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .update_attendance_if(
                AttendanceId(99),
                AttendanceStatus::ComCorretor,
                &AttendancePatch::finalize(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn escalation_sets_queue_time() {
        let db = Database::open_in_memory().unwrap();
        let lead = db
            .insert_attendance(&NewAttendance::automated(Channel::WhatsApp, "L", "x"))
            .unwrap();
        assert!(lead.queued_at.is_none());
        let moved = db.escalate_to_queue(lead.id).unwrap().unwrap();
        assert_eq!(moved.status, AttendanceStatus::EmEspera);
        assert!(moved.queued_at.is_some());
        assert!(db.escalate_to_queue(lead.id).unwrap().is_none());
    }
}
