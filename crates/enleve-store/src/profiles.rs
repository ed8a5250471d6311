use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use enleve_shared::models::{BrokerProfile, ProfilePatch};
use enleve_shared::types::{Role, UserId};

use crate::database::{conversion_error, ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};

const COLUMNS: &str = "id, nome_completo, foto_url, posicao_fila, role, created_at, updated_at";

impl Database {
    /// Insert or replace a profile. The profile's role is also recorded as a
    /// role membership.
    pub fn upsert_profile(&self, profile: &BrokerProfile) -> Result<BrokerProfile> {
        let now = ts_to_sql(Utc::now());
        let created = profile.created_at.map(ts_to_sql).unwrap_or_else(|| now.clone());

        self.conn().execute(
            "INSERT INTO profiles (id, nome_completo, foto_url, posicao_fila, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                nome_completo = excluded.nome_completo,
                foto_url = excluded.foto_url,
                posicao_fila = excluded.posicao_fila,
                role = excluded.role,
                updated_at = excluded.updated_at",
            params![
                profile.id.to_string(),
                profile.display_name,
                profile.avatar_path,
                profile.queue_position,
                profile.role.as_str(),
                created,
                now,
            ],
        )?;
        self.grant_role(profile.id, profile.role)?;

        self.get_profile(profile.id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_profile(&self, id: UserId) -> Result<Option<BrokerProfile>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.to_string()],
                row_to_profile,
            )
            .optional()?)
    }

    pub fn list_profiles(&self, ids: &[UserId]) -> Result<Vec<BrokerProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {COLUMNS} FROM profiles WHERE id IN ({}) ORDER BY nome_completo ASC",
            placeholders.join(", ")
        );
        let values = ids.iter().map(|id| Value::Text(id.to_string()));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_profile)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }

    pub fn update_profile(&self, id: UserId, patch: &ProfilePatch) -> Result<BrokerProfile> {
        let affected = self.conn().execute(
            "UPDATE profiles
             SET nome_completo = COALESCE(?1, nome_completo),
                 foto_url = COALESCE(?2, foto_url),
                 updated_at = ?3
             WHERE id = ?4",
            params![
                patch.display_name,
                patch.avatar_path,
                ts_to_sql(Utc::now()),
                id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_profile(id)?.ok_or(StoreError::NotFound)
    }

    /// Corretores currently in the queue, next turn first.
    pub fn list_queue(&self) -> Result<Vec<BrokerProfile>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM profiles
             WHERE role = 'corretor' AND posicao_fila IS NOT NULL
             ORDER BY posicao_fila ASC"
        ))?;
        let rows = stmt.query_map([], row_to_profile)?;

        let mut queue = Vec::new();
        for row in rows {
            queue.push(row?);
        }
        Ok(queue)
    }

    pub fn grant_role(&self, user: UserId, role: Role) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user.to_string(), role.as_str()],
        )?;
        Ok(())
    }

    pub fn revoke_role(&self, user: UserId, role: Role) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_roles WHERE user_id = ?1 AND role = ?2",
            params![user.to_string(), role.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn roles_of(&self, user: UserId) -> Result<Vec<Role>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role ASC")?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            let raw: String = row.get(0)?;
            raw.parse::<Role>().map_err(|e| {
                conversion_error(0, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })
        })?;

        let mut roles = Vec::new();
        for row in rows {
            roles.push(row?);
        }
        Ok(roles)
    }
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<BrokerProfile> {
    let id_str: String = row.get(0)?;
    let id = UserId::parse(&id_str).map_err(|e| conversion_error(0, e))?;
    let role_str: String = row.get(4)?;
    let role = role_str.parse::<Role>().map_err(|e| {
        conversion_error(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;

    Ok(BrokerProfile {
        id,
        display_name: row.get(1)?,
        avatar_path: row.get(2)?,
        queue_position: row.get(3)?,
        role,
        created_at: ts_from_sql(5, row.get(5)?)?,
        updated_at: ts_from_sql(6, row.get(6)?)?,
    })
}
