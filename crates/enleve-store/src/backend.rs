//! [`LocalBackend`]: the backend traits over SQLite and on-disk objects.
//!
//! Mirrors the hosted service's access rules where the CRM relies on them:
//! mutations need a signed-in user and a profile can only be edited by its
//! owner. Every mutation is published on the change feed with the row as
//! the hosted service would serialize it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use enleve_shared::backend::{
    AttendanceQuery, ChangeFeed, ChangeFilter, ChangeKind, Identity, ObjectStorage,
    QueueProcedures, RecordStore, Subscription,
};
use enleve_shared::constants::{
    TABLE_ATTENDANCE, TABLE_CHAT_HISTORIES, TABLE_PREFERENCES, TABLE_PROFILES,
};
use enleve_shared::models::{
    Attendance, AttendancePatch, AuthUser, BrokerProfile, ChatHistoryEntry, ChatMessage,
    ClientPreference, ProfilePatch, SignedUrl,
};
use enleve_shared::types::{AttendanceId, AttendanceStatus, Role, UserId};
use enleve_shared::BackendError;

use crate::attendances::NewAttendance;
use crate::changes::ChangeHub;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::objects::{ephemeral_key, ObjectStore};

#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Mutex<Database>>,
    objects: ObjectStore,
    changes: Arc<ChangeHub>,
    session: Arc<RwLock<Option<AuthUser>>>,
}

impl LocalBackend {
    /// Open a persistent backend. The signing key for object URLs is kept
    /// next to the database so URLs survive restarts.
    pub async fn open(db_path: &Path, objects_dir: PathBuf) -> Result<Self> {
        let db = Database::open_at(db_path)?;
        let key = load_or_create_key(&db_path.with_extension("key")).await?;
        let objects = ObjectStore::new(objects_dir, key).await?;
        info!(db = %db_path.display(), "local backend opened");
        Ok(Self::from_parts(db, objects))
    }

    /// Fresh in-memory database with objects under `objects_dir`.
    pub async fn in_memory(objects_dir: PathBuf) -> Result<Self> {
        let db = Database::open_in_memory()?;
        let objects = ObjectStore::new(objects_dir, ephemeral_key()).await?;
        Ok(Self::from_parts(db, objects))
    }

    fn from_parts(db: Database, objects: ObjectStore) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            objects,
            changes: Arc::new(ChangeHub::new()),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn changes(&self) -> &ChangeHub {
        &self.changes
    }

    // -- session ------------------------------------------------------------

    pub async fn set_current_user(&self, id: UserId, email: Option<&str>) {
        *self.session.write().await = Some(AuthUser {
            id,
            email: email.map(String::from),
        });
        debug!(user = %id, "local session started");
    }

    async fn require_session(&self) -> std::result::Result<AuthUser, BackendError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(BackendError::Unauthenticated)
    }

    // -- ingestion ----------------------------------------------------------

    /// Record a lead arriving from a channel.
    pub async fn ingest(&self, new: NewAttendance) -> Result<Attendance> {
        let attendance = self.db.lock().await.insert_attendance(&new)?;
        info!(
            id = attendance.id.0,
            channel = attendance.channel.as_str(),
            status = %attendance.status,
            "lead ingested"
        );
        self.publish(TABLE_ATTENDANCE, ChangeKind::Insert, &attendance);
        Ok(attendance)
    }

    /// Hand an automated lead to the waiting queue. `None` if it had already
    /// left the automated column.
    pub async fn escalate_to_queue(&self, id: AttendanceId) -> Result<Option<Attendance>> {
        let escalated = self.db.lock().await.escalate_to_queue(id)?;
        if let Some(ref attendance) = escalated {
            info!(id = id.0, "lead escalated to queue");
            self.publish(TABLE_ATTENDANCE, ChangeKind::Update, attendance);
        }
        Ok(escalated)
    }

    pub async fn add_preference(
        &self,
        attendance: AttendanceId,
        category: &str,
        text_value: Option<&str>,
        numeric_value: Option<f64>,
    ) -> Result<ClientPreference> {
        let preference = self.db.lock().await.add_preference(
            attendance,
            category,
            text_value,
            numeric_value,
        )?;
        self.publish(TABLE_PREFERENCES, ChangeKind::Insert, &preference);
        Ok(preference)
    }

    pub async fn append_chat_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<ChatHistoryEntry> {
        let entry = self.db.lock().await.append_chat_message(session_id, message)?;
        self.publish(TABLE_CHAT_HISTORIES, ChangeKind::Insert, &entry);
        Ok(entry)
    }

    // -- accounts -----------------------------------------------------------

    pub async fn upsert_profile(&self, profile: &BrokerProfile) -> Result<BrokerProfile> {
        let stored = self.db.lock().await.upsert_profile(profile)?;
        self.publish(TABLE_PROFILES, ChangeKind::Update, &stored);
        Ok(stored)
    }

    /// Register a broker at the end of the queue.
    pub async fn enroll_broker(&self, id: UserId, display_name: &str) -> Result<BrokerProfile> {
        let next = {
            let db = self.db.lock().await;
            db.list_queue()?
                .iter()
                .filter_map(|p| p.queue_position)
                .max()
                .unwrap_or(0)
                + 1
        };
        self.upsert_profile(&BrokerProfile {
            id,
            display_name: display_name.to_string(),
            avatar_path: None,
            queue_position: Some(next),
            role: Role::Corretor,
            created_at: None,
            updated_at: None,
        })
        .await
    }

    pub async fn grant_role(&self, user: UserId, role: Role) -> Result<()> {
        self.db.lock().await.grant_role(user, role)
    }

    pub async fn revoke_role(&self, user: UserId, role: Role) -> Result<bool> {
        self.db.lock().await.revoke_role(user, role)
    }

    /// Corretores in queue order, next turn first.
    pub async fn queue(&self) -> Result<Vec<BrokerProfile>> {
        self.db.lock().await.list_queue()
    }

    fn publish<T: Serialize>(&self, table: &str, kind: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(value) => self.changes.publish(table, kind, Some(value)),
            Err(e) => tracing::warn!(table, error = %e, "failed to encode change event"),
        }
    }
}

async fn load_or_create_key(path: &Path) -> Result<[u8; 32]> {
    if tokio::fs::try_exists(path).await? {
        let encoded = tokio::fs::read_to_string(path).await?;
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| StoreError::InvalidObject(format!("bad signing key file: {e}")))?;
        return <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| StoreError::InvalidObject("signing key must be 32 bytes".into()));
    }
    let key = ephemeral_key();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, hex::encode(key)).await?;
    debug!(path = %path.display(), "created object signing key");
    Ok(key)
}

#[async_trait]
impl RecordStore for LocalBackend {
    async fn list_attendances(
        &self,
        query: &AttendanceQuery,
    ) -> std::result::Result<Vec<Attendance>, BackendError> {
        Ok(self.db.lock().await.list_attendances(query)?)
    }

    async fn count_attendances(
        &self,
        query: &AttendanceQuery,
    ) -> std::result::Result<u64, BackendError> {
        Ok(self.db.lock().await.count_attendances(query)?)
    }

    async fn get_attendance(&self, id: AttendanceId) -> std::result::Result<Attendance, BackendError> {
        Ok(self.db.lock().await.get_attendance(id)?)
    }

    async fn update_attendance_if(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        patch: &AttendancePatch,
    ) -> std::result::Result<Option<Attendance>, BackendError> {
        self.require_session().await?;
        let updated = self
            .db
            .lock()
            .await
            .update_attendance_if(id, expected, patch)?;
        if let Some(attendance) = &updated {
            self.publish(TABLE_ATTENDANCE, ChangeKind::Update, attendance);
        }
        Ok(updated)
    }

    async fn get_profile(
        &self,
        id: UserId,
    ) -> std::result::Result<Option<BrokerProfile>, BackendError> {
        Ok(self.db.lock().await.get_profile(id)?)
    }

    async fn list_profiles(
        &self,
        ids: &[UserId],
    ) -> std::result::Result<Vec<BrokerProfile>, BackendError> {
        Ok(self.db.lock().await.list_profiles(ids)?)
    }

    async fn update_profile(
        &self,
        id: UserId,
        patch: &ProfilePatch,
    ) -> std::result::Result<BrokerProfile, BackendError> {
        let caller = self.require_session().await?;
        if caller.id != id {
            return Err(BackendError::Forbidden(
                "profiles can only be edited by their owner".into(),
            ));
        }
        let profile = self.db.lock().await.update_profile(id, patch)?;
        self.publish(TABLE_PROFILES, ChangeKind::Update, &profile);
        Ok(profile)
    }

    async fn roles_of(&self, user: UserId) -> std::result::Result<Vec<Role>, BackendError> {
        Ok(self.db.lock().await.roles_of(user)?)
    }

    async fn list_preferences(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<ClientPreference>, BackendError> {
        Ok(self.db.lock().await.list_preferences(limit)?)
    }

    async fn chat_history(
        &self,
        session_id: &str,
    ) -> std::result::Result<Vec<ChatHistoryEntry>, BackendError> {
        Ok(self.db.lock().await.chat_history(session_id)?)
    }
}

#[async_trait]
impl QueueProcedures for LocalBackend {
    async fn rotate_queue(&self, broker: UserId) -> std::result::Result<(), BackendError> {
        self.require_session().await?;
        let profile = {
            let mut db = self.db.lock().await;
            db.rotate_queue(broker)?;
            db.get_profile(broker)?
        };
        if let Some(profile) = profile {
            self.publish(TABLE_PROFILES, ChangeKind::Update, &profile);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> std::result::Result<(), BackendError> {
        let caller = self.require_session().await?;
        // Owners write only under their own folder.
        if path.split('/').next() != Some(caller.id.to_string().as_str()) {
            return Err(BackendError::Forbidden(format!(
                "cannot write outside {}/",
                caller.id
            )));
        }
        self.objects.put(bucket, path, &data, upsert).await?;
        debug!(bucket, path, content_type, "object uploaded");
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> std::result::Result<SignedUrl, BackendError> {
        if !self.objects.exists(bucket, path).await? {
            return Err(BackendError::NotFound);
        }
        Ok(self.objects.sign(bucket, path, ttl)?)
    }
}

#[async_trait]
impl ChangeFeed for LocalBackend {
    async fn subscribe(&self, filter: ChangeFilter) -> std::result::Result<Subscription, BackendError> {
        Ok(self.changes.subscribe(filter))
    }
}

#[async_trait]
impl Identity for LocalBackend {
    async fn current_user(&self) -> std::result::Result<Option<AuthUser>, BackendError> {
        Ok(self.session.read().await.clone())
    }

    async fn sign_out(&self) -> std::result::Result<(), BackendError> {
        if let Some(user) = self.session.write().await.take() {
            debug!(user = %user.id, "local session ended");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use enleve_shared::types::Channel;
    use tempfile::TempDir;

    use super::*;

    async fn backend() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::in_memory(dir.path().join("objects"))
            .await
            .unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn ingest_publishes_insert() {
        let (backend, _dir) = backend().await;
        let mut sub = backend
            .subscribe(
                ChangeFilter::table(TABLE_ATTENDANCE)
                    .on(ChangeKind::Insert)
                    .where_eq("status", "Em Espera"),
            )
            .await
            .unwrap();

        backend
            .ingest(NewAttendance::automated(Channel::WhatsApp, "Ana", "+55 11 1"))
            .await
            .unwrap();
        backend
            .ingest(NewAttendance::waiting(Channel::Instagram, "Bia", "@bia"))
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.column_str("cliente_nome"), Some("Bia"));
        assert_eq!(sub.drain(), 0);
    }

    #[tokio::test]
    async fn mutations_need_a_session() {
        let (backend, _dir) = backend().await;
        let lead = backend
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "Ana", "1"))
            .await
            .unwrap();

        let err = backend
            .update_attendance_if(
                lead.id,
                AttendanceStatus::EmEspera,
                &AttendancePatch::assign(UserId::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unauthenticated));
        assert_eq!(
            backend.get_attendance(lead.id).await.unwrap().status,
            AttendanceStatus::EmEspera
        );
    }

    #[tokio::test]
    async fn conditional_update_loses_race() {
        let (backend, _dir) = backend().await;
        let broker = backend.enroll_broker(UserId::new(), "Ana").await.unwrap().id;
        backend.set_current_user(broker, None).await;
        let lead = backend
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "Bia", "1"))
            .await
            .unwrap();

        let patch = AttendancePatch::assign(broker);
        let won = backend
            .update_attendance_if(lead.id, AttendanceStatus::EmEspera, &patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(won.status, AttendanceStatus::ComCorretor);
        assert_eq!(won.assigned_broker, Some(broker));
        assert!(backend
            .update_attendance_if(lead.id, AttendanceStatus::EmEspera, &patch)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_broker_is_a_conflict() {
        let (backend, _dir) = backend().await;
        backend.set_current_user(UserId::new(), None).await;
        let lead = backend
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "Bia", "1"))
            .await
            .unwrap();

        let err = backend
            .update_attendance_if(
                lead.id,
                AttendanceStatus::EmEspera,
                &AttendancePatch::assign(UserId::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        assert_eq!(
            backend.get_attendance(lead.id).await.unwrap().status,
            AttendanceStatus::EmEspera
        );
    }

    #[tokio::test]
    async fn profile_edits_are_owner_only() {
        let (backend, _dir) = backend().await;
        let owner = backend.enroll_broker(UserId::new(), "Carla").await.unwrap();
        backend.set_current_user(UserId::new(), None).await;

        let err = backend
            .update_profile(
                owner.id,
                &ProfilePatch {
                    display_name: Some("Hacked".into()),
                    avatar_path: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Forbidden(_)));
    }

    #[tokio::test]
    async fn upload_then_sign() {
        let (backend, _dir) = backend().await;
        let me = UserId::new();
        backend.set_current_user(me, Some("me@enleve.com")).await;
        let path = format!("{me}/1.png");

        backend
            .upload("avatars", &path, Bytes::from_static(b"img"), "image/png", true)
            .await
            .unwrap();
        let signed = backend
            .create_signed_url("avatars", &path, Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(backend.objects().open_signed(&signed.url).await.unwrap(), b"img");

        let other = format!("{}/1.png", UserId::new());
        assert!(matches!(
            backend
                .upload("avatars", &other, Bytes::from_static(b"img"), "image/png", true)
                .await,
            Err(BackendError::Forbidden(_))
        ));
        assert!(matches!(
            backend
                .create_signed_url("avatars", &format!("{me}/missing.png"), Duration::hours(1))
                .await,
            Err(BackendError::NotFound)
        ));
    }

    #[tokio::test]
    async fn enroll_appends_to_queue_and_rotate_publishes() {
        let (backend, _dir) = backend().await;
        let a = backend.enroll_broker(UserId::new(), "A").await.unwrap();
        let b = backend.enroll_broker(UserId::new(), "B").await.unwrap();
        assert_eq!(a.queue_position, Some(1));
        assert_eq!(b.queue_position, Some(2));

        backend.set_current_user(a.id, None).await;
        let mut sub = backend
            .subscribe(ChangeFilter::table(TABLE_PROFILES))
            .await
            .unwrap();
        backend.rotate_queue(a.id).await.unwrap();

        let queue = backend.queue().await.unwrap();
        assert_eq!(queue[0].id, b.id);
        assert_eq!(queue[1].id, a.id);
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn signing_key_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("crm.db");
        let first = LocalBackend::open(&db_path, dir.path().join("objects"))
            .await
            .unwrap();
        let me = UserId::new();
        first.set_current_user(me, None).await;
        let path = format!("{me}/a.png");
        first
            .upload("avatars", &path, Bytes::from_static(b"a"), "image/png", true)
            .await
            .unwrap();
        let url = first
            .create_signed_url("avatars", &path, Duration::hours(1))
            .await
            .unwrap();
        drop(first);

        let second = LocalBackend::open(&db_path, dir.path().join("objects"))
            .await
            .unwrap();
        assert_eq!(second.objects().open_signed(&url.url).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn sign_out_clears_session() {
        let (backend, _dir) = backend().await;
        backend.set_current_user(UserId::new(), None).await;
        assert!(backend.current_user().await.unwrap().is_some());
        backend.sign_out().await.unwrap();
        assert!(backend.current_user().await.unwrap().is_none());
    }
}
