//! Contracts of the backend-as-a-service the CRM talks to.
//!
//! The hosted service (REST + realtime) and the local SQLite store both
//! implement these traits, so the board, profile and dashboard logic never
//! knows which one it is driving.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::invite::{InviteRequest, InviteResponse};
use crate::models::{
    Attendance, AttendancePatch, AuthUser, BrokerProfile, ChatHistoryEntry, ClientPreference,
    ProfilePatch, SignedUrl,
};
use crate::types::{AttendanceId, AttendanceStatus, Channel, Role, UserId};

/// Buffered change events per subscription before new ones are dropped.
pub const SUBSCRIPTION_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOrder {
    CreatedAt,
    QueuedAt,
    UpdatedAt,
}

impl AttendanceOrder {
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::QueuedAt => "timestamp_fila",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Equality filters plus one ordering directive over `atendimento`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceQuery {
    pub status: Option<AttendanceStatus>,
    pub channel: Option<Channel>,
    pub assigned_broker: Option<UserId>,
    pub order: Option<(AttendanceOrder, SortOrder)>,
    pub limit: Option<usize>,
}

impl AttendanceQuery {
    pub fn with_status(status: AttendanceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn order_by(mut self, column: AttendanceOrder, order: SortOrder) -> Self {
        self.order = Some((column, order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// Row after the change (absent for deletes).
    pub new: Option<Value>,
}

impl ChangeEvent {
    pub fn column_str(&self, column: &str) -> Option<&str> {
        self.new.as_ref()?.get(column)?.as_str()
    }
}

/// Which events a subscription wants: one table, optionally one event kind
/// and one `column = value` condition on the new row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: String,
    pub kind: Option<ChangeKind>,
    pub column_eq: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            kind: None,
            column_eq: None,
        }
    }

    pub fn on(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn where_eq(mut self, column: &str, value: &str) -> Self {
        self.column_eq = Some((column.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(kind) = self.kind {
            if kind != event.kind {
                return false;
            }
        }
        match &self.column_eq {
            Some((column, value)) => event.column_str(column) == Some(value.as_str()),
            None => true,
        }
    }
}

/// Receiving end of a change subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn channel() -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self { rx })
    }

    /// Next event, or `None` once the feed has shut down.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Next buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain events that are already buffered without waiting.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.try_recv().is_some() {
            drained += 1;
        }
        drained
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Filtered reads and narrow updates on the record collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_attendances(&self, query: &AttendanceQuery)
        -> Result<Vec<Attendance>, BackendError>;

    async fn count_attendances(&self, query: &AttendanceQuery) -> Result<u64, BackendError>;

    async fn get_attendance(&self, id: AttendanceId) -> Result<Attendance, BackendError>;

    /// Apply `patch` only if the row is still in `expected` status.
    /// Returns the row as written, or `None` when no row matched (someone
    /// else got there first).
    async fn update_attendance_if(
        &self,
        id: AttendanceId,
        expected: AttendanceStatus,
        patch: &AttendancePatch,
    ) -> Result<Option<Attendance>, BackendError>;

    async fn get_profile(&self, id: UserId) -> Result<Option<BrokerProfile>, BackendError>;

    async fn list_profiles(&self, ids: &[UserId]) -> Result<Vec<BrokerProfile>, BackendError>;

    /// Returns the profile as written.
    async fn update_profile(
        &self,
        id: UserId,
        patch: &ProfilePatch,
    ) -> Result<BrokerProfile, BackendError>;

    async fn roles_of(&self, user: UserId) -> Result<Vec<Role>, BackendError>;

    async fn list_preferences(&self, limit: usize) -> Result<Vec<ClientPreference>, BackendError>;

    async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatHistoryEntry>, BackendError>;
}

/// Remote procedures.
#[async_trait]
pub trait QueueProcedures: Send + Sync {
    /// Move `broker` to the back of the round-robin queue.
    async fn rotate_queue(&self, broker: UserId) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), BackendError>;

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<SignedUrl, BackendError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, BackendError>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// The signed-in user, `None` when there is no valid session.
    async fn current_user(&self) -> Result<Option<AuthUser>, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Server-side functions callable with the caller's session.
#[async_trait]
pub trait AdminFunctions: Send + Sync {
    async fn invite_user(&self, request: &InviteRequest) -> Result<InviteResponse, BackendError>;
}

/// Everything the CRM screens need from a backend.
pub trait Backend: RecordStore + QueueProcedures + ObjectStorage + ChangeFeed + Identity {}

impl<T> Backend for T where T: RecordStore + QueueProcedures + ObjectStorage + ChangeFeed + Identity
{}
