//! Records exchanged with the backend.
//!
//! Field names follow the hosted schema (`cliente_nome`, `posicao_fila`, ...)
//! through serde renames so the same structs decode REST payloads and rows
//! from the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttendanceId, AttendanceStatus, Channel, Role, UserId};

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

/// One customer contact (lead).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attendance {
    pub id: AttendanceId,
    #[serde(rename = "canal")]
    pub channel: Channel,
    #[serde(rename = "cliente_nome")]
    pub customer_name: String,
    #[serde(rename = "cliente_contato")]
    pub customer_contact: String,
    pub status: AttendanceStatus,
    /// Broker currently holding the lead.
    #[serde(rename = "corretor_responsavel_id", default)]
    pub assigned_broker: Option<UserId>,
    /// When the lead entered the waiting queue.
    #[serde(rename = "timestamp_fila", default)]
    pub queued_at: Option<DateTime<Utc>>,
    /// Summary written by the automated assistant.
    #[serde(rename = "relatorio_ia", default)]
    pub ai_report: Option<String>,
    /// Chat session of the automated conversation.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update of an attendance. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttendancePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(
        rename = "corretor_responsavel_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_broker: Option<UserId>,
}

impl AttendancePatch {
    pub fn assign(broker: UserId) -> Self {
        Self {
            status: Some(AttendanceStatus::ComCorretor),
            assigned_broker: Some(broker),
        }
    }

    pub fn finalize() -> Self {
        Self {
            status: Some(AttendanceStatus::Finalizado),
            assigned_broker: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Broker profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerProfile {
    pub id: UserId,
    #[serde(rename = "nome_completo")]
    pub display_name: String,
    /// Storage path of the avatar inside the avatar bucket (never a URL).
    #[serde(rename = "foto_url", default)]
    pub avatar_path: Option<String>,
    #[serde(rename = "posicao_fila", default)]
    pub queue_position: Option<i32>,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BrokerProfile {
    /// First character of the display name, used as avatar fallback.
    pub fn initial(&self) -> char {
        self.display_name.trim().chars().next().unwrap_or('?')
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfilePatch {
    #[serde(rename = "nome_completo", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "foto_url", skip_serializing_if = "Option::is_none")]
    pub avatar_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Client preference
// ---------------------------------------------------------------------------

/// A typed fact extracted from a lead, e.g. `bairro = "Centro"` or `quartos = 3`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientPreference {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "atendimento_id", default)]
    pub attendance_id: Option<AttendanceId>,
    #[serde(rename = "tipo")]
    pub category: String,
    #[serde(rename = "valor_texto", default)]
    pub text_value: Option<String>,
    #[serde(rename = "valor_numero", default)]
    pub numeric_value: Option<f64>,
}

impl ClientPreference {
    /// Text value when present, otherwise the number, otherwise empty.
    pub fn display_value(&self) -> String {
        match (&self.text_value, self.numeric_value) {
            (Some(text), _) if !text.is_empty() => text.clone(),
            (_, Some(n)) => format_number(n),
            _ => String::new(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// ---------------------------------------------------------------------------
// Chat history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Sender tag, `human` or `ai` for the automated assistant.
    #[serde(rename = "type")]
    pub sender: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn is_customer(&self) -> bool {
        self.sender == "human"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatHistoryEntry {
    pub id: i64,
    pub session_id: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The authenticated caller as reported by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Time-limited link to a private object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
