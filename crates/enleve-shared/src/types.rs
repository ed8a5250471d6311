use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Auth identity of a user (broker or admin)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AttendanceId(pub i64);

impl fmt::Display for AttendanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contact channel a lead arrived through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    WhatsApp,
    Instagram,
    /// Any channel the ingestion process knows about and we don't.
    Other(String),
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Other(raw) => raw,
        }
    }

    /// Human-readable badge label.
    pub fn label(&self) -> &str {
        match self {
            Self::WhatsApp => "WhatsApp",
            Self::Instagram => "Instagram",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "whatsapp" => Self::WhatsApp,
            "instagram" => Self::Instagram,
            _ => Self::Other(value),
        }
    }
}

impl From<Channel> for String {
    fn from(value: Channel) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an attendance currently sits on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "Automatizado")]
    Automatizado,
    #[serde(rename = "Em Espera")]
    EmEspera,
    #[serde(rename = "Com Corretor")]
    ComCorretor,
    #[serde(rename = "Finalizado")]
    Finalizado,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        Self::Automatizado,
        Self::EmEspera,
        Self::ComCorretor,
        Self::Finalizado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatizado => "Automatizado",
            Self::EmEspera => "Em Espera",
            Self::ComCorretor => "Com Corretor",
            Self::Finalizado => "Finalizado",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown attendance status: {s}"))
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Corretor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Corretor => "corretor",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Admin => "Administrador",
            Self::Corretor => "Corretor",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "corretor" => Ok(Self::Corretor),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
