use thiserror::Error;

use crate::types::AttendanceStatus;

/// Rejected user input. Messages are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Nome deve ter no mínimo 2 caracteres")]
    NameTooShort,

    #[error("Nome muito longo")]
    NameTooLong,

    #[error("Email e role são obrigatórios")]
    MissingField,

    #[error("Email inválido")]
    InvalidEmail,

    #[error("Email muito longo")]
    EmailTooLong,

    #[error("Role inválida. Use 'admin' ou 'corretor'")]
    InvalidRole,

    #[error("Senha obrigatória")]
    PasswordMissing,

    #[error("Senha deve ter no mínimo 8 caracteres")]
    PasswordTooShort,

    #[error("Senha muito longa")]
    PasswordTooLong,

    #[error("Formato inválido. Use JPEG, PNG, WebP ou GIF")]
    UnsupportedFileType(String),

    #[error("Arquivo muito grande. Máximo: 5MB")]
    FileTooLarge { size: usize, max: usize },

    #[error("Arquivo vazio")]
    EmptyFile,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Attendance is already closed")]
    Terminal,

    #[error("Cannot move attendance from {from} to {to}")]
    NotAllowed {
        from: AttendanceStatus,
        to: AttendanceStatus,
    },

    #[error("Attendance is {found}, expected {expected}")]
    WrongColumn {
        expected: AttendanceStatus,
        found: AttendanceStatus,
    },
}

/// Failure talking to the backend (hosted or local).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Record not found")]
    NotFound,

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid state transition: {0}")]
    Transition(#[from] TransitionError),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
