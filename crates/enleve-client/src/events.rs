//! One-shot user notices.
//!
//! Every user action reports its outcome as exactly one [`Notice`]. Notices
//! are not persisted; the front-end decides how to show them.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ClientError;

pub const MSG_CLAIMED: &str = "Atendimento assumido!";
pub const MSG_CLAIMED_ROTATED: &str = "Atendimento assumido! Você foi movido para o final da fila.";
pub const MSG_CLAIM_FAILED: &str = "Erro ao assumir atendimento";
pub const MSG_FINALIZED: &str = "Atendimento finalizado!";
pub const MSG_FINALIZE_FAILED: &str = "Erro ao finalizar atendimento";
pub const MSG_LOAD_FAILED: &str = "Erro ao carregar dados";
pub const MSG_PROFILE_UPDATED: &str = "Perfil atualizado!";
pub const MSG_PROFILE_UPDATE_FAILED: &str = "Erro ao atualizar perfil";
pub const MSG_AVATAR_UPDATED: &str = "Foto atualizada!";
pub const MSG_AVATAR_UPLOAD_FAILED: &str = "Erro ao fazer upload da foto";
pub const MSG_AVATAR_SAVE_FAILED: &str = "Erro ao atualizar foto no perfil";
pub const MSG_AVATAR_PREVIEW_FAILED: &str = "Erro ao carregar a prévia da foto.";
pub const MSG_NEW_LEAD: &str = "Novo lead aguardando!";
pub const MSG_INVITE_SENT: &str = "Convite enviado com sucesso!";
pub const MSG_INVITE_FAILED: &str = "Erro ao enviar convite";
pub const MSG_SIGNED_IN: &str = "Bem-vindo de volta!";
pub const MSG_SIGN_IN_FAILED: &str = "Email ou senha incorretos";
pub const MSG_SIGNED_UP: &str = "Conta criada! Verifique seu email.";
pub const MSG_ALREADY_REGISTERED: &str = "Email já cadastrado";
pub const MSG_SIGN_UP_FAILED: &str = "Erro ao criar conta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Notice {
    pub fn success(title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title)
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title)
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title)
    }

    /// Error notice for a failed action. Errors the user can act on keep
    /// their own message; backend failures get the action's generic text.
    pub fn failure(err: &ClientError, fallback: &str) -> Self {
        match err {
            ClientError::Backend(_) | ClientError::Config(_) => Self::error(fallback),
            other => Self::error(other.to_string()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }

    fn new(level: NoticeLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            description: None,
        }
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => {
                tracing::warn!(title = %notice.title, description = ?notice.description, "notice")
            }
            _ => tracing::info!(title = %notice.title, description = ?notice.description, "notice"),
        }
    }
}

/// Forwards notices to a channel consumed by the front-end.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            tracing::debug!("notice dropped, no receiver");
        }
    }
}
