use enleve_shared::{BackendError, TransitionError, ValidationError};
use thiserror::Error;

/// Failure of a user action. `Display` is the text shown to the user.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Sessão inválida ou expirada. Faça login novamente.")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("Não é sua vez na fila!")]
    NotYourTurn,

    #[error("Este atendimento já foi assumido por outro corretor")]
    AlreadyClaimed,

    #[error("Erro: Perfil do usuário não carregado. Tente recarregar a página.")]
    ProfileMissing,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transição inválida: {0}")]
    Transition(#[from] TransitionError),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<BackendError> for ClientError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthenticated => Self::Unauthenticated,
            BackendError::Forbidden(msg) => Self::Forbidden(msg),
            BackendError::Transition(t) => Self::Transition(t),
            other => Self::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
