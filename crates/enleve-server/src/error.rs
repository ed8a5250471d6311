use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use enleve_shared::invite::InviteErrorBody;
use enleve_shared::ValidationError;

/// Why an invitation request was refused. The message is what the caller
/// sees in `{"error": …}`.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Não autorizado")]
    MissingToken,

    #[error("Usuário não autenticado")]
    Unauthenticated,

    #[error("Apenas administradores podem enviar convites")]
    NotAdmin,

    #[error("Corpo da requisição inválido")]
    InvalidBody,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Erro ao convidar usuário: {0}")]
    InviteFailed(String),

    #[error("Erro ao processar convite")]
    Upstream(String),

    #[error("Muitas requisições. Tente novamente em instantes.")]
    RateLimited,
}

impl FunctionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotAdmin => StatusCode::FORBIDDEN,
            Self::InvalidBody | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InviteFailed(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for FunctionError {
    fn into_response(self) -> Response {
        if let Self::Upstream(ref detail) = self {
            tracing::error!(detail = %detail, "upstream failure");
        }
        let body = InviteErrorBody {
            error: self.to_string(),
        };
        (self.status(), axum::Json(body)).into_response()
    }
}
