pub mod admin;
pub mod auth;
pub mod board;
pub mod dashboard;
pub mod profile;

use chrono::Duration;
use serde::Serialize;

use enleve_shared::backend::Backend;
use enleve_shared::constants::{AVATAR_BUCKET, SIGNED_URL_TTL_SECS};
use enleve_shared::models::{BrokerProfile, SignedUrl};
use enleve_shared::types::UserId;
use enleve_shared::BackendError;

/// A fresh signed URL for an avatar path. Never cached.
pub(crate) async fn sign_avatar(
    backend: &dyn Backend,
    path: &str,
) -> Result<SignedUrl, BackendError> {
    backend
        .create_signed_url(AVATAR_BUCKET, path, Duration::seconds(SIGNED_URL_TTL_SECS))
        .await
}

/// What the board and dashboard show about a broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerSummary {
    pub id: UserId,
    pub display_name: String,
    pub initial: char,
    pub avatar_url: Option<String>,
}

impl BrokerSummary {
    /// Summarize `profile`, signing its avatar if it has one. A signing
    /// failure only drops the picture.
    pub(crate) async fn resolve(backend: &dyn Backend, profile: &BrokerProfile) -> Self {
        let avatar_url = match profile.avatar_path.as_deref() {
            Some(path) => match sign_avatar(backend, path).await {
                Ok(signed) => Some(signed.url),
                Err(e) => {
                    tracing::debug!(broker = %profile.id, error = %e, "avatar not signed");
                    None
                }
            },
            None => None,
        };
        Self {
            id: profile.id,
            display_name: profile.display_name.clone(),
            initial: profile.initial(),
            avatar_url,
        }
    }
}
