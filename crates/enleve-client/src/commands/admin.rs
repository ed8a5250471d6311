//! Admin users screen: invite new admins and brokers.

use std::sync::Arc;

use tracing::{info, warn};

use enleve_shared::invite::{InviteRequest, InviteResponse};
use enleve_shared::types::Role;
use enleve_shared::BackendError;

use crate::error::{ClientError, Result};
use crate::events::{Notice, MSG_INVITE_FAILED, MSG_INVITE_SENT};
use crate::session::{Access, Route};
use crate::state::AppState;

pub struct AdminUsers {
    state: Arc<AppState>,
}

impl AdminUsers {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Guard the screen. Denials and missing sessions emit a notice.
    pub async fn open(&self) -> Result<Access> {
        let access = self.state.session.guard(Route::AdminUsers).await?;
        match &access {
            Access::Deny(message) => self.state.notify(Notice::error(message.clone())),
            Access::RedirectToLogin => self
                .state
                .notify(Notice::error(ClientError::Unauthenticated.to_string())),
            Access::Allow(_) | Access::Public => {}
        }
        Ok(access)
    }

    pub async fn invite(&self, email: &str, role: &str) -> Result<InviteResponse> {
        let result = self.try_invite(email, role).await;
        match &result {
            Ok(_) => self.state.notify(Notice::success(MSG_INVITE_SENT)),
            Err(e) => {
                warn!(error = %e, "invitation failed");
                self.state.notify(Notice::error(invite_failure_message(e)));
            }
        }
        result
    }

    async fn try_invite(&self, email: &str, role: &str) -> Result<InviteResponse> {
        let session = self.state.session.require_role(Role::Admin).await?;
        let request = InviteRequest {
            email: email.trim().to_string(),
            role: role.trim().to_string(),
        };
        let valid = request.validate()?;

        let functions = self
            .state
            .functions
            .as_ref()
            .ok_or_else(|| ClientError::Config("invitation function not available".into()))?;
        let response = functions.invite_user(&request).await?;

        info!(
            admin = %session.user_id(),
            email = %valid.email,
            role = %valid.role,
            "invitation sent"
        );
        Ok(response)
    }
}

/// Notice text for a failed invitation, carrying the function's own error
/// message when there is one.
fn invite_failure_message(err: &ClientError) -> String {
    match err {
        ClientError::Backend(BackendError::Remote { message, .. }) if !message.is_empty() => {
            format!("{MSG_INVITE_FAILED}: {message}")
        }
        ClientError::Backend(_) | ClientError::Config(_) => {
            format!("{MSG_INVITE_FAILED}: Verifique os logs da função.")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use enleve_shared::backend::AdminFunctions;
    use enleve_shared::types::UserId;
    use enleve_store::LocalBackend;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::events::ChannelNotifier;
    use crate::session::MSG_ACCESS_DENIED;

    #[derive(Default)]
    struct FakeFunctions {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl AdminFunctions for FakeFunctions {
        async fn invite_user(
            &self,
            _request: &InviteRequest,
        ) -> std::result::Result<InviteResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(message) => Err(BackendError::Remote {
                    status: 400,
                    message: message.clone(),
                }),
                None => Ok(InviteResponse::ok()),
            }
        }
    }

    async fn fixture(
        functions: Arc<FakeFunctions>,
    ) -> (LocalBackend, AdminUsers, UnboundedReceiver<Notice>, TempDir) {
        let dir = TempDir::new().unwrap();
        let local = LocalBackend::in_memory(dir.path().join("objects"))
            .await
            .unwrap();
        let (notifier, notices) = ChannelNotifier::new();
        let state = AppState::new(
            Arc::new(local.clone()),
            Duration::from_secs(30),
            Arc::new(notifier),
        )
        .with_functions(functions);
        (local, AdminUsers::new(Arc::new(state)), notices, dir)
    }

    async fn admin(local: &LocalBackend) -> UserId {
        let id = local.enroll_broker(UserId::new(), "Chefe").await.unwrap().id;
        local.grant_role(id, Role::Admin).await.unwrap();
        local.set_current_user(id, Some("chefe@enleve.com")).await;
        id
    }

    #[tokio::test]
    async fn non_admin_is_denied() {
        let functions = Arc::new(FakeFunctions::default());
        let (local, screen, mut notices, _dir) = fixture(functions.clone()).await;
        let broker = local.enroll_broker(UserId::new(), "Ana").await.unwrap().id;
        local.set_current_user(broker, None).await;

        assert_eq!(
            screen.open().await.unwrap(),
            Access::Deny(MSG_ACCESS_DENIED.into())
        );
        assert_eq!(notices.try_recv().unwrap().title, MSG_ACCESS_DENIED);

        assert!(matches!(
            screen.invite("new@x.com", "corretor").await,
            Err(ClientError::Forbidden(_))
        ));
        assert_eq!(functions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn admin_invites() {
        let functions = Arc::new(FakeFunctions::default());
        let (local, screen, mut notices, _dir) = fixture(functions.clone()).await;
        admin(&local).await;

        assert!(matches!(screen.open().await.unwrap(), Access::Allow(_)));
        let response = screen.invite("new@x.com", "corretor").await.unwrap();
        assert!(response.success);
        assert_eq!(functions.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notices.try_recv().unwrap().title, MSG_INVITE_SENT);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_function() {
        let functions = Arc::new(FakeFunctions::default());
        let (local, screen, mut notices, _dir) = fixture(functions.clone()).await;
        admin(&local).await;

        assert!(screen.invite("not-an-email", "corretor").await.is_err());
        assert_eq!(notices.try_recv().unwrap().title, "Email inválido");
        assert!(screen.invite("new@x.com", "owner").await.is_err());
        assert_eq!(functions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn function_error_is_surfaced() {
        let functions = Arc::new(FakeFunctions {
            calls: AtomicUsize::new(0),
            fail_with: Some("User already registered".into()),
        });
        let (local, screen, mut notices, _dir) = fixture(functions).await;
        admin(&local).await;

        assert!(screen.invite("new@x.com", "admin").await.is_err());
        assert_eq!(
            notices.try_recv().unwrap().title,
            "Erro ao enviar convite: User already registered"
        );
    }
}
