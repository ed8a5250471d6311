//! Password sign-in and broker self sign-up.

use async_trait::async_trait;
use tracing::{info, warn};

use enleve_shared::models::AuthUser;
use enleve_shared::types::Role;
use enleve_shared::{validation, BackendError};

use crate::error::{ClientError, Result};
use crate::events::{
    Notice, MSG_ALREADY_REGISTERED, MSG_SIGNED_IN, MSG_SIGNED_UP, MSG_SIGN_IN_FAILED,
    MSG_SIGN_UP_FAILED,
};
use crate::session::Session;
use crate::state::AppState;

/// Account data attached to a new sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

/// Identity operations that need credentials.
#[async_trait]
pub trait PasswordAuth: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> std::result::Result<AuthUser, BackendError>;

    async fn sign_up(&self, request: &SignUp) -> std::result::Result<(), BackendError>;
}

pub async fn sign_in(
    state: &AppState,
    auth: &dyn PasswordAuth,
    email: &str,
    password: &str,
) -> Result<Session> {
    let result = try_sign_in(state, auth, email, password).await;
    match &result {
        Ok(session) => {
            info!(user = %session.user_id(), "signed in");
            state.notify(Notice::success(MSG_SIGNED_IN));
        }
        Err(e) => {
            warn!(error = %e, "sign-in failed");
            let notice = match e {
                ClientError::Validation(_) => Notice::failure(e, MSG_SIGN_IN_FAILED),
                _ => Notice::error(MSG_SIGN_IN_FAILED),
            };
            state.notify(notice);
        }
    }
    result
}

async fn try_sign_in(
    state: &AppState,
    auth: &dyn PasswordAuth,
    email: &str,
    password: &str,
) -> Result<Session> {
    let email = validation::email(email)?;
    validation::sign_in_password(password)?;

    auth.sign_in_with_password(&email, password).await?;
    state.session.invalidate().await;
    state.session.require_user().await
}

/// Create a broker account. New accounts always start as `corretor`.
pub async fn sign_up(
    state: &AppState,
    auth: &dyn PasswordAuth,
    email: &str,
    password: &str,
    display_name: &str,
) -> Result<()> {
    let result = try_sign_up(auth, email, password, display_name).await;
    match &result {
        Ok(()) => state.notify(Notice::success(MSG_SIGNED_UP)),
        Err(e) => {
            warn!(error = %e, "sign-up failed");
            let notice = match e {
                ClientError::Validation(_) => Notice::failure(e, MSG_SIGN_UP_FAILED),
                ClientError::Backend(BackendError::Remote { message, .. })
                | ClientError::Backend(BackendError::Conflict(message))
                    if message.contains("already registered") =>
                {
                    Notice::error(MSG_ALREADY_REGISTERED)
                }
                _ => Notice::error(MSG_SIGN_UP_FAILED),
            };
            state.notify(notice);
        }
    }
    result
}

async fn try_sign_up(
    auth: &dyn PasswordAuth,
    email: &str,
    password: &str,
    display_name: &str,
) -> Result<()> {
    let request = SignUp {
        email: validation::email(email)?,
        password: {
            validation::new_password(password)?;
            password.to_string()
        },
        display_name: validation::display_name(display_name)?,
        role: Role::Corretor,
    };
    auth.sign_up(&request).await?;
    info!(email = %request.email, "account created");
    Ok(())
}
