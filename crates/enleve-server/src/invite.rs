//! The invitation flow.
//!
//! Checks run in a fixed order and the first failure ends the request, so a
//! caller who is not an admin never gets as far as creating an invitation or
//! sending mail. Once the invitation exists the email is best effort.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::{error, info, warn};

use enleve_shared::invite::{InviteEmail, InviteRequest, InviteResponse};

use crate::api::AppState;
use crate::error::FunctionError;
use crate::gateway::GatewayError;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn upstream(e: GatewayError) -> FunctionError {
    FunctionError::Upstream(e.to_string())
}

pub async fn invite_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InviteResponse>, FunctionError> {
    let token = bearer(&headers).ok_or(FunctionError::MissingToken)?;

    let caller = state
        .gateway
        .user_for_token(token)
        .await
        .map_err(upstream)?
        .ok_or(FunctionError::Unauthenticated)?;

    if !state
        .gateway
        .is_admin(token, caller.id)
        .await
        .map_err(upstream)?
    {
        warn!(caller = %caller.id, "non-admin attempted an invitation");
        return Err(FunctionError::NotAdmin);
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FunctionError::InvalidBody);
    }
    let request: InviteRequest =
        serde_json::from_slice(&body).map_err(|_| FunctionError::InvalidBody)?;
    let invite = request.validate()?;

    info!(
        admin = caller.email.as_deref().unwrap_or("?"),
        email = %invite.email,
        role = %invite.role,
        "sending invitation"
    );

    state
        .gateway
        .invite_user_by_email(&invite.email, invite.role, &state.config.redirect_url)
        .await
        .map_err(|e| match e {
            GatewayError::Rejected(message) => {
                error!(email = %invite.email, reason = %message, "invitation refused");
                FunctionError::InviteFailed(message)
            }
            other => upstream(other),
        })?;
    info!(email = %invite.email, "invitation created");

    let email = InviteEmail::render(&invite);
    match &state.mailer {
        Some(mailer) => match mailer.send(&email).await {
            Ok(()) => info!(to = %email.to, "invitation email sent"),
            Err(e) => error!(to = %email.to, error = %e, "invitation email failed"),
        },
        None => warn!("no mailer configured, invitation email skipped"),
    }

    Ok(Json(InviteResponse::ok()))
}
