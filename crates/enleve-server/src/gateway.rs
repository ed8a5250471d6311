//! The backend calls the invitation function depends on.
//!
//! Caller checks run with the caller's own token so row-level security
//! applies; only the invitation itself uses the service key.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use enleve_shared::constants::TABLE_USER_ROLES;
use enleve_shared::models::AuthUser;
use enleve_shared::types::{Role, UserId};

use crate::config::FunctionConfig;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The backend refused the request and said why.
    #[error("{0}")]
    Rejected(String),

    #[error("backend unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Resolve the user behind a bearer token. `None` if the token is not
    /// accepted.
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, GatewayError>;

    async fn is_admin(&self, token: &str, user: UserId) -> Result<bool, GatewayError>;

    /// Create the invitation and have the backend send its own link.
    async fn invite_user_by_email(
        &self,
        email: &str,
        role: Role,
        redirect_to: &str,
    ) -> Result<(), GatewayError>;
}

pub struct SupabaseGateway {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
}

impl SupabaseGateway {
    pub fn new(config: &FunctionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.clone(),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
        }
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

async fn rejection(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| format!("HTTP {status}"));
    GatewayError::Rejected(message)
}

#[async_trait]
impl AuthGateway for SupabaseGateway {
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, GatewayError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            s if s.is_success() => Ok(Some(response.json().await.map_err(transport)?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            _ => Err(rejection(response).await),
        }
    }

    async fn is_admin(&self, token: &str, user: UserId) -> Result<bool, GatewayError> {
        let response = self
            .http
            .get(format!("{}/rest/v1/{TABLE_USER_ROLES}", self.base_url))
            .query(&[
                ("select", "role".to_string()),
                ("user_id", format!("eq.{user}")),
                ("role", format!("eq.{}", Role::Admin.as_str())),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let rows: Vec<serde_json::Value> = response.json().await.map_err(transport)?;
        debug!(%user, admin = !rows.is_empty(), "role checked");
        Ok(!rows.is_empty())
    }

    async fn invite_user_by_email(
        &self,
        email: &str,
        role: Role,
        redirect_to: &str,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/invite", self.base_url))
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .json(&json!({ "email": email, "data": { "role": role.as_str() } }))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gateway(server: &MockServer) -> SupabaseGateway {
        SupabaseGateway::new(&FunctionConfig {
            backend_url: server.uri(),
            anon_key: "anon".into(),
            service_role_key: "service".into(),
            ..FunctionConfig::default()
        })
    }

    #[tokio::test]
    async fn resolves_user_and_role_with_callers_token() {
        let server = MockServer::start().await;
        let user = UserId::new();
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer caller"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": user.to_string(),
                "email": "chefe@enleve.com",
                "role": "authenticated"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/user_roles"))
            .and(query_param("user_id", format!("eq.{user}")))
            .and(query_param("role", "eq.admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"role": "admin"}])))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let found = gateway.user_for_token("caller").await.unwrap().unwrap();
        assert_eq!(found.id, user);
        assert!(gateway.is_admin("caller", user).await.unwrap());
    }

    #[tokio::test]
    async fn rejected_token_is_no_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "bad jwt"})))
            .mount(&server)
            .await;
        assert!(gateway(&server)
            .user_for_token("stale")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invite_uses_service_key_and_reports_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/invite"))
            .and(header("authorization", "Bearer service"))
            .and(query_param("redirect_to", "https://crm.example/auth"))
            .and(body_json(json!({"email": "new@x.com", "data": {"role": "corretor"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/invite"))
            .and(body_json(json!({"email": "dup@x.com", "data": {"role": "admin"}})))
            .respond_with(ResponseTemplate::new(422).set_body_json(
                json!({"msg": "A user with this email address has already been registered"}),
            ))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        gateway
            .invite_user_by_email("new@x.com", Role::Corretor, "https://crm.example/auth")
            .await
            .unwrap();
        let err = gateway
            .invite_user_by_email("dup@x.com", Role::Admin, "https://crm.example/auth")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already been registered"));
    }
}
