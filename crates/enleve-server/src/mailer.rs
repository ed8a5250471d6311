//! Invitation email delivery.

use async_trait::async_trait;
use serde_json::json;

use enleve_shared::invite::InviteEmail;

use crate::config::FunctionConfig;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &InviteEmail) -> Result<(), MailError>;
}

/// Sends through the Resend HTTP API.
pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    /// `None` when no API key is configured.
    pub fn from_config(config: &FunctionConfig) -> Option<Self> {
        let api_key = config.resend_api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.resend_url.clone(),
            api_key,
            from: config.mail_from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &InviteEmail) -> Result<(), MailError> {
        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .map_err(|e| MailError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(MailError(format!("HTTP {status}: {body}")))
    }
}
