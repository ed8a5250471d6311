use serde::{Deserialize, Serialize};

use crate::constants::APP_NAME;
use crate::error::ValidationError;
use crate::types::Role;
use crate::validation;

pub const INVITE_SUCCESS_MESSAGE: &str = "Convite enviado com sucesso";

/// Body accepted by the invitation function.
///
/// Both fields are plain strings on the wire so that malformed input reaches
/// [`InviteRequest::validate`] instead of failing deserialization with an
/// unreadable message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidInvite {
    pub email: String,
    pub role: Role,
}

impl InviteRequest {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            role: role.as_str().to_string(),
        }
    }

    pub fn validate(&self) -> Result<ValidInvite, ValidationError> {
        if self.email.trim().is_empty() || self.role.trim().is_empty() {
            return Err(ValidationError::MissingField);
        }
        let email = validation::email(&self.email)?;
        let role = validation::role(&self.role)?;
        Ok(ValidInvite { email, role })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteResponse {
    pub success: bool,
    pub message: String,
}

impl InviteResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: INVITE_SUCCESS_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteErrorBody {
    pub error: String,
}

/// Notification sent to an invited user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl InviteEmail {
    pub fn render(invite: &ValidInvite) -> Self {
        let html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #333;">Você foi convidado para o {app}</h1>
  <p style="color: #666; font-size: 16px;">
    Olá! Você foi convidado para se juntar ao {app} como <strong>{role}</strong>.
  </p>
  <p style="color: #666; font-size: 16px;">
    Para aceitar o convite e criar sua conta, clique no link que você receberá no email de confirmação.
  </p>
  <p style="color: #666; font-size: 14px; margin-top: 40px;">
    Se você não esperava este convite, pode ignorar este email.
  </p>
  <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
  <p style="color: #999; font-size: 12px;">
    {app} - Sistema de Gerenciamento de Relacionamento com Cliente
  </p>
</div>"#,
            app = APP_NAME,
            role = invite.role.label(),
        );

        Self {
            to: invite.email.clone(),
            subject: format!("Convite para {APP_NAME}"),
            html,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_known_roles() {
        let valid = InviteRequest::new("new@x.com", Role::Corretor)
            .validate()
            .unwrap();
        assert_eq!(valid.email, "new@x.com");
        assert_eq!(valid.role, Role::Corretor);
    }

    #[test]
    fn validate_rejects_bad_input() {
        let missing = InviteRequest {
            email: "new@x.com".into(),
            role: String::new(),
        };
        assert_eq!(missing.validate(), Err(ValidationError::MissingField));

        let bad_role = InviteRequest {
            email: "new@x.com".into(),
            role: "root".into(),
        };
        assert_eq!(bad_role.validate(), Err(ValidationError::InvalidRole));

        let bad_email = InviteRequest {
            email: "new-at-x.com".into(),
            role: "admin".into(),
        };
        assert_eq!(bad_email.validate(), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn email_names_the_role() {
        let invite = ValidInvite {
            email: "boss@x.com".into(),
            role: Role::Admin,
        };
        let mail = InviteEmail::render(&invite);
        assert_eq!(mail.to, "boss@x.com");
        assert_eq!(mail.subject, "Convite para ENLEVE CRM");
        assert!(mail.html.contains("<strong>Administrador</strong>"));
    }

    #[test]
    fn missing_fields_deserialize_empty() {
        let req: InviteRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.validate(), Err(ValidationError::MissingField));
    }
}
