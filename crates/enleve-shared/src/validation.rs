//! Input rules checked before anything leaves the client.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::{
    ALLOWED_AVATAR_TYPES, DISPLAY_NAME_MAX, DISPLAY_NAME_MIN, EMAIL_MAX, MAX_AVATAR_SIZE,
    PASSWORD_MAX, PASSWORD_MIN,
};
use crate::error::ValidationError;
use crate::types::{Role, UserId};

/// Trim and length-check a display name. Returns the trimmed value.
pub fn display_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len < DISPLAY_NAME_MIN {
        return Err(ValidationError::NameTooShort);
    }
    if len > DISPLAY_NAME_MAX {
        return Err(ValidationError::NameTooLong);
    }
    Ok(trimmed.to_string())
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the
/// domain with something on both sides.
pub fn email(raw: &str) -> Result<String, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField);
    }
    if value.chars().count() > EMAIL_MAX {
        return Err(ValidationError::EmailTooLong);
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail);
    }

    let (local, domain) = value.split_once('@').ok_or(ValidationError::InvalidEmail)?;
    if local.is_empty() || domain.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    let has_inner_dot = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !has_inner_dot {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(value.to_string())
}

pub fn role(raw: &str) -> Result<Role, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::MissingField);
    }
    raw.trim().parse().map_err(|_| ValidationError::InvalidRole)
}

/// Password typed at sign-in: only presence is checked.
pub fn sign_in_password(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::PasswordMissing);
    }
    Ok(())
}

/// Password chosen at sign-up.
pub fn new_password(raw: &str) -> Result<(), ValidationError> {
    let len = raw.chars().count();
    if len < PASSWORD_MIN {
        return Err(ValidationError::PasswordTooShort);
    }
    if len > PASSWORD_MAX {
        return Err(ValidationError::PasswordTooLong);
    }
    Ok(())
}

/// Reject unsupported image types and oversized files.
pub fn avatar(content_type: &str, size: usize) -> Result<(), ValidationError> {
    if !ALLOWED_AVATAR_TYPES.contains(&content_type) {
        return Err(ValidationError::UnsupportedFileType(content_type.to_string()));
    }
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > MAX_AVATAR_SIZE {
        return Err(ValidationError::FileTooLarge {
            size,
            max: MAX_AVATAR_SIZE,
        });
    }
    Ok(())
}

/// Lowercased, alphanumeric-only extension of `file_name`, `jpg` if none.
pub fn avatar_extension(file_name: &str) -> String {
    let ext: String = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    if ext.is_empty() {
        "jpg".to_string()
    } else {
        ext
    }
}

/// Storage path for a new avatar, namespaced by owner.
pub fn avatar_path(owner: UserId, at: DateTime<Utc>, nonce: Uuid, ext: &str) -> String {
    let suffix = &nonce.simple().to_string()[..8];
    format!("{}/{}-{}.{}", owner, at.timestamp_millis(), suffix, ext)
}
