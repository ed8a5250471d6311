//! Own profile: display name and avatar.
//!
//! The profile stores the avatar's storage path, never a URL. Every read
//! asks for a fresh one-hour signed URL.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use enleve_shared::constants::AVATAR_BUCKET;
use enleve_shared::models::{BrokerProfile, ProfilePatch, SignedUrl};
use enleve_shared::types::Role;
use enleve_shared::validation;

use crate::commands::sign_avatar;
use crate::error::{ClientError, Result};
use crate::events::{
    Notice, MSG_AVATAR_PREVIEW_FAILED, MSG_AVATAR_SAVE_FAILED, MSG_AVATAR_UPDATED,
    MSG_AVATAR_UPLOAD_FAILED, MSG_LOAD_FAILED, MSG_PROFILE_UPDATED, MSG_PROFILE_UPDATE_FAILED,
};
use crate::state::AppState;

/// A picture picked by the user.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub profile: BrokerProfile,
    pub role_label: String,
    pub avatar: Option<SignedUrl>,
}

/// Result of an avatar change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarChange {
    pub profile: BrokerProfile,
    /// `None` when the picture was saved but could not be signed yet.
    pub avatar: Option<SignedUrl>,
}

pub struct ProfileScreen {
    state: Arc<AppState>,
}

impl ProfileScreen {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn load(&self) -> Result<ProfileView> {
        let result = self.try_load().await;
        if let Err(ref e) = result {
            warn!(error = %e, "profile load failed");
            self.state.notify(Notice::failure(e, MSG_LOAD_FAILED));
        }
        result
    }

    async fn try_load(&self) -> Result<ProfileView> {
        let session = self.state.session.require_user().await?;
        let backend = self.state.backend();
        let profile = backend
            .get_profile(session.user_id())
            .await?
            .ok_or(ClientError::ProfileMissing)?;

        let role = if session.is_admin() {
            Role::Admin
        } else {
            session.roles.first().copied().unwrap_or(profile.role)
        };
        let role_label = role.label().to_string();

        let avatar = match profile.avatar_path.as_deref() {
            Some(path) => match sign_avatar(backend, path).await {
                Ok(signed) => Some(signed),
                Err(e) => {
                    // The rest of the profile is still usable.
                    warn!(path, error = %e, "avatar preview unavailable");
                    self.state.notify(Notice::error(MSG_AVATAR_PREVIEW_FAILED));
                    None
                }
            },
            None => None,
        };

        Ok(ProfileView {
            profile,
            role_label,
            avatar,
        })
    }

    pub async fn update_display_name(&self, raw: &str) -> Result<BrokerProfile> {
        let result = self.try_update_display_name(raw).await;
        match &result {
            Ok(_) => self.state.notify(Notice::success(MSG_PROFILE_UPDATED)),
            Err(e) => {
                warn!(error = %e, "profile update failed");
                self.state.notify(Notice::failure(e, MSG_PROFILE_UPDATE_FAILED));
            }
        }
        result
    }

    async fn try_update_display_name(&self, raw: &str) -> Result<BrokerProfile> {
        let name = validation::display_name(raw)?;
        let session = self.state.session.require_user().await?;
        let backend = self.state.backend();

        let profile = backend
            .update_profile(
                session.user_id(),
                &ProfilePatch {
                    display_name: Some(name),
                    avatar_path: None,
                },
            )
            .await?;
        info!(user = %session.user_id(), "display name updated");
        Ok(profile)
    }

    /// Validate, upload, persist the path, and sign the new picture.
    /// Type and size are checked before anything is sent. Once the path is
    /// saved the change stands even if signing fails.
    pub async fn upload_avatar(&self, upload: AvatarUpload) -> Result<AvatarChange> {
        let result = self.try_upload_avatar(upload).await;
        match &result {
            Ok(change) if change.avatar.is_none() => self.state.notify(
                Notice::success(MSG_AVATAR_UPDATED).with_description(MSG_AVATAR_PREVIEW_FAILED),
            ),
            Ok(_) => self.state.notify(Notice::success(MSG_AVATAR_UPDATED)),
            Err((e, fallback)) => {
                warn!(error = %e, "avatar update failed");
                self.state.notify(Notice::failure(e, fallback));
            }
        }
        result.map_err(|(e, _)| e)
    }

    async fn try_upload_avatar(
        &self,
        upload: AvatarUpload,
    ) -> std::result::Result<AvatarChange, (ClientError, &'static str)> {
        let upload_failed = |e: ClientError| (e, MSG_AVATAR_UPLOAD_FAILED);
        let save_failed = |e: ClientError| (e, MSG_AVATAR_SAVE_FAILED);

        validation::avatar(&upload.content_type, upload.bytes.len())
            .map_err(|e| upload_failed(e.into()))?;

        let session = self
            .state
            .session
            .require_user()
            .await
            .map_err(upload_failed)?;
        let me = session.user_id();
        let backend = self.state.backend();

        let ext = validation::avatar_extension(&upload.file_name);
        let path = validation::avatar_path(me, Utc::now(), Uuid::new_v4(), &ext);
        let size = upload.bytes.len();

        backend
            .upload(AVATAR_BUCKET, &path, upload.bytes, &upload.content_type, true)
            .await
            .map_err(|e| upload_failed(e.into()))?;

        let profile = backend
            .update_profile(
                me,
                &ProfilePatch {
                    display_name: None,
                    avatar_path: Some(path.clone()),
                },
            )
            .await
            .map_err(|e| save_failed(e.into()))?;
        info!(user = %me, path = %path, size, "avatar updated");

        let avatar = match sign_avatar(backend, &path).await {
            Ok(signed) => Some(signed),
            Err(e) => {
                warn!(path = %path, error = %e, "new avatar saved but not signed");
                None
            }
        };
        Ok(AvatarChange { profile, avatar })
    }
}
