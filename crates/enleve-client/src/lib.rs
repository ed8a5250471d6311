//! # enleve-client
//!
//! The CRM's screens as an async library: the lead board, dashboard,
//! profile and admin screens, driving either the hosted backend or the
//! local store through the traits in `enleve_shared::backend`.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod invalidation;
pub mod live;
pub mod realtime;
pub mod rest;
pub mod session;
pub mod state;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use enleve_shared::backend::{AdminFunctions, Backend};
use enleve_shared::BackendError;
use enleve_store::LocalBackend;

pub use commands::{admin, board, dashboard, profile};

use crate::commands::auth::{self, PasswordAuth};
use crate::config::{BackendTarget, ClientConfig};
use crate::error::{ClientError, Result};
use crate::events::Notifier;
use crate::rest::RestBackend;
use crate::session::Session;
use crate::state::AppState;

/// Install the log subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("enleve_client=info,enleve_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// A configured backend plus the pieces that only some backends have.
pub struct Client {
    pub state: Arc<AppState>,
    /// Password sign-in. Hosted only.
    pub auth: Option<Arc<dyn PasswordAuth>>,
    /// Direct access to the local store, for seeding and ingestion.
    pub local: Option<LocalBackend>,
}

impl Client {
    pub async fn connect(config: &ClientConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        match config.target()? {
            BackendTarget::Hosted { url, anon_key } => {
                info!(url = %url, "using hosted backend");
                let rest = Arc::new(RestBackend::new(&url, &anon_key));
                let backend: Arc<dyn Backend> = rest.clone();
                let functions: Arc<dyn AdminFunctions> = rest.clone();
                let state = AppState::new(backend, config.session_ttl, notifier)
                    .with_functions(functions);
                Ok(Self {
                    state: Arc::new(state),
                    auth: Some(rest),
                    local: None,
                })
            }
            BackendTarget::Local { db, objects } => {
                info!(db = %db.display(), "using local store");
                if let Some(parent) = db.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| ClientError::Config(format!("{}: {e}", parent.display())))?;
                }
                let local = LocalBackend::open(&db, objects)
                    .await
                    .map_err(BackendError::from)?;
                if let Some(user) = config.local_user {
                    local.set_current_user(user, None).await;
                }
                let state = AppState::new(Arc::new(local.clone()), config.session_ttl, notifier);
                Ok(Self {
                    state: Arc::new(state),
                    auth: None,
                    local: Some(local),
                })
            }
        }
    }

    /// Sign in with the configured credentials when there are any.
    pub async fn sign_in_from_config(&self, config: &ClientConfig) -> Result<Option<Session>> {
        let (Some(auth), Some(email), Some(password)) =
            (&self.auth, &config.email, &config.password)
        else {
            return Ok(None);
        };
        auth::sign_in(&self.state, auth.as_ref(), email, password)
            .await
            .map(Some)
    }

    pub fn password_auth(&self) -> Result<&dyn PasswordAuth> {
        self.auth
            .as_deref()
            .ok_or_else(|| ClientError::Config("password sign-in needs the hosted backend".into()))
    }

    pub fn local(&self) -> Result<&LocalBackend> {
        self.local
            .as_ref()
            .ok_or_else(|| ClientError::Config("this command needs ENLEVE_LOCAL_DB".into()))
    }
}
