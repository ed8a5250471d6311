//! # enleve-server
//!
//! The `invite-user` function of ENLEVE CRM.
//!
//! This binary provides:
//! - **Invitations**: an authenticated admin invites a new user by email with
//!   a role; the backend creates the account and a courtesy email is sent
//!   through Resend when a key is configured
//! - **CORS** for browser callers
//! - **Per-IP rate limiting**

mod api;
mod config;
mod error;
mod gateway;
mod invite;
mod mailer;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::FunctionConfig;
use crate::gateway::SupabaseGateway;
use crate::mailer::{Mailer, ResendMailer};
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,enleve_server=debug")),
        )
        .init();

    info!("Starting invite-user function v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = FunctionConfig::from_env();
    let missing = config.missing();
    if !missing.is_empty() {
        anyhow::bail!("missing required environment: {}", missing.join(", "));
    }
    info!(
        backend = %config.backend_url,
        redirect = %config.redirect_url,
        mail_enabled = config.resend_api_key.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let gateway = Arc::new(SupabaseGateway::new(&config));
    let mailer = ResendMailer::from_config(&config).map(|m| Arc::new(m) as Arc<dyn Mailer>);
    if mailer.is_none() {
        warn!("RESEND_API_KEY not set, invitation emails are disabled");
    }
    let rate_limiter = RateLimiter::from_config(&config);

    let http_addr = config.http_addr;
    let app_state = AppState {
        gateway,
        mailer,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config),
    };

    // Every 5 minutes, forget clients idle for 10.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_idle(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
