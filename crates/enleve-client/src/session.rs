//! Current-session provider.
//!
//! Screens ask one [`SessionProvider`] who is signed in and which roles they
//! hold instead of repeating the lookups on every mount. A resolved session
//! is reused for a short TTL and dropped explicitly on sign-out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use enleve_shared::backend::Backend;
use enleve_shared::models::AuthUser;
use enleve_shared::types::{Role, UserId};

use crate::error::{ClientError, Result};

pub const MSG_ACCESS_DENIED: &str =
    "Acesso negado. Apenas administradores podem acessar esta página.";

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: AuthUser,
    pub roles: Vec<Role>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
    Board,
    Profile,
    AdminUsers,
}

impl Route {
    pub fn requires_session(self) -> bool {
        self != Self::Login
    }

    pub fn required_role(self) -> Option<Role> {
        match self {
            Self::AdminUsers => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Outcome of a route guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Allow(Session),
    /// Route needs no session.
    Public,
    RedirectToLogin,
    Deny(String),
}

#[derive(Debug, Clone)]
struct CachedSession {
    session: Session,
    resolved_at: Instant,
}

impl CachedSession {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.resolved_at.elapsed() < ttl
    }
}

pub struct SessionProvider {
    backend: Arc<dyn Backend>,
    ttl: Duration,
    cache: RwLock<Option<CachedSession>>,
}

impl SessionProvider {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// The signed-in session, `None` without one. Absence is never cached.
    pub async fn current(&self) -> Result<Option<Session>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.is_fresh(self.ttl) {
                return Ok(Some(cached.session.clone()));
            }
        }

        let Some(user) = self.backend.current_user().await? else {
            *self.cache.write().await = None;
            return Ok(None);
        };
        let roles = self.backend.roles_of(user.id).await?;
        let session = Session { user, roles };
        debug!(user = %session.user_id(), roles = ?session.roles, "session resolved");

        *self.cache.write().await = Some(CachedSession {
            session: session.clone(),
            resolved_at: Instant::now(),
        });
        Ok(Some(session))
    }

    pub async fn require_user(&self) -> Result<Session> {
        self.current().await?.ok_or(ClientError::Unauthenticated)
    }

    pub async fn require_role(&self, role: Role) -> Result<Session> {
        let session = self.require_user().await?;
        if !session.has_role(role) {
            return Err(ClientError::Forbidden(match role {
                Role::Admin => MSG_ACCESS_DENIED.to_string(),
                other => format!("Acesso restrito ao perfil {}", other.label()),
            }));
        }
        Ok(session)
    }

    pub async fn guard(&self, route: Route) -> Result<Access> {
        if !route.requires_session() {
            return Ok(Access::Public);
        }
        let Some(session) = self.current().await? else {
            return Ok(Access::RedirectToLogin);
        };
        match route.required_role() {
            Some(role) if !session.has_role(role) => {
                info!(user = %session.user_id(), ?route, "route denied");
                Ok(Access::Deny(MSG_ACCESS_DENIED.to_string()))
            }
            _ => Ok(Access::Allow(session)),
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn sign_out(&self) -> Result<()> {
        let result = self.backend.sign_out().await;
        self.invalidate().await;
        result?;
        info!("signed out");
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}
