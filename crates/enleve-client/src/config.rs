//! Client configuration loaded from environment variables.
//!
//! Either a hosted backend (`ENLEVE_URL` + `ENLEVE_ANON_KEY`) or a local
//! SQLite backend (`ENLEVE_LOCAL_DB`) must be configured. When both are set
//! the local backend wins.

use std::path::PathBuf;
use std::time::Duration;

use enleve_shared::types::UserId;

use crate::error::{ClientError, Result};

/// Default lifetime of a cached session lookup.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hosted backend.
    /// Env: `ENLEVE_URL`
    pub url: Option<String>,

    /// Public (anon) API key sent as `apikey` on every request.
    /// Env: `ENLEVE_ANON_KEY`
    pub anon_key: Option<String>,

    /// Credentials for password sign-in.
    /// Env: `ENLEVE_EMAIL`, `ENLEVE_PASSWORD`
    pub email: Option<String>,
    pub password: Option<String>,

    /// How long a resolved session and its roles are reused.
    /// Env: `ENLEVE_SESSION_TTL_SECS`
    /// Default: 30 seconds
    pub session_ttl: Duration,

    /// SQLite file of the local backend.
    /// Env: `ENLEVE_LOCAL_DB`
    pub local_db: Option<PathBuf>,

    /// Object directory of the local backend.
    /// Env: `ENLEVE_LOCAL_OBJECTS`
    /// Default: `objects/` next to the database
    pub local_objects: Option<PathBuf>,

    /// User the local backend acts as.
    /// Env: `ENLEVE_LOCAL_USER`
    pub local_user: Option<UserId>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            email: None,
            password: None,
            session_ttl: DEFAULT_SESSION_TTL,
            local_db: None,
            local_objects: None,
            local_user: None,
        }
    }
}

/// Which backend a configuration points at.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendTarget {
    Hosted { url: String, anon_key: String },
    Local { db: PathBuf, objects: PathBuf },
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.url = get("ENLEVE_URL").map(|u| u.trim_end_matches('/').to_string());
        config.anon_key = get("ENLEVE_ANON_KEY");
        config.email = get("ENLEVE_EMAIL");
        config.password = get("ENLEVE_PASSWORD");

        if let Some(raw) = get("ENLEVE_SESSION_TTL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => config.session_ttl = Duration::from_secs(secs),
                Err(_) => tracing::warn!(
                    value = %raw,
                    "Invalid ENLEVE_SESSION_TTL_SECS, using default"
                ),
            }
        }

        config.local_db = get("ENLEVE_LOCAL_DB").map(PathBuf::from);
        config.local_objects = get("ENLEVE_LOCAL_OBJECTS").map(PathBuf::from);

        if let Some(raw) = get("ENLEVE_LOCAL_USER") {
            match UserId::parse(raw.trim()) {
                Ok(id) => config.local_user = Some(id),
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid ENLEVE_LOCAL_USER, ignoring"),
            }
        }

        config
    }

    pub fn target(&self) -> Result<BackendTarget> {
        if let Some(ref db) = self.local_db {
            let objects = self.local_objects.clone().unwrap_or_else(|| {
                db.parent()
                    .map(|p| p.join("objects"))
                    .unwrap_or_else(|| PathBuf::from("objects"))
            });
            return Ok(BackendTarget::Local {
                db: db.clone(),
                objects,
            });
        }
        match (&self.url, &self.anon_key) {
            (Some(url), Some(key)) => Ok(BackendTarget::Hosted {
                url: url.clone(),
                anon_key: key.clone(),
            }),
            (Some(_), None) => Err(ClientError::Config("ENLEVE_ANON_KEY is not set".into())),
            _ => Err(ClientError::Config(
                "set ENLEVE_URL and ENLEVE_ANON_KEY, or ENLEVE_LOCAL_DB".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ClientConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.session_ttl, DEFAULT_SESSION_TTL);
        assert!(c.target().is_err());
    }

    #[test]
    fn hosted_target() {
        let c = config(&[
            ("ENLEVE_URL", "https://abc.supabase.co/"),
            ("ENLEVE_ANON_KEY", "anon"),
            ("ENLEVE_SESSION_TTL_SECS", "5"),
        ]);
        assert_eq!(c.session_ttl, Duration::from_secs(5));
        assert_eq!(
            c.target().unwrap(),
            BackendTarget::Hosted {
                url: "https://abc.supabase.co".into(),
                anon_key: "anon".into()
            }
        );
    }

    #[test]
    fn missing_key_is_reported() {
        let c = config(&[("ENLEVE_URL", "https://abc.supabase.co")]);
        assert!(matches!(c.target(), Err(ClientError::Config(_))));
    }

    #[test]
    fn local_target_wins_and_defaults_objects_dir() {
        let c = config(&[
            ("ENLEVE_URL", "https://abc.supabase.co"),
            ("ENLEVE_ANON_KEY", "anon"),
            ("ENLEVE_LOCAL_DB", "/tmp/enleve/crm.db"),
        ]);
        assert_eq!(
            c.target().unwrap(),
            BackendTarget::Local {
                db: PathBuf::from("/tmp/enleve/crm.db"),
                objects: PathBuf::from("/tmp/enleve/objects"),
            }
        );
    }

    #[test]
    fn bad_values_keep_defaults() {
        let c = config(&[
            ("ENLEVE_SESSION_TTL_SECS", "soon"),
            ("ENLEVE_LOCAL_USER", "not-a-uuid"),
        ]);
        assert_eq!(c.session_ttl, DEFAULT_SESSION_TTL);
        assert!(c.local_user.is_none());
    }
}
