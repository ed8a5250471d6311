//! Function configuration loaded from environment variables.
//!
//! Only the backend URL and keys are required; everything else has a
//! default suitable for local development.

use std::net::SocketAddr;

pub const DEFAULT_MAIL_FROM: &str = "ENLEVE CRM <onboarding@resend.dev>";
pub const DEFAULT_RESEND_URL: &str = "https://api.resend.com";

#[derive(Debug, Clone)]
pub struct FunctionConfig {
    /// Socket address for the HTTP server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Env: `SUPABASE_URL`
    pub backend_url: String,

    /// Key used to act as the caller.
    /// Env: `SUPABASE_ANON_KEY`
    pub anon_key: String,

    /// Key used to create invitations.
    /// Env: `SUPABASE_SERVICE_ROLE_KEY`
    pub service_role_key: String,

    /// Env: `RESEND_API_KEY`. Without it no email is attempted.
    pub resend_api_key: Option<String>,

    /// Env: `RESEND_URL`
    pub resend_url: String,

    /// Where the invitation link lands.
    /// Env: `INVITE_REDIRECT_URL`
    /// Default: `<SUPABASE_URL>/auth`
    pub redirect_url: String,

    /// Env: `MAIL_FROM`
    pub mail_from: String,

    /// Sustained requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            backend_url: String::new(),
            anon_key: String::new(),
            service_role_key: String::new(),
            resend_api_key: None,
            resend_url: DEFAULT_RESEND_URL.to_string(),
            redirect_url: String::new(),
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            rate_limit_per_sec: 2.0,
            rate_limit_burst: 10.0,
        }
    }
}

impl FunctionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(url) = get("SUPABASE_URL") {
            config.backend_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key) = get("SUPABASE_ANON_KEY") {
            config.anon_key = key;
        }
        if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
            config.service_role_key = key;
        }
        config.resend_api_key = get("RESEND_API_KEY");
        if let Some(url) = get("RESEND_URL") {
            config.resend_url = url.trim_end_matches('/').to_string();
        }

        config.redirect_url =
            get("INVITE_REDIRECT_URL").unwrap_or_else(|| format!("{}/auth", config.backend_url));
        if let Some(from) = get("MAIL_FROM") {
            config.mail_from = from;
        }

        for (key, slot) in [
            ("RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec),
            ("RATE_LIMIT_BURST", &mut config.rate_limit_burst),
        ] {
            if let Some(raw) = get(key) {
                match raw.parse::<f64>() {
                    Ok(v) if v > 0.0 => *slot = v,
                    _ => tracing::warn!(key, value = %raw, "Invalid rate limit, using default"),
                }
            }
        }

        config
    }

    /// Names of required settings that are missing.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.backend_url.is_empty() {
            missing.push("SUPABASE_URL");
        }
        if self.anon_key.is_empty() {
            missing.push("SUPABASE_ANON_KEY");
        }
        if self.service_role_key.is_empty() {
            missing.push("SUPABASE_SERVICE_ROLE_KEY");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> FunctionConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FunctionConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_and_missing_keys() {
        let config = config(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.mail_from, DEFAULT_MAIL_FROM);
        assert!(config.resend_api_key.is_none());
        assert_eq!(
            config.missing(),
            ["SUPABASE_URL", "SUPABASE_ANON_KEY", "SUPABASE_SERVICE_ROLE_KEY"]
        );
    }

    #[test]
    fn redirect_defaults_to_auth_page() {
        let config = config(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]);
        assert_eq!(config.redirect_url, "https://abc.supabase.co/auth");
        assert!(config.missing().is_empty());
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = config(&[
            ("HTTP_ADDR", "not an address"),
            ("RATE_LIMIT_PER_SEC", "-1"),
            ("RATE_LIMIT_BURST", "many"),
            ("RESEND_API_KEY", "  "),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.rate_limit_per_sec, 2.0);
        assert_eq!(config.rate_limit_burst, 10.0);
        assert!(config.resend_api_key.is_none());
    }
}
