//! Strongly-typed configuration for the portal extraction flow.
//!
//! Everything brittle about the external portal lives here as data: the
//! login and landing URLs, the internal usage endpoint, the DOM selectors
//! for the credential fields, and the timing knobs. The portal offers no
//! stability contract for any of these; a markup change on their side
//! breaks the selectors, and that fragility is inherent to the domain.
//! Values can be constructed from defaults or loaded from environment
//! variables (with optional `.env` support).

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Login form URL.
pub const DEFAULT_LOGIN_URL: &str = "https://login.xfinity.com/login";

/// Authenticated landing page; reaching it primes the session cookies the
/// usage endpoint requires.
pub const DEFAULT_LANDING_URL: &str = "https://customer.xfinity.com/#/devices#usage";

/// Internal API the portal's own front-end fetches the usage document from.
pub const DEFAULT_USAGE_ENDPOINT: &str =
    "https://customer.xfinity.com/apis/csp/account/me/services/internet/usage?filter=internet";

/// Fixed outbound identification; an ordinary desktop Chrome string keeps
/// the portal's bot heuristics quiet.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/44.0.2403.157 Safari/537.36";

/// Configuration values for one extraction flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub landing_url: String,
    pub usage_endpoint: String,

    /// DOM selector of the identity (email) input on the login form.
    pub identity_selector: String,
    /// DOM selector of the secret (password) input.
    pub secret_selector: String,
    /// DOM selector of the submit control; the form reuses one id for both
    /// challenge steps.
    pub submit_selector: String,

    pub user_agent: String,
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,

    /// Fixed settling delay where no element gives a readiness signal.
    pub settle_delay_ms: u64,
    /// Hard cap on the post-submit network-quiet wait.
    pub settle_timeout_ms: u64,
    /// Bound on polling for a required form element.
    pub element_timeout_ms: u64,
    /// Interval between element presence probes.
    pub element_poll_ms: u64,
    /// How long to probe for the optional re-auth challenge.
    pub reauth_probe_ms: u64,
    /// Grace window for the final response after the drive sequence ends.
    pub capture_grace_ms: u64,
    /// Upper bound on one whole extraction attempt.
    pub overall_deadline_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            landing_url: DEFAULT_LANDING_URL.to_string(),
            usage_endpoint: DEFAULT_USAGE_ENDPOINT.to_string(),
            identity_selector: "#user".to_string(),
            secret_selector: "#passwd".to_string(),
            submit_selector: "#sign_in".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_executable: None,
            headless: true,
            settle_delay_ms: 5_000,
            settle_timeout_ms: 30_000,
            element_timeout_ms: 15_000,
            element_poll_ms: 250,
            reauth_probe_ms: 5_000,
            capture_grace_ms: 3_000,
            overall_deadline_ms: 120_000,
        }
    }
}

impl PortalConfig {
    /// Construct a configuration by reading relevant environment variables,
    /// after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, PortalConfigError> {
        let _ = dotenv();
        let mut config = PortalConfig::default();

        if let Some(value) = env_var("XFIN_LOGIN_URL") {
            config.login_url = value;
        }
        if let Some(value) = env_var("XFIN_LANDING_URL") {
            config.landing_url = value;
        }
        if let Some(value) = env_var("XFIN_USAGE_ENDPOINT") {
            config.usage_endpoint = value;
        }
        if let Some(value) = env_var("XFIN_IDENTITY_SELECTOR") {
            config.identity_selector = value;
        }
        if let Some(value) = env_var("XFIN_SECRET_SELECTOR") {
            config.secret_selector = value;
        }
        if let Some(value) = env_var("XFIN_SUBMIT_SELECTOR") {
            config.submit_selector = value;
        }
        if let Some(value) = env_var("XFIN_USER_AGENT") {
            config.user_agent = value;
        }
        if let Some(value) = env_var("XFIN_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("XFIN_HEADLESS") {
            config.headless = parse_bool("XFIN_HEADLESS", &value)?;
        }
        if let Some(value) = env_var("XFIN_SETTLE_DELAY_MS") {
            config.settle_delay_ms = parse_u64("XFIN_SETTLE_DELAY_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_SETTLE_TIMEOUT_MS") {
            config.settle_timeout_ms = parse_u64("XFIN_SETTLE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_ELEMENT_TIMEOUT_MS") {
            config.element_timeout_ms = parse_u64("XFIN_ELEMENT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_ELEMENT_POLL_MS") {
            config.element_poll_ms = parse_u64("XFIN_ELEMENT_POLL_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_REAUTH_PROBE_MS") {
            config.reauth_probe_ms = parse_u64("XFIN_REAUTH_PROBE_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_CAPTURE_GRACE_MS") {
            config.capture_grace_ms = parse_u64("XFIN_CAPTURE_GRACE_MS", &value)?;
        }
        if let Some(value) = env_var("XFIN_OVERALL_DEADLINE_MS") {
            config.overall_deadline_ms = parse_u64("XFIN_OVERALL_DEADLINE_MS", &value)?;
        }

        Ok(config)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn element_poll_interval(&self) -> Duration {
        Duration::from_millis(self.element_poll_ms)
    }

    pub fn reauth_probe(&self) -> Duration {
        Duration::from_millis(self.reauth_probe_ms)
    }

    pub fn capture_grace(&self) -> Duration {
        Duration::from_millis(self.capture_grace_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}

/// Errors that can arise while constructing a [`PortalConfig`].
#[derive(Debug, Error)]
pub enum PortalConfigError {
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, PortalConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PortalConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, PortalConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| PortalConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => env::set_var(key, v),
                        None => env::remove_var(key),
                    }
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(&key, v),
                    None => env::remove_var(&key),
                }
            }
        }
    }

    fn with_env<F, T>(vars: &[(&str, Option<&str>)], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = env_lock().lock().expect("env mutex poisoned");
        let guard = EnvGuard::new(vars);
        let result = f();
        drop(guard);
        drop(lock);
        result
    }

    #[test]
    fn defaults_match_the_portal_constants() {
        let config = PortalConfig::default();
        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.landing_url, DEFAULT_LANDING_URL);
        assert_eq!(config.usage_endpoint, DEFAULT_USAGE_ENDPOINT);
        assert_eq!(config.identity_selector, "#user");
        assert_eq!(config.secret_selector, "#passwd");
        assert_eq!(config.submit_selector, "#sign_in");
        assert!(config.headless);
        assert!(config.chrome_executable.is_none());
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.overall_deadline(), Duration::from_secs(120));
    }

    #[test]
    fn from_env_parses_and_normalises_values() {
        let vars = [
            ("XFIN_LOGIN_URL", Some("https://login.example/login")),
            ("XFIN_LANDING_URL", Some("https://portal.example/home")),
            ("XFIN_USAGE_ENDPOINT", Some("https://portal.example/api/usage")),
            ("XFIN_IDENTITY_SELECTOR", Some("#email")),
            ("XFIN_SECRET_SELECTOR", Some("#pw")),
            ("XFIN_SUBMIT_SELECTOR", Some("#go")),
            ("XFIN_USER_AGENT", Some("TestAgent/1.0")),
            ("XFIN_CHROME_BIN", Some("/usr/bin/chromium")),
            ("XFIN_HEADLESS", Some("false")),
            ("XFIN_SETTLE_DELAY_MS", Some("100")),
            ("XFIN_SETTLE_TIMEOUT_MS", Some("2000")),
            ("XFIN_ELEMENT_TIMEOUT_MS", Some("500")),
            ("XFIN_ELEMENT_POLL_MS", Some("50")),
            ("XFIN_REAUTH_PROBE_MS", Some("200")),
            ("XFIN_CAPTURE_GRACE_MS", Some("300")),
            ("XFIN_OVERALL_DEADLINE_MS", Some("9000")),
        ];

        with_env(&vars, || {
            let config = PortalConfig::from_env().expect("config from env");
            assert_eq!(config.login_url, "https://login.example/login");
            assert_eq!(config.landing_url, "https://portal.example/home");
            assert_eq!(config.usage_endpoint, "https://portal.example/api/usage");
            assert_eq!(config.identity_selector, "#email");
            assert_eq!(config.secret_selector, "#pw");
            assert_eq!(config.submit_selector, "#go");
            assert_eq!(config.user_agent, "TestAgent/1.0");
            assert_eq!(
                config.chrome_executable.as_deref(),
                Some(std::path::Path::new("/usr/bin/chromium"))
            );
            assert!(!config.headless);
            assert_eq!(config.settle_delay(), Duration::from_millis(100));
            assert_eq!(config.settle_timeout(), Duration::from_millis(2_000));
            assert_eq!(config.element_timeout(), Duration::from_millis(500));
            assert_eq!(config.element_poll_interval(), Duration::from_millis(50));
            assert_eq!(config.reauth_probe(), Duration::from_millis(200));
            assert_eq!(config.capture_grace(), Duration::from_millis(300));
            assert_eq!(config.overall_deadline(), Duration::from_millis(9_000));
        });
    }

    #[test]
    fn from_env_rejects_malformed_values() {
        with_env(&[("XFIN_HEADLESS", Some("maybe"))], || {
            let err = PortalConfig::from_env().expect_err("invalid bool");
            assert!(matches!(err, PortalConfigError::InvalidBool { field, .. } if field == "XFIN_HEADLESS"));
        });

        with_env(&[("XFIN_SETTLE_DELAY_MS", Some("soon"))], || {
            let err = PortalConfig::from_env().expect_err("invalid number");
            assert!(matches!(err, PortalConfigError::InvalidNumber { field, .. } if field == "XFIN_SETTLE_DELAY_MS"));
        });
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        with_env(&[("XFIN_LOGIN_URL", Some("   "))], || {
            let config = PortalConfig::from_env().expect("config from env");
            assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        });
    }
}
