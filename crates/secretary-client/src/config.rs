// ABOUTME: Configuration loading and validation for the chat client.
// ABOUTME: TOML file with environment variable expansion, plus defaults when no file exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::SessionError;
use crate::session::{SessionConfig, DEFAULT_EVENT_LOG_LIMIT};
use crate::transport::stream_url;

const DEFAULT_GATEWAY_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_STREAM_PATH: &str = "/chat/stream";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Where the agent service lives and who we are to it
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Base HTTP(S) URL of the agent API (e.g. "http://localhost:8000/api/v1")
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Stream route relative to `url`
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Fixed session id; a fresh one is generated per client when unset
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            stream_path: default_stream_path(),
            tenant_id: None,
            session_id: None,
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_stream_path() -> String {
    DEFAULT_STREAM_PATH.to_string()
}

/// Session timing and retention
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_event_log_limit")]
    pub event_log_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stall_timeout_secs: default_stall_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            event_log_limit: default_event_log_limit(),
        }
    }
}

fn default_stall_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_event_log_limit() -> usize {
    DEFAULT_EVENT_LOG_LIMIT
}

impl ClientConfig {
    /// Default location: `~/.config/ai-secretary/chat.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ai-secretary").join("chat.toml"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields the built-in
    /// defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self, SessionError> {
        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, SessionError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;
        Self::parse(&contents)
    }

    /// Parse TOML, expanding `${VAR}` references first.
    pub fn parse(contents: &str) -> Result<Self, SessionError> {
        // Expand environment variables, warning on undefined vars.
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        toml::from_str(&contents)
            .map_err(|e| SessionError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate that required fields are present and properly formatted.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.gateway.url.trim().is_empty() {
            return Err(SessionError::Config("gateway.url is required".into()));
        }
        Url::parse(self.gateway.url.trim()).map_err(|e| {
            SessionError::Config(format!("gateway.url is not a valid URL: {}", e))
        })?;
        if self.gateway.stream_path.trim().is_empty() {
            return Err(SessionError::Config("gateway.stream_path is required".into()));
        }
        if self.session.stall_timeout_secs == 0 {
            return Err(SessionError::Config(
                "session.stall_timeout_secs must be positive".into(),
            ));
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(SessionError::Config(
                "session.connect_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Override the gateway URL (from a CLI flag or env var).
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway.url = url.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.gateway.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.gateway.session_id = Some(session_id.into());
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.session.stall_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.session.connect_timeout_secs)
    }

    /// Settings for the session state machine.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            stall_timeout: self.stall_timeout(),
            event_log_limit: self.session.event_log_limit,
            tenant_id: self
                .gateway
                .tenant_id
                .clone()
                .filter(|t| !t.trim().is_empty()),
        }
    }

    /// Stream endpoint for `session_id`.
    pub fn stream_url(&self, session_id: &str) -> Result<Url, SessionError> {
        stream_url(&self.gateway.url, &self.gateway.stream_path, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.gateway.url, "http://localhost:8000/api/v1");
        assert_eq!(config.gateway.stream_path, "/chat/stream");
        assert_eq!(config.stall_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.event_log_limit, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = ClientConfig::parse(
            r#"
[gateway]
url = "https://agents.internal/api/v1"
tenant_id = "acme"

[session]
stall_timeout_secs = 5
"#,
        )
        .unwrap();

        assert_eq!(config.gateway.url, "https://agents.internal/api/v1");
        assert_eq!(config.gateway.stream_path, "/chat/stream");
        assert_eq!(config.session.stall_timeout_secs, 5);
        assert_eq!(config.session.connect_timeout_secs, 10);

        let session = config.session_config();
        assert_eq!(session.tenant_id.as_deref(), Some("acme"));
        assert_eq!(session.stall_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_expands_env() {
        std::env::set_var("SECRETARY_TEST_GATEWAY_HOST", "gw.example.com");
        let config = ClientConfig::parse(
            r#"
[gateway]
url = "http://${SECRETARY_TEST_GATEWAY_HOST}:8000"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.url, "http://gw.example.com:8000");
    }

    #[test]
    fn test_parse_undefined_env_becomes_empty() {
        let config = ClientConfig::parse(
            r#"
[gateway]
url = "http://localhost"
tenant_id = "${SECRETARY_TEST_SURELY_UNDEFINED_VAR}"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.tenant_id.as_deref(), Some(""));
        assert!(config.session_config().tenant_id.is_none());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = ClientConfig::parse("[gateway\nurl = 1").unwrap_err();
        assert!(matches!(err, SessionError::Config(msg) if msg.contains("parse")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ClientConfig::default().with_gateway_url("");
        assert!(config.validate().is_err());

        let config = ClientConfig::default().with_gateway_url("no scheme here");
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.session.stall_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\nurl = \"http://127.0.0.1:9000\"\nsession_id = \"fixed\""
        )
        .unwrap();

        let config = ClientConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.gateway.url, "http://127.0.0.1:9000");
        assert_eq!(config.gateway.session_id.as_deref(), Some("fixed"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_stream_url_from_config() {
        let config = ClientConfig::default().with_gateway_url("http://localhost:8000/api/v1");
        let url = config.stream_url("abc").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/v1/chat/stream?session_id=abc"
        );
    }
}
