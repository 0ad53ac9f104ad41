// MIT License - Copyright (c) 2026 Peter Wright

use std::path::PathBuf;

/// Arm mode for alarm commands.
///
/// Each mode maps to the vendor's panel request code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Full/total arm ("ARM1")
    Away,
    /// Perimeter-only arm ("PERI1")
    Home,
    /// Internal night arm ("ARMNIGHT1")
    Night,
}

impl ArmMode {
    /// The vendor request code sent in xSArmPanel.
    pub fn request_code(&self) -> &'static str {
        match self {
            Self::Away => "ARM1",
            Self::Home => "PERI1",
            Self::Night => "ARMNIGHT1",
        }
    }
}

/// Configuration for connecting to the My Verisure cloud.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account user id (DNI/NIE)
    pub user: String,
    /// Account password
    pub password: String,
    /// Country code sent with login requests (default: ES)
    pub country: String,
    /// Language code sent with login requests (default: es)
    pub lang: String,
    /// GraphQL endpoint URL
    pub graphql_url: String,
    /// Client identifier sent in the `callby` field (native app simulation)
    pub callby: String,
    /// Native app version reported in headers and device identifiers
    pub app_version: String,
    /// Directory holding the session and device identifier files
    pub storage_dir: PathBuf,
    /// Maximum session age before re-login is required, in seconds
    pub session_max_age_secs: i64,
    /// Per-request HTTP timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum polls of xSArmStatus/xSDisarmStatus while the vendor reports WAIT
    pub command_poll_retries: u32,
    /// Delay between command status polls in milliseconds
    pub command_poll_delay_ms: u64,
    /// Maximum polls of xSCheckAlarmStatus while the vendor reports WAIT
    pub alarm_check_retries: u32,
    /// Delay between alarm status polls in milliseconds
    pub alarm_check_delay_ms: u64,
    /// Installation services cache TTL in seconds
    pub cache_ttl_secs: u64,
}

/// Production GraphQL endpoint.
pub const VERISURE_GRAPHQL_URL: &str = "https://customers.securitasdirect.es/owa-api/graphql";

impl Default for ClientConfig {
    fn default() -> Self {
        let storage_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".verisure-bridge");
        Self {
            user: String::new(),
            password: String::new(),
            country: "ES".to_string(),
            lang: "es".to_string(),
            graphql_url: VERISURE_GRAPHQL_URL.to_string(),
            callby: "OWI_10".to_string(),
            app_version: "10.154.0".to_string(),
            storage_dir,
            session_max_age_secs: 360,
            request_timeout_ms: 30000,
            command_poll_retries: 30,
            command_poll_delay_ms: 5000,
            alarm_check_retries: 10,
            alarm_check_delay_ms: 5000,
            cache_ttl_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Path of the persisted session file for this account.
    pub fn session_file(&self) -> PathBuf {
        self.storage_dir.join(format!("session_{}.json", self.user))
    }

    /// Path of the persisted device identifiers file for this account.
    pub fn device_file(&self) -> PathBuf {
        self.storage_dir.join(format!("device_{}.json", self.user))
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.config.country = country.into();
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.config.lang = lang.into();
        self
    }

    pub fn graphql_url(mut self, url: impl Into<String>) -> Self {
        self.config.graphql_url = url.into();
        self
    }

    pub fn callby(mut self, callby: impl Into<String>) -> Self {
        self.config.callby = callby.into();
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.config.app_version = version.into();
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn session_max_age_secs(mut self, secs: i64) -> Self {
        self.config.session_max_age_secs = secs;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn command_poll_retries(mut self, retries: u32) -> Self {
        self.config.command_poll_retries = retries;
        self
    }

    pub fn command_poll_delay_ms(mut self, ms: u64) -> Self {
        self.config.command_poll_delay_ms = ms;
        self
    }

    pub fn alarm_check_retries(mut self, retries: u32) -> Self {
        self.config.alarm_check_retries = retries;
        self
    }

    pub fn alarm_check_delay_ms(mut self, ms: u64) -> Self {
        self.config.alarm_check_delay_ms = ms;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_mode_request_codes() {
        assert_eq!(ArmMode::Away.request_code(), "ARM1");
        assert_eq!(ArmMode::Home.request_code(), "PERI1");
        assert_eq!(ArmMode::Night.request_code(), "ARMNIGHT1");
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder()
            .user("12345678A")
            .password("secret")
            .lang("en")
            .cache_ttl_secs(60)
            .build();

        assert_eq!(config.user, "12345678A");
        assert_eq!(config.password, "secret");
        assert_eq!(config.lang, "en");
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.country, "ES");
    }

    #[test]
    fn test_session_file_keyed_by_user() {
        let config = ClientConfig::builder()
            .user("12345678A")
            .storage_dir("/tmp/vs")
            .build();
        assert_eq!(
            config.session_file(),
            PathBuf::from("/tmp/vs/session_12345678A.json")
        );
        assert_eq!(
            config.device_file(),
            PathBuf::from("/tmp/vs/device_12345678A.json")
        );
    }

    #[test]
    fn test_default_poll_settings() {
        let config = ClientConfig::builder().build();
        assert_eq!(config.command_poll_retries, 30);
        assert_eq!(config.alarm_check_retries, 10);
        assert_eq!(config.session_max_age_secs, 360);
    }
}
