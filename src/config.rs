use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::FarmgateError;
use crate::ratings::RemovalPolicy;
use crate::utils::{get_env_with_prefix, parse_env_with_prefix};

/// Main configuration for a farmgate service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ratings: RatingConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RatingConfig {
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    /// Farms registered for rating at startup
    #[serde(default)]
    pub farms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Lifetime of an anonymous voter session
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    /// Term granted to paid plans at creation
    #[serde(default = "default_paid_term_days")]
    pub paid_term_days: i64,
    #[serde(default = "default_billing_cycle_days")]
    pub billing_cycle_days: i64,
    /// Days after `end_date` before a trial is marked expired
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// How far ahead of `end_date` the trial-ending notice goes out
    #[serde(default = "default_trial_notice_days")]
    pub trial_notice_days: i64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Path prefixes the access gate never blocks
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            removal_policy: RemovalPolicy::default(),
            farms: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            paid_term_days: default_paid_term_days(),
            billing_cycle_days: default_billing_cycle_days(),
            grace_period_days: default_grace_period_days(),
            trial_notice_days: default_trial_notice_days(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_seconds() -> u64 {
    30 * 24 * 60 * 60
}

fn default_trial_days() -> i64 {
    30
}

fn default_paid_term_days() -> i64 {
    365
}

fn default_billing_cycle_days() -> i64 {
    30
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_trial_notice_days() -> i64 {
    3
}

fn default_sweep_interval_seconds() -> u64 {
    60 * 60
}

fn default_exempt_paths() -> Vec<String> {
    ["/api/auth/", "/api/subscriptions/", "/api/payments/", "/admin/"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.config.ratings.removal_policy = policy;
        self
    }

    pub fn with_session_ttl_seconds(mut self, ttl: u64) -> Self {
        self.config.sessions.ttl_seconds = ttl;
        self
    }

    pub fn with_trial_days(mut self, days: i64) -> Self {
        self.config.subscriptions.trial_days = days;
        self
    }

    pub fn with_grace_period_days(mut self, days: i64) -> Self {
        self.config.subscriptions.grace_period_days = days;
        self
    }

    pub fn with_billing_cycle_days(mut self, days: i64) -> Self {
        self.config.subscriptions.billing_cycle_days = days;
        self
    }

    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.subscriptions.sweep_interval_seconds = seconds;
        self
    }

    pub fn with_farms<I, S>(mut self, farms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ratings.farms = farms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.subscriptions.exempt_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Load configuration from environment variables with FARMGATE_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        // Unprefixed PORT is honoured for container platforms
        if let Some(port) = parse_env_with_prefix("PORT") {
            self.config.server.port = port;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        if let Some(policy) = get_env_with_prefix("RATING_REMOVAL_POLICY") {
            match RemovalPolicy::parse(&policy) {
                Some(policy) => self.config.ratings.removal_policy = policy,
                None => tracing::warn!(value = %policy, "Unknown rating removal policy, keeping default"),
            }
        }
        if let Some(farms) = get_env_with_prefix("FARMS") {
            self.config.ratings.farms = split_list(&farms);
        }
        if let Some(ttl) = parse_env_with_prefix("SESSION_TTL_SECONDS") {
            self.config.sessions.ttl_seconds = ttl;
        }

        let subs = &mut self.config.subscriptions;
        if let Some(days) = parse_env_with_prefix("TRIAL_DAYS") {
            subs.trial_days = days;
        }
        if let Some(days) = parse_env_with_prefix("TRIAL_GRACE_DAYS") {
            subs.grace_period_days = days;
        }
        if let Some(days) = parse_env_with_prefix("BILLING_CYCLE_DAYS") {
            subs.billing_cycle_days = days;
        }
        if let Some(days) = parse_env_with_prefix("TRIAL_NOTICE_DAYS") {
            subs.trial_notice_days = days;
        }
        if let Some(seconds) = parse_env_with_prefix("SWEEP_INTERVAL_SECONDS") {
            subs.sweep_interval_seconds = seconds;
        }
        if let Some(paths) = get_env_with_prefix("GATE_EXEMPT_PATHS") {
            subs.exempt_paths = split_list(&paths);
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unparseable server address, an
    /// unknown log level, a zero port, or out-of-range subscription periods.
    pub fn build(self) -> crate::error::Result<Config> {
        self.config.server.addr().map_err(|e| {
            FarmgateError::validation(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        if self.config.server.port == 0 {
            return Err(FarmgateError::validation("Server port must be greater than 0"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(FarmgateError::validation(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if let Some(bad) = self.config.ratings.farms.iter().find(|f| f.trim().is_empty() || f.len() > 128) {
            return Err(FarmgateError::validation(format!("Invalid farm id: '{}'", bad)));
        }

        if self.config.sessions.ttl_seconds == 0 {
            return Err(FarmgateError::validation("Session TTL must be greater than 0"));
        }

        let subs = &self.config.subscriptions;
        if subs.trial_days <= 0 || subs.paid_term_days <= 0 || subs.billing_cycle_days <= 0 {
            return Err(FarmgateError::validation(
                "Trial, paid term and billing cycle lengths must be positive",
            ));
        }
        if subs.grace_period_days < 0 {
            return Err(FarmgateError::validation("Grace period cannot be negative"));
        }
        if subs.trial_notice_days < 0 {
            return Err(FarmgateError::validation("Trial notice window cannot be negative"));
        }
        if subs.sweep_interval_seconds == 0 {
            return Err(FarmgateError::validation("Sweep interval must be greater than 0"));
        }
        if let Some(bad) = subs.exempt_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(FarmgateError::validation(format!(
                "Exempt path must start with '/': {}",
                bad
            )));
        }

        Ok(self.config)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
