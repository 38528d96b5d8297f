//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub operator: OperatorConfig,
    pub schedule: ScheduleConfig,
    pub http: HttpConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "parrot.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://parrot.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// The single operator actor people mention to request new feeds
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Local handle (default: "birb")
    #[serde(default = "default_operator_handle")]
    pub handle: String,
    pub display_name: String,
    /// Profile text (HTML allowed)
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub manually_approves_followers: bool,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub header_image_url: String,
}

fn default_operator_handle() -> String {
    "birb".to_string()
}

/// Feed re-check intervals, keyed by how long a feed has been idle
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Base interval when the last post is less than a day old
    pub day_hours: f64,
    /// Less than a week old
    pub week_hours: f64,
    /// Less than four weeks old
    pub weeks4_hours: f64,
    /// Four weeks or older
    pub older_hours: f64,
    /// Scheduler sleep when no feed is due
    pub idle_wake_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day_hours: 1.0,
            week_hours: 3.0,
            weeks4_hours: 6.0,
            older_hours: 12.0,
            idle_wake_seconds: 60,
        }
    }
}

/// Outbound HTTP behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to feed fetches, actor fetches and deliveries
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// How long fetched actor documents are reused
    pub actor_cache_ttl_seconds: u64,
    /// Let actor fetches reach loopback and private addresses
    #[serde(default)]
    pub allow_private_hosts: bool,
}

/// Which feeds may be bridged
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    /// Hosts (and their subdomains) that are never bridged
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Lowercase generator tokens of platforms that already federate
    #[serde(default = "default_native_generators")]
    pub native_generators: Vec<String>,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            blocked_domains: Vec::new(),
            native_generators: default_native_generators(),
        }
    }
}

fn default_native_generators() -> Vec<String> {
    vec!["mastodon".to_string()]
}

/// Feed administration endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bearer token accepted by `POST /api/feeds`
    pub api_token: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }

    /// Default filter when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim().to_ascii_lowercase();
        format!("rustparrot={level},tower_http={level}")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RUSTPARROT__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/rustparrot.db")?
            .set_default("operator.handle", "birb")?
            .set_default("operator.display_name", "Parrot")?
            .set_default("schedule.day_hours", 1.0)?
            .set_default("schedule.week_hours", 3.0)?
            .set_default("schedule.weeks4_hours", 6.0)?
            .set_default("schedule.older_hours", 12.0)?
            .set_default("schedule.idle_wake_seconds", 60)?
            .set_default("http.timeout_seconds", 30)?
            .set_default("http.user_agent", "RustParrot/0.1.0")?
            .set_default("http.actor_cache_ttl_seconds", 3600)?
            .set_default("http.allow_private_hosts", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RUSTPARROT__*)
            .add_source(
                Environment::with_prefix("RUSTPARROT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;
        const MIN_API_TOKEN_BYTES: usize = 16;

        if self.admin.api_token.as_bytes().len() < MIN_API_TOKEN_BYTES {
            return Err(AppError::Config(format!(
                "admin.api_token must be at least {} bytes",
                MIN_API_TOKEN_BYTES
            )));
        }

        if !crate::federation::ids::is_valid_handle(&self.operator.handle) {
            return Err(AppError::Config(format!(
                "operator.handle is not a valid handle: {:?}",
                self.operator.handle
            )));
        }

        let bands = [
            self.schedule.day_hours,
            self.schedule.week_hours,
            self.schedule.weeks4_hours,
            self.schedule.older_hours,
        ];
        if bands.iter().any(|hours| !hours.is_finite() || *hours <= 0.0) {
            return Err(AppError::Config(
                "schedule intervals must be positive".to_string(),
            ));
        }
        if bands.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(AppError::Config(
                "schedule intervals must not decrease with idle time".to_string(),
            ));
        }

        if self.http.timeout_seconds == 0 {
            return Err(AppError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.server.protocol.eq_ignore_ascii_case("https")
            && !is_local_server_domain(&self.server.domain)
        {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
