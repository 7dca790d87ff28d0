//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Mail transport configuration.
    pub mailer: MailerConfig,
    /// Delivery pipeline configuration.
    pub delivery: DeliveryConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance (used for tracking links).
    pub url: String,
    /// Bearer token required on management endpoints.
    pub admin_token: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Mail transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    /// Which provider to use: "smtp" or "sendgrid".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// From address for outgoing mail.
    pub from_address: String,
    /// From display name for outgoing mail.
    pub from_name: String,
    /// SMTP settings (used when provider = "smtp").
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// SendGrid settings (used when provider = "sendgrid").
    #[serde(default)]
    pub sendgrid: Option<SendGridConfig>,
}

/// SMTP relay settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP host.
    pub host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Username for SMTP auth.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for SMTP auth.
    #[serde(default)]
    pub password: Option<String>,
}

/// SendGrid API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    /// SendGrid API key.
    pub api_key: String,
}

/// Delivery pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum recipients per batch job.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between staggered batch enqueues.
    #[serde(default = "default_stagger_secs")]
    pub stagger_secs: u64,
    /// Provider ceiling: sends per second.
    #[serde(default = "default_per_second")]
    pub sends_per_second: u32,
    /// Provider ceiling: sends per rolling day.
    #[serde(default = "default_per_day")]
    pub sends_per_day: u32,
    /// Maximum processing attempts per batch job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds after which a claimed job with no progress is handed back.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    /// Scheduler tick interval in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Maximum jobs processed per scheduler tick.
    #[serde(default = "default_jobs_per_tick")]
    pub max_jobs_per_tick: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            stagger_secs: default_stagger_secs(),
            sends_per_second: default_per_second(),
            sends_per_day: default_per_day(),
            max_attempts: default_max_attempts(),
            claim_timeout_secs: default_claim_timeout_secs(),
            tick_secs: default_tick_secs(),
            max_jobs_per_tick: default_jobs_per_tick(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    50
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "fanwave".to_string()
}

fn default_provider() -> String {
    "smtp".to_string()
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_batch_size() -> usize {
    50
}

const fn default_stagger_secs() -> u64 {
    30
}

const fn default_per_second() -> u32 {
    10
}

const fn default_per_day() -> u32 {
    50_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_claim_timeout_secs() -> u64 {
    600
}

const fn default_tick_secs() -> u64 {
    15
}

const fn default_jobs_per_tick() -> usize {
    4
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `FANWAVE_ENV`)
    /// 3. Environment variables with `FANWAVE_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("FANWAVE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FANWAVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FANWAVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_defaults() {
        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.batch_size, 50);
        assert_eq!(delivery.sends_per_second, 10);
        assert_eq!(delivery.max_attempts, 3);
        assert_eq!(delivery.max_jobs_per_tick, 4);
    }
}
