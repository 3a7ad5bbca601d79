use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payment: PaymentConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    #[serde(default = "default_payment_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_payment_timeout() -> u64 {
    10
}

/// Lifecycle tunables surfaced to operators. All durations in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Interactive seat lock while the customer fills the form.
    pub seat_lock_seconds: u64,
    /// Durable reservation attached to a pending booking.
    pub seat_reservation_seconds: u64,
    /// How long an unpaid booking stays payable.
    pub booking_ttl_seconds: u64,
    /// Retry window past booking expiry.
    pub retry_grace_seconds: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_notification_queue")]
    pub notification_queue_size: usize,
}

fn default_store_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_notification_queue() -> usize {
    256
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of VIABUS)
            // Eg.. `VIABUS__SERVER__PORT=8080` would set `server.port`
            .add_source(config::Environment::with_prefix("VIABUS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
