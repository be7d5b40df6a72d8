/// Configuration management for the claims projection service
///
/// Loads configuration from environment variables (and `.env` when present).
use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP presentation layer
    pub http: HttpConfig,
    /// Broker session
    pub kafka: KafkaConfig,
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Kafka session configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` bootstrap list
    pub brokers: String,
    /// CDC topic holding the system-of-record table
    pub topic: String,
    /// Client id, also used as consumer group id
    pub client_id: String,
    /// SASL/SCRAM-SHA-512 username
    pub scram_username: Option<String>,
    pub scram_password: Option<SecretString>,
    /// TLS trust store (PEM, or PKCS#12 when it ends in .p12/.pfx)
    pub truststore_path: Option<PathBuf>,
    pub truststore_password: Option<SecretString>,
    /// Timeout for the startup metadata/watermark requests
    pub metadata_timeout: Duration,
    /// Upper bound on the initial replay; `None` waits forever
    pub ready_timeout: Option<Duration>,
}

pub const DEFAULT_TOPIC: &str = "sor.public.quotes";
pub const DEFAULT_CLIENT_ID: &str = "sor.public.quotes-cdc";

fn default_metadata_timeout_secs() -> u64 {
    10
}

fn default_ready_timeout_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http = HttpConfig {
            host: lookup("APP_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: lookup("PORT")
                .map(|s| s.parse::<u16>().context("PORT must be a valid port number"))
                .transpose()?
                .unwrap_or(8080),
        };

        let brokers = lookup("KAFKA_BROKERS")
            .filter(|s| !s.trim().is_empty())
            .context("KAFKA_BROKERS environment variable not set")?;

        let scram_username = lookup("KAFKA_SCRAM_USERNAME").filter(|s| !s.is_empty());
        let scram_password = lookup("KAFKA_SCRAM_PASSWORD").filter(|s| !s.is_empty());
        if scram_username.is_some() != scram_password.is_some() {
            bail!("KAFKA_SCRAM_USERNAME and KAFKA_SCRAM_PASSWORD must be set together");
        }

        // 0 disables the bound
        let ready_timeout_secs = lookup("CDC_READY_TIMEOUT_SECS")
            .map(|s| s.parse::<u64>().context("CDC_READY_TIMEOUT_SECS must be an integer"))
            .transpose()?
            .unwrap_or_else(default_ready_timeout_secs);

        let kafka = KafkaConfig {
            brokers,
            topic: lookup("CDC_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            client_id: lookup("CDC_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            scram_username,
            scram_password: scram_password.map(SecretString::from),
            truststore_path: lookup("KAFKA_TRUSTSTORE_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            truststore_password: lookup("KAFKA_TRUSTSTORE_PASSWORD").map(SecretString::from),
            metadata_timeout: Duration::from_secs(
                lookup("KAFKA_METADATA_TIMEOUT_SECS")
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or_else(default_metadata_timeout_secs),
            ),
            ready_timeout: (ready_timeout_secs > 0)
                .then(|| Duration::from_secs(ready_timeout_secs)),
        };

        Ok(Config { http, kafka })
    }
}
