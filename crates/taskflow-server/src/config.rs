//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `config/<service>.toml`, then `TASKFLOW__SECTION__KEY` environment
//! variables (for example `TASKFLOW__BROKER__MAX_RETRIES=10`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use taskflow_broker::{AckPolicy, ConnectorConfig, RetryPolicy};
use taskflow_types::TASK_CREATED;

/// The three TaskFlow processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    User,
    Task,
    Notification,
}

impl Service {
    /// Process name, also the config file stem
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user-service",
            Self::Task => "task-service",
            Self::Notification => "notification-service",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::User => 3001,
            Self::Task => 3002,
            Self::Notification => 3003,
        }
    }

    /// Text served on `GET /`
    pub fn banner(&self) -> &'static str {
        match self {
            Self::User => "Hello World! This is the TaskFlow user service.",
            Self::Task => "Hello World! This is the TaskFlow task service.",
            Self::Notification => "Hello World! This is the TaskFlow notification service.",
        }
    }

    /// Log directive used when neither `RUST_LOG` nor `log.filter` is set
    pub fn default_log_filter(&self) -> String {
        let target = self.name().replace('-', "_");
        format!("{target}=debug,taskflow_server=debug,taskflow_broker=debug,tower_http=debug")
    }
}

/// Top-level settings for one service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Load settings for `service` from its config file and the environment
    pub fn load(service: Service) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server.port", i64::from(service.default_port()))?
            .add_source(File::with_name(&format!("config/{}", service.name())).required(false))
            .add_source(
                Environment::with_prefix("TASKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Effective log directive for `service`
    pub fn log_filter(&self, service: Service) -> String {
        self.log
            .filter
            .clone()
            .unwrap_or_else(|| service.default_log_filter())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    /// `host:port` to bind
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which transport the broker layer uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerEngine {
    /// RabbitMQ over AMQP 0-9-1
    #[default]
    Amqp,
    /// In-process broker, for running a single service without RabbitMQ
    Memory,
}

/// Broker connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Connect attempts per round
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Reconnect after an established connection drops
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default)]
    pub engine: BrokerEngine,
    /// Acknowledgment mode for consumers
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

impl BrokerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, self.retry_delay_ms)
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig::new(self.queue.clone())
            .with_retry(self.retry_policy())
            .with_reconnect(self.reconnect)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            queue: default_queue(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            reconnect: default_reconnect(),
            engine: BrokerEngine::default(),
            ack_policy: AckPolicy::default(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` still wins
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_broker_url() -> String {
    "amqp://rabbitmq:5672/%2f".to_string()
}

fn default_queue() -> String {
    TASK_CREATED.to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_reconnect() -> bool {
    true
}
