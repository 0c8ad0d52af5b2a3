//! Process configuration, read once from the environment.
//!
//! | Variable                     | Default                        |
//! |------------------------------|--------------------------------|
//! | `DATABASE_URL`               | unset (in-memory stores)       |
//! | `QUEUE_MODE`                 | `local`                        |
//! | `WORKER_POLL_INTERVAL_MS`    | `1000`                         |
//! | `WORKER_FAULT_BACKOFF_MS`    | `5000`                         |
//! | `JOB_TIMEOUT_SECS`           | `300` (`0` disables)           |
//! | `JOB_DEFAULT_MAX_RETRIES`    | `3`                            |
//! | `RETRY_BACKOFF_STRATEGY`     | `exponential`                  |
//! | `RETRY_BACKOFF_BASE_MS`      | `2000`                         |
//! | `RETRY_BACKOFF_MAX_MS`       | `60000`                        |
//! | `RECOVERY_STALE_AFTER_SECS`  | `600`                          |
//! | `RECONCILE_INTERVAL_SECS`    | `60` (`0` disables)            |
//! | `OVERDUE_SCAN_INTERVAL_SECS` | `3600` (`0` disables)          |
//! | `API_BIND_ADDR`              | `0.0.0.0:8080`                 |
//! | `EMBEDDED_WORKER`            | `true`                         |
//! | `DELIVERY_MODE`              | `log`                          |
//! | `WHATSAPP_PROVIDER`          | `meta`                         |
//! | `STORAGE_DIR`                | `./storage`                    |
//! | `STORAGE_PUBLIC_BASE_URL`    | `http://localhost:8080/files`  |
//!
//! Provider credentials: `SENDGRID_API_KEY`, `SENDGRID_SENDER`,
//! `WHATSAPP_PHONE_ID`, `WHATSAPP_ACCESS_TOKEN`, `TWILIO_SID`, `TWILIO_TOKEN`,
//! `TWILIO_WHATSAPP`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::adapters::SendGridConfig;
use crate::jobs::{BackoffStrategy, RetryPolicy, WorkerConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} is required: {reason}")]
    Missing { var: &'static str, reason: &'static str },
}

/// Where workers find pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Process-local ordered index fed from the durable store.
    Local,
    /// Claim straight from the shared durable store.
    Shared,
}

impl FromStr for QueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(QueueMode::Local),
            "shared" => Ok(QueueMode::Shared),
            other => Err(format!("expected local or shared, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Real providers.
    Live,
    /// Recording adapters that only log.
    Log,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(DeliveryMode::Live),
            "log" => Ok(DeliveryMode::Log),
            other => Err(format!("expected live or log, got {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhatsAppConfig {
    Meta {
        phone_id: String,
        access_token: String,
    },
    Twilio {
        account_sid: String,
        auth_token: String,
        from: String,
    },
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub sendgrid: Option<SendGridConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub queue_mode: QueueMode,
    pub worker: WorkerConfig,
    pub retry: RetryPolicy,
    /// `processing` jobs untouched this long are handed back to `pending`
    /// at startup and on every reconcile. Keep it above the job timeout.
    pub recovery_stale_after: Duration,
    pub reconcile_interval: Option<Duration>,
    pub overdue_scan_interval: Option<Duration>,
    pub api_bind_addr: String,
    pub embedded_worker: bool,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let database_url = env.string("DATABASE_URL");
        let queue_mode = env.parsed("QUEUE_MODE", QueueMode::Local)?;
        if queue_mode == QueueMode::Shared && database_url.is_none() {
            return Err(ConfigError::Missing {
                var: "DATABASE_URL",
                reason: "QUEUE_MODE=shared needs a shared store",
            });
        }

        let job_timeout = env.parsed::<u64>("JOB_TIMEOUT_SECS", 300)?;
        let worker = WorkerConfig {
            poll_interval: Duration::from_millis(env.parsed("WORKER_POLL_INTERVAL_MS", 1000)?),
            fault_backoff: Duration::from_millis(env.parsed("WORKER_FAULT_BACKOFF_MS", 5000)?),
            job_timeout: (job_timeout > 0).then(|| Duration::from_secs(job_timeout)),
            ..WorkerConfig::default()
        };

        let retry = RetryPolicy {
            default_max_retries: env.parsed("JOB_DEFAULT_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(env.parsed("RETRY_BACKOFF_BASE_MS", 2000)?),
            max_delay: Duration::from_millis(env.parsed("RETRY_BACKOFF_MAX_MS", 60_000)?),
            strategy: env.parsed("RETRY_BACKOFF_STRATEGY", BackoffStrategy::Exponential)?,
        };

        let delivery = DeliveryConfig {
            mode: env.parsed("DELIVERY_MODE", DeliveryMode::Log)?,
            sendgrid: env.string("SENDGRID_API_KEY").map(|api_key| SendGridConfig {
                api_key,
                sender: env
                    .string("SENDGRID_SENDER")
                    .unwrap_or_else(|| "noreply@oryxa.local".to_string()),
            }),
            whatsapp: whatsapp_config(&env)?,
        };

        Ok(Self {
            database_url,
            queue_mode,
            worker,
            retry,
            recovery_stale_after: Duration::from_secs(env.parsed("RECOVERY_STALE_AFTER_SECS", 600)?),
            reconcile_interval: env.interval("RECONCILE_INTERVAL_SECS", 60)?,
            overdue_scan_interval: env.interval("OVERDUE_SCAN_INTERVAL_SECS", 3600)?,
            api_bind_addr: env
                .string("API_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            embedded_worker: env.flag("EMBEDDED_WORKER", true)?,
            delivery,
            storage: StorageConfig {
                dir: env
                    .string("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./storage")),
                public_base_url: env
                    .string("STORAGE_PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:8080/files".to_string()),
            },
        })
    }
}

fn whatsapp_config(env: &Env<'_>) -> Result<Option<WhatsAppConfig>, ConfigError> {
    let provider = env
        .string("WHATSAPP_PROVIDER")
        .unwrap_or_else(|| "meta".to_string());
    match provider.to_ascii_lowercase().as_str() {
        "meta" => Ok(env
            .string("WHATSAPP_PHONE_ID")
            .zip(env.string("WHATSAPP_ACCESS_TOKEN"))
            .map(|(phone_id, access_token)| WhatsAppConfig::Meta {
                phone_id,
                access_token,
            })),
        "twilio" => Ok(env
            .string("TWILIO_SID")
            .zip(env.string("TWILIO_TOKEN"))
            .zip(env.string("TWILIO_WHATSAPP"))
            .map(|((account_sid, auth_token), from)| WhatsAppConfig::Twilio {
                account_sid,
                auth_token,
                from,
            })),
        _ => Err(ConfigError::Invalid {
            var: "WHATSAPP_PROVIDER",
            value: provider,
            reason: "expected meta or twilio".to_string(),
        }),
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Non-empty value of `var`.
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Seconds; zero turns the periodic task off.
    fn interval(&self, var: &'static str, default_secs: u64) -> Result<Option<Duration>, ConfigError> {
        let secs: u64 = self.parsed(var, default_secs)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(var).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}
