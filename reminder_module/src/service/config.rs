use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::gateway::DEFAULT_QSTASH_URL;
use crate::llm::{DEFAULT_ASSISTANT_MODEL, DEFAULT_OPENAI_URL};
use crate::transcription::DEFAULT_TRANSCRIPTION_MODEL;

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite(PathBuf),
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    Qstash,
    Local,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub timezone: Tz,
    pub store_backend: StoreBackend,
    pub scheduler_backend: SchedulerBackend,
    pub qstash_url: String,
    pub qstash_token: Option<String>,
    pub qstash_current_signing_key: Option<String>,
    pub qstash_next_signing_key: Option<String>,
    /// Public URL of `/api/callback`, as the scheduler calls it.
    pub callback_url: Option<String>,
    pub local_scheduler_db_path: PathBuf,
    pub local_scheduler_poll_interval: Duration,
    pub telegram_bot_token: Option<String>,
    pub telegram_webhook_secret: Option<String>,
    pub telegram_api_base: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub assistant_model: String,
    pub transcription_model: String,
    pub llm_timeout: Duration,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("REMINDER_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("REMINDER_SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9002);

        let timezone = match env_var_non_empty("TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| format!("invalid TIMEZONE: {}", name))?,
            None => DEFAULT_TIMEZONE,
        };

        let store_backend = match env_var_non_empty("REMINDER_STORE_BACKEND")
            .map(|value| value.to_lowercase())
            .as_deref()
        {
            Some("memory") => StoreBackend::Memory,
            Some("sqlite") | None => StoreBackend::Sqlite(resolve_path(
                env_var_non_empty("REMINDER_STORE_PATH")
                    .unwrap_or_else(|| default_state_path("store.db")),
            )?),
            Some(other) => return Err(format!("unknown REMINDER_STORE_BACKEND: {}", other).into()),
        };

        let qstash_token = env_var_non_empty("QSTASH_TOKEN");
        let scheduler_backend = match env_var_non_empty("SCHEDULER_BACKEND")
            .map(|value| value.to_lowercase())
            .as_deref()
        {
            Some("qstash") => SchedulerBackend::Qstash,
            Some("local") => SchedulerBackend::Local,
            Some(other) => return Err(format!("unknown SCHEDULER_BACKEND: {}", other).into()),
            None if qstash_token.is_some() => SchedulerBackend::Qstash,
            None => SchedulerBackend::Local,
        };
        let callback_url = env_var_non_empty("CALLBACK_URL");
        if scheduler_backend == SchedulerBackend::Qstash {
            if qstash_token.is_none() {
                return Err("SCHEDULER_BACKEND=qstash requires QSTASH_TOKEN".into());
            }
            if callback_url.is_none() {
                return Err("SCHEDULER_BACKEND=qstash requires CALLBACK_URL".into());
            }
        }

        let local_scheduler_db_path = resolve_path(
            env_var_non_empty("LOCAL_SCHEDULER_DB_PATH")
                .unwrap_or_else(|| default_state_path("local_scheduler.db")),
        )?;
        let local_scheduler_poll_interval = env::var("LOCAL_SCHEDULER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(1));

        let llm_timeout = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(20));
        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            timezone,
            store_backend,
            scheduler_backend,
            qstash_url: env_var_non_empty("QSTASH_URL")
                .unwrap_or_else(|| DEFAULT_QSTASH_URL.to_string()),
            qstash_token,
            qstash_current_signing_key: env_var_non_empty("QSTASH_CURRENT_SIGNING_KEY"),
            qstash_next_signing_key: env_var_non_empty("QSTASH_NEXT_SIGNING_KEY"),
            callback_url,
            local_scheduler_db_path,
            local_scheduler_poll_interval,
            telegram_bot_token: env_var_non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_webhook_secret: env_var_non_empty("TELEGRAM_WEBHOOK_SECRET"),
            telegram_api_base: env_var_non_empty("TELEGRAM_API_BASE"),
            openai_api_key: env_var_non_empty("OPENAI_API_KEY"),
            openai_api_url: env_var_non_empty("OPENAI_API_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            assistant_model: env_var_non_empty("ASSISTANT_MODEL")
                .unwrap_or_else(|| DEFAULT_ASSISTANT_MODEL.to_string()),
            transcription_model: env_var_non_empty("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            llm_timeout,
            inbound_body_max_bytes,
        })
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_state_path(file_name: &str) -> String {
    PathBuf::from(".reminder")
        .join("state")
        .join(file_name)
        .to_string_lossy()
        .into_owned()
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "REMINDER_SERVICE_HOST",
        "REMINDER_SERVICE_PORT",
        "TIMEZONE",
        "REMINDER_STORE_BACKEND",
        "REMINDER_STORE_PATH",
        "SCHEDULER_BACKEND",
        "QSTASH_TOKEN",
        "QSTASH_URL",
        "CALLBACK_URL",
        "LLM_TIMEOUT_SECS",
        "INBOUND_BODY_MAX_BYTES",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();
            for key in KEYS {
                env::remove_var(key);
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, previous) in &self.saved {
                match previous {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_use_local_scheduler_and_sqlite() {
        let _env = EnvGuard::clean();
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.port, 9002);
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.scheduler_backend, SchedulerBackend::Local);
        assert_eq!(config.qstash_url, DEFAULT_QSTASH_URL);
        assert_eq!(config.llm_timeout, Duration::from_secs(20));
        assert_eq!(config.inbound_body_max_bytes, DEFAULT_INBOUND_BODY_MAX_BYTES);
        match config.store_backend {
            StoreBackend::Sqlite(path) => {
                assert!(path.is_absolute());
                assert!(path.ends_with(".reminder/state/store.db"));
            }
            StoreBackend::Memory => panic!("expected sqlite store"),
        }
    }

    #[test]
    #[serial]
    fn qstash_token_selects_qstash() {
        let env = EnvGuard::clean();
        env.set("QSTASH_TOKEN", "qstash-token");
        env.set("CALLBACK_URL", "https://reminders.example.com/api/callback");
        env.set("TIMEZONE", "Europe/Berlin");
        env.set("REMINDER_STORE_BACKEND", "memory");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.scheduler_backend, SchedulerBackend::Qstash);
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }

    #[test]
    #[serial]
    fn qstash_without_callback_url_is_rejected() {
        let env = EnvGuard::clean();
        env.set("SCHEDULER_BACKEND", "qstash");
        env.set("QSTASH_TOKEN", "qstash-token");
        assert!(ServiceConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn invalid_timezone_is_rejected() {
        let env = EnvGuard::clean();
        env.set("TIMEZONE", "Mars/Olympus_Mons");
        let err = ServiceConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus_Mons"));
    }
}
