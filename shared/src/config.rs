use tracing::{info, warn};

use crate::logging::LogLevel;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub name: String,
    pub log_level: LogLevel,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub host: String,
    pub port: u16,
    pub key_prefix: Option<String>,
}

impl StorageConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
}

impl Config {
    const DEFAULT_SERVICE_NAME: &str = "datasource";
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 6379;

    /// Read a `.env` file if present, then build the config from the environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(_) => info!("No .env file found, using system environment variables"),
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = match lookup("SERVICE_LOG_LEVEL") {
            Some(raw) => raw.parse::<LogLevel>().unwrap_or_else(|_| {
                warn!("SERVICE_LOG_LEVEL '{}' not recognised, using INFO", raw);
                LogLevel::Info
            }),
            None => LogLevel::Info,
        };

        let port = lookup("STORAGE_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(Self::DEFAULT_PORT);

        Self {
            service: ServiceConfig {
                name: lookup("SERVICE_NAME")
                    .unwrap_or_else(|| Self::DEFAULT_SERVICE_NAME.to_string()),
                log_level,
            },
            storage: StorageConfig {
                host: lookup("STORAGE_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
                port,
                key_prefix: lookup("STORAGE_KEY_PREFIX").filter(|p| !p.is_empty()),
            },
        }
    }
}
