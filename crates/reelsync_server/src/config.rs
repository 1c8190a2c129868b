use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3030)
    pub port: u16,
    /// SQLite database file; documents are kept in memory when unset
    pub database_path: Option<PathBuf>,
    /// CORS allowed origins (comma-separated, `*` for any)
    pub cors_origins: Vec<String>,
    /// Attempts per document load or save (default: 3)
    pub save_max_attempts: u32,
    /// Delay before the first save retry (default: 100ms)
    pub save_retry_backoff: Duration,
    /// Idle time after which an unused session is evicted (default: 15 minutes)
    pub session_idle_timeout: Duration,
    /// Interval of the flush/evict maintenance task (default: 60s)
    pub maintenance_interval: Duration,
    /// Per-project broadcast buffer (default: 1024)
    pub broadcast_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT")
            .unwrap_or_else(|| "3030".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path = lookup("DATABASE_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let save_max_attempts: u32 = parse_var(&lookup, "SAVE_MAX_ATTEMPTS", 3)?;
        if save_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("SAVE_MAX_ATTEMPTS"));
        }

        let broadcast_capacity: usize = parse_var(&lookup, "BROADCAST_CAPACITY", 1024)?;
        if broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue("BROADCAST_CAPACITY"));
        }

        Ok(Config {
            host,
            port,
            database_path,
            cors_origins,
            save_max_attempts,
            save_retry_backoff: Duration::from_millis(parse_var(
                &lookup,
                "SAVE_RETRY_BACKOFF_MS",
                100,
            )?),
            session_idle_timeout: Duration::from_secs(parse_var(
                &lookup,
                "SESSION_IDLE_TIMEOUT_SECS",
                900,
            )?),
            maintenance_interval: Duration::from_secs(
                parse_var::<_, u64>(&lookup, "MAINTENANCE_INTERVAL_SECS", 60)?.max(1),
            ),
            broadcast_capacity,
        })
    }

    /// Whether any origin may call the server
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name)),
        None => Ok(default),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    InvalidPort,
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidValue(name) => write!(f, "Invalid {} environment variable", name),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.server_addr(), "0.0.0.0:3030");
        assert!(config.database_path.is_none());
        assert!(config.allows_any_origin());
        assert_eq!(config.save_max_attempts, 3);
        assert_eq!(config.save_retry_backoff, Duration::from_millis(100));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(900));
        assert_eq!(config.broadcast_capacity, 1024);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("DATABASE_PATH", "/var/lib/reelsync/projects.db"),
            ("CORS_ORIGINS", "https://edit.example.com, https://review.example.com"),
            ("SESSION_IDLE_TIMEOUT_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/reelsync/projects.db"))
        );
        assert_eq!(config.cors_origins.len(), 2);
        assert!(!config.allows_any_origin());
        assert_eq!(config.session_idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            config_from(&[("PORT", "http")]).unwrap_err(),
            ConfigError::InvalidPort
        );
        assert_eq!(
            config_from(&[("SAVE_MAX_ATTEMPTS", "0")]).unwrap_err(),
            ConfigError::InvalidValue("SAVE_MAX_ATTEMPTS")
        );
        assert_eq!(
            config_from(&[("BROADCAST_CAPACITY", "lots")]).unwrap_err(),
            ConfigError::InvalidValue("BROADCAST_CAPACITY")
        );
    }
}
