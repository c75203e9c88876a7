//! Service configuration, read once from the environment at startup.

use std::{env, str::FromStr};
use thiserror::Error;

use crate::store::LessonDeletePolicy;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Knobs the request handlers need at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub catalog_page_size: i64,
    pub instructor_page_size: i64,
    pub lesson_delete_policy: LessonDeletePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_page_size: 12,
            instructor_page_size: 10,
            lesson_delete_policy: LessonDeletePolicy::Cascade,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_pool_max: u32,
    pub host: String,
    pub port: u16,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset and empty are the same.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = parse_or(&get, "STORE_BACKEND", StoreBackend::default())?;
        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let defaults = Settings::default();
        let settings = Settings {
            catalog_page_size: positive(&get, "CATALOG_PAGE_SIZE", defaults.catalog_page_size)?,
            instructor_page_size: positive(
                &get,
                "INSTRUCTOR_PAGE_SIZE",
                defaults.instructor_page_size,
            )?,
            lesson_delete_policy: parse_or(&get, "LESSON_DELETE_POLICY", defaults.lesson_delete_policy)?,
        };

        Ok(Self {
            backend,
            database_url,
            db_pool_max: parse_or(&get, "DB_POOL_MAX", 10)?,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "PORT", 8081)?,
            log_filter: get("RUST_LOG").unwrap_or_else(|| "coursemark=info,tower_http=info".into()),
            log_format: parse_or(&get, "LOG_FORMAT", LogFormat::default())?,
            settings,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive<G>(get: &G, key: &'static str, default: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value < 1 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/lms")]).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Postgres);
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.db_pool_max, 10);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.settings, Settings::default());
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let cfg = config(&[
            ("STORE_BACKEND", "memory"),
            ("LESSON_DELETE_POLICY", "reject"),
            ("CATALOG_PAGE_SIZE", "5"),
            ("LOG_FORMAT", "json"),
            ("PORT", ""),
        ])
        .unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.settings.catalog_page_size, 5);
        assert_eq!(cfg.settings.lesson_delete_policy, LessonDeletePolicy::Reject);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config(&[("STORE_BACKEND", "memory"), ("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".into()
            }
        );
        let err = config(&[("STORE_BACKEND", "memory"), ("CATALOG_PAGE_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CATALOG_PAGE_SIZE", .. }));
        assert!(config(&[("STORE_BACKEND", "sqlite")]).is_err());
    }
}
