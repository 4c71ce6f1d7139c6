//! Process configuration from the environment (after `.env`, if any).

use crate::config::is_identifier;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

/// Page size bounds for list endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u64,
    pub max_size: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        PageLimits {
            default_size: 10,
            max_size: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub db_source: String,
    pub db_schema: String,
    pub db_max_connections: u32,
    /// Root of `transformers/` and `filters/`.
    pub setting_path: PathBuf,
    pub http_server_address: String,
    pub page: PageLimits,
    pub body_limit_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_source = get("DB_SOURCE")
            .or_else(|| get("DATABASE_URL"))
            .ok_or_else(|| ConfigError::Load("DB_SOURCE is not set".into()))?;
        let db_schema = get("DB_SCHEMA").unwrap_or_else(|| "public".into());
        if !is_identifier(&db_schema) {
            return Err(ConfigError::Load(format!("DB_SCHEMA `{}` is not a valid identifier", db_schema)));
        }
        let page = PageLimits {
            default_size: parse_or(&get, "DEFAULT_PAGE_SIZE", 10)?,
            max_size: parse_or(&get, "MAX_PAGE_SIZE", 100)?,
        };
        if page.default_size == 0 || page.default_size > page.max_size {
            return Err(ConfigError::Load(format!(
                "DEFAULT_PAGE_SIZE must be between 1 and MAX_PAGE_SIZE ({})",
                page.max_size
            )));
        }

        Ok(Settings {
            db_source,
            db_schema,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5)?,
            setting_path: get("SETTING_PATH").unwrap_or_else(|| "setting".into()).into(),
            http_server_address: get("HTTP_SERVER_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
            page,
            body_limit_bytes: parse_or(&get, "BODY_LIMIT_BYTES", 1024 * 1024)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Load(format!("invalid {}: {}", key, e))),
    }
}
