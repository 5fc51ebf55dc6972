use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Used when `CMM_API_RATE` is not set.
pub const DEFAULT_THROTTLE_RATE: &str = "1/minute";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub throttle: ThrottleConfig,
    pub reports: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Path prefix the API is mounted under, e.g. `/cmm_api`. Empty mounts at the root.
    pub mount_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Host platform database. `None` runs against in-memory collaborators.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Course ids known to the in-memory catalog when there is no database.
    pub seed_courses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
    /// Queue consumed by the host's report workers.
    pub host_queue: String,
    /// Queue consumed by this service's own worker.
    pub service_queue: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    Memory,
}

impl FromStr for StorageProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(StorageProvider::Local),
            "memory" => Ok(StorageProvider::Memory),
            other => anyhow::bail!("Unknown storage provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub report_dir: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Tokens accepted without a database, as `token:user_id:username`.
    pub static_tokens: Vec<StaticToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    pub rate: ThrottleRate,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { rate: ThrottleRate { num_requests: 1, period: Duration::from_secs(60) } }
    }
}

/// `N/period` where the period starts with `s`, `m`, `h` or `d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ThrottleRate {
    pub num_requests: u32,
    pub period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid throttle rate: {0}")]
pub struct InvalidRate(String);

impl FromStr for ThrottleRate {
    type Err = InvalidRate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRate(s.to_string());
        let (num, period) = s.split_once('/').ok_or_else(invalid)?;
        let num_requests: u32 = num.trim().parse().map_err(|_| invalid())?;
        if num_requests == 0 {
            return Err(invalid());
        }
        let secs = match period.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3600,
            Some('d') => 86400,
            _ => return Err(invalid()),
        };
        Ok(Self { num_requests, period: Duration::from_secs(secs) })
    }
}

impl TryFrom<String> for ThrottleRate {
    type Error = InvalidRate;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    Es,
    En,
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "es" => Ok(Locale::Es),
            "en" => Ok(Locale::En),
            other => anyhow::bail!("Unsupported report locale: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    pub locale: Locale,
    /// Overrides the default student profile columns when non-empty.
    pub student_profile_fields: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { locale: Locale::Es, student_profile_fields: Vec::new() }
    }
}

fn parse_static_tokens(raw: &str) -> Result<Vec<StaticToken>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().unwrap_or_default();
            let user_id = parts.next().context("CMM_API_TOKENS entry is missing a user id")?;
            let username = parts.next().context("CMM_API_TOKENS entry is missing a username")?;
            Ok(StaticToken {
                token: token.to_string(),
                user_id: user_id.parse().context("CMM_API_TOKENS user id is not a number")?,
                username: username.to_string(),
            })
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT").unwrap_or_else(|_| "8000".to_string()).parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                mount_path: env::var("CMM_API_MOUNT").unwrap_or_else(|_| "/cmm_api".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
                seed_courses: split_list(&env::var("CMM_API_COURSES").unwrap_or_default()),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                enabled: env::var("USE_JOB_QUEUE").unwrap_or_else(|_| "false".to_string()).parse()?,
                host_queue: env::var("HOST_TASK_QUEUE")
                    .unwrap_or_else(|_| "edx.lms.core.low".to_string()),
                service_queue: env::var("CMM_API_TASK_QUEUE")
                    .unwrap_or_else(|_| "cmm_api.low".to_string()),
            },
            storage: StorageConfig {
                provider: env::var("STORAGE_PROVIDER")
                    .unwrap_or_else(|_| "local".to_string())
                    .parse()?,
                report_dir: env::var("REPORT_STORAGE_DIR")
                    .unwrap_or_else(|_| "/tmp/cmm-api-reports".to_string()),
                base_url: env::var("REPORT_BASE_URL")
                    .unwrap_or_else(|_| "/cmm_api/reports".to_string()),
            },
            auth: AuthConfig {
                static_tokens: parse_static_tokens(&env::var("CMM_API_TOKENS").unwrap_or_default())?,
            },
            throttle: ThrottleConfig {
                rate: env::var("CMM_API_RATE")
                    .unwrap_or_else(|_| DEFAULT_THROTTLE_RATE.to_string())
                    .parse()?,
            },
            reports: ReportConfig {
                locale: env::var("REPORT_LOCALE").unwrap_or_else(|_| "es".to_string()).parse()?,
                student_profile_fields: split_list(
                    &env::var("STUDENT_PROFILE_DOWNLOAD_FIELDS").unwrap_or_default(),
                ),
            },
        })
    }
}
