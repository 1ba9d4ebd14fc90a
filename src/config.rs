use crate::store::DEFAULT_SEED;
use anyhow::anyhow;
use anyhow::Context;
use dropshot::ConfigLoggingLevel;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CORS_ORIGIN: &str = "https://ghimiresushank.com.np";
const DEFAULT_ALLOWED_ORIGINS: [&str; 2] =
    ["https://ghimiresushank.com.np", "www.ghimiresushank.com.np"];

/// Runtime settings, read from the process environment.
#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_address: SocketAddr,
    pub cors_origin: String,
    pub allowed_origins: Vec<String>,
    pub visits_seed: i64,
    pub pool_size: u32,
    pub log_level: ConfigLoggingLevel,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").context("DATABASE_URL is not set")?;
        let ip: IpAddr =
            parse_or(&lookup, "BIND_ADDRESS", Ipv4Addr::UNSPECIFIED.into())?;
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let cors_origin = lookup("CORS_ORIGIN")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());
        let allowed_origins = match lookup("ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
        };
        let visits_seed = parse_or(&lookup, "VISITS_SEED", DEFAULT_SEED)?;
        if !(0..i64::MAX).contains(&visits_seed) {
            return Err(anyhow!(
                "VISITS_SEED must be between 0 and {}, got {}",
                i64::MAX - 1,
                visits_seed
            ));
        }
        let log_level = match lookup("LOG_LEVEL") {
            Some(level) => parse_log_level(&level)?,
            None => ConfigLoggingLevel::Info,
        };

        Ok(Config {
            database_url,
            bind_address: SocketAddr::new(ip, port),
            cors_origin,
            allowed_origins,
            visits_seed,
            pool_size: parse_or(&lookup, "DB_POOL_SIZE", 1)?,
            log_level,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|error| anyhow!("parsing {}={:?}: {}", key, raw, error)),
    }
}

fn parse_log_level(level: &str) -> anyhow::Result<ConfigLoggingLevel> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(ConfigLoggingLevel::Trace),
        "debug" => Ok(ConfigLoggingLevel::Debug),
        "info" => Ok(ConfigLoggingLevel::Info),
        "warn" => Ok(ConfigLoggingLevel::Warn),
        "error" => Ok(ConfigLoggingLevel::Error),
        "critical" => Ok(ConfigLoggingLevel::Critical),
        other => Err(anyhow!("unknown LOG_LEVEL {:?}", other)),
    }
}
