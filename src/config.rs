use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

const MAX_IDLE_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub banks_dir: Option<PathBuf>,
    pub session_idle_secs: u64,
    pub sweep_interval_secs: u64,
    pub cors_origins: Vec<String>,
    pub create_limit_per_minute: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            banks_dir: None,
            session_idle_secs: 1800,
            sweep_interval_secs: 5,
            cors_origins: vec!["http://localhost:5173".to_string()],
            create_limit_per_minute: 120,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring malformed {}={:?}", key, raw);
            default
        }),
        _ => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let cors_origins = non_empty("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);
        Self {
            host: non_empty("TRAINING_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "TRAINING_PORT", defaults.port),
            banks_dir: non_empty("BANKS_DIR").map(PathBuf::from),
            session_idle_secs: parse_or(&lookup, "SESSION_IDLE_SECS", defaults.session_idle_secs)
                .min(MAX_IDLE_SECS),
            sweep_interval_secs: parse_or(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)
                .clamp(1, MAX_SWEEP_INTERVAL_SECS),
            cors_origins,
            create_limit_per_minute: parse_or(
                &lookup,
                "CREATE_LIMIT_PER_MINUTE",
                defaults.create_limit_per_minute,
            ),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
