use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use warp::http::uri::{Authority, Scheme};

use crate::error::{DuelError, Result};

pub const DEFAULT_MAX_QUESTIONS: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_FINISHED_GRACE_SECS: u64 = 5 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub duel: DuelConfig,
    pub logging: LoggingConfig,
    /// JSON file with study set terms; empty store when unset
    pub terms_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuelConfig {
    pub max_questions: usize,
    pub idle_timeout_secs: u64,
    pub finished_grace_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            finished_grace_secs: DEFAULT_FINISHED_GRACE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl DuelConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn finished_grace(&self) -> Duration {
        Duration::from_secs(self.finished_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Loads configuration from the process environment and an optional `.env` file.
    ///
    /// Recognised variables:
    /// - `SERVER_HOST`, `SERVER_PORT`, `CORS_ORIGIN`
    /// - `TERMS_FILE`
    /// - `DUEL_MAX_QUESTIONS`, `DUEL_IDLE_TIMEOUT_SECS`,
    ///   `DUEL_FINISHED_GRACE_SECS`, `DUEL_SWEEP_INTERVAL_SECS`
    /// - `LOG_FORMAT` (`json` for structured output)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let duel = DuelConfig {
            max_questions: parse_var("DUEL_MAX_QUESTIONS", DEFAULT_MAX_QUESTIONS)?,
            idle_timeout_secs: parse_var("DUEL_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)?,
            finished_grace_secs: parse_var(
                "DUEL_FINISHED_GRACE_SECS",
                DEFAULT_FINISHED_GRACE_SECS,
            )?,
            sweep_interval_secs: parse_var(
                "DUEL_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
        };

        if duel.max_questions == 0 {
            return Err(DuelError::InvalidConfiguration(
                "DUEL_MAX_QUESTIONS must be at least 1".to_string(),
            ));
        }
        if duel.sweep_interval_secs == 0 {
            return Err(DuelError::InvalidConfiguration(
                "DUEL_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
                cors_origin: non_empty_var("CORS_ORIGIN")
                    .map(|origin| parse_cors_origin(&origin))
                    .transpose()?,
            },
            duel,
            logging: LoggingConfig {
                json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            terms_file: non_empty_var("TERMS_FILE"),
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// CORS origins must be `scheme://host[:port]` with nothing after the authority.
fn parse_cors_origin(raw: &str) -> Result<String> {
    let origin = raw.trim();
    let valid = origin.split_once("://").map_or(false, |(scheme, authority)| {
        !scheme.is_empty() && scheme.parse::<Scheme>().is_ok() && authority.parse::<Authority>().is_ok()
    });
    if !valid {
        return Err(DuelError::InvalidConfiguration(format!(
            "CORS_ORIGIN must look like scheme://host[:port], got {raw}"
        )));
    }
    Ok(origin.to_string())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            DuelError::InvalidConfiguration(format!("{key} has an invalid value: {raw}"))
        }),
        _ => Ok(default),
    }
}
