//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. The store URL is
//! wrapped in secrecy::SecretString since database URLs carry passwords.

pub mod lanes;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};
use crate::locker::LockerConfig;
use crate::store::{DEFAULT_STORE_PATH, StoreUrl};

#[derive(Debug)]
pub struct Config {
    /// `WORKLOCK_STORE`, defaulting to the SQLite file at [`DEFAULT_STORE_PATH`].
    pub store_url: SecretString,
    /// `WORKLOCK_TIMEOUT` in seconds; unset or empty means leases never expire.
    pub timeout: Option<Duration>,
    /// `WORKLOCK_LOG_STEP`; `0` disables decision logging.
    pub log_step: Option<usize>,
    /// `WORKLOCK_MARK_AS_DONE`.
    pub mark_as_done: bool,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let timeout = var("WORKLOCK_TIMEOUT")
            .map(|raw| parse_timeout(&raw))
            .transpose()?;
        let log_step = match var("WORKLOCK_LOG_STEP") {
            Some(raw) => match parse_number::<usize>("WORKLOCK_LOG_STEP", &raw)? {
                0 => None,
                n => Some(n),
            },
            None => Some(1),
        };
        let mark_as_done = var("WORKLOCK_MARK_AS_DONE")
            .map(|raw| parse_flag("WORKLOCK_MARK_AS_DONE", &raw))
            .transpose()?
            .unwrap_or(true);

        Ok(Self {
            store_url: SecretString::from(
                var("WORKLOCK_STORE").unwrap_or_else(|| DEFAULT_STORE_PATH.to_string()),
            ),
            timeout,
            log_step,
            mark_as_done,
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Parse the store URL. Nothing is opened yet.
    pub fn store(&self) -> Result<StoreUrl> {
        self.store_url.expose_secret().parse()
    }

    pub fn locker_config(&self) -> LockerConfig {
        LockerConfig {
            timeout: self.timeout,
            log_step: self.log_step,
            mark_as_done: self.mark_as_done,
            ..LockerConfig::default()
        }
    }
}

/// Seconds, fractional allowed.
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs = parse_number::<f64>("WORKLOCK_TIMEOUT", raw)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("WORKLOCK_TIMEOUT={raw} is not a valid duration: {e}")))
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw} is not a number: {e}")))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{name}={raw} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_timeouts_are_accepted() {
        assert_eq!(parse_timeout("2.5").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_timeout("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn negative_timeouts_are_rejected() {
        assert!(matches!(parse_timeout("-1"), Err(Error::Config(_))));
        assert!(matches!(parse_timeout("soon"), Err(Error::Config(_))));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("X", "Yes").unwrap());
        assert!(!parse_flag("X", "off").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }
}
