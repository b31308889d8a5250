use std::env;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::reminders::scheduler::MAX_INTERVAL_MINUTES;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub clinic_name: String,
    pub reminder_interval: Duration,
    /// `ENABLE_REMINDERS`; `None` leaves the decision to the startup defaults.
    pub enable_reminders: Option<bool>,
    pub reminder_pass_timeout: Option<Duration>,
    pub mail: MailConfig,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub from: String,
    /// Without a relay, reminders are written to the log.
    pub relay_url: Option<String>,
    pub relay_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let session_ttl_hours = var("SESSION_TTL_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let clinic_name = var("CLINIC_NAME").unwrap_or_else(|| "Clinic".to_string());

        let interval_minutes = match var("REMINDER_INTERVAL_MINUTES") {
            Some(s) => s
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|m| (1..=MAX_INTERVAL_MINUTES).contains(m))
                .with_context(|| {
                    format!(
                        "REMINDER_INTERVAL_MINUTES must be between 1 and {MAX_INTERVAL_MINUTES}, got '{s}'"
                    )
                })?,
            None => 5,
        };

        let enable_reminders = match var("ENABLE_REMINDERS") {
            Some(s) => Some(parse_flag(&s).with_context(|| format!("ENABLE_REMINDERS: '{s}'"))?),
            None => None,
        };

        let reminder_pass_timeout = match var("REMINDER_PASS_TIMEOUT_SECS") {
            Some(s) => Some(
                s.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .with_context(|| {
                        format!("REMINDER_PASS_TIMEOUT_SECS must be a positive integer, got '{s}'")
                    })?,
            ),
            None => None,
        };

        let mail = MailConfig {
            from: var("MAIL_FROM").unwrap_or_else(|| "noreply@clinic.local".to_string()),
            relay_url: var("MAIL_RELAY_URL").filter(|s| !s.trim().is_empty()),
            relay_token: var("MAIL_RELAY_TOKEN").filter(|s| !s.trim().is_empty()),
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            clinic_name,
            reminder_interval: Duration::from_secs(interval_minutes * 60),
            enable_reminders,
            reminder_pass_timeout,
            mail,
        })
    }
}

fn parse_flag(s: &str) -> anyhow::Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected true or false"),
    }
}
