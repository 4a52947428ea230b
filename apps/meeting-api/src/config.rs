use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::server::DEFAULT_HEARTBEAT_INTERVAL;
use crate::meeting::policy::{default_hand_raise_roles, RejoinRole, RolePolicy};
use crate::meeting::DEFAULT_GRACE_PERIOD;
use crate::models::participant::Role;

/// Meeting API configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Reported by `/health/version`.
    pub app_version: String,
    /// How long a disconnected participant keeps their identity.
    pub grace_period: Duration,
    /// Roles allowed to raise their own hand.
    pub hand_raise_roles: Vec<Role>,
    pub rejoin_role: RejoinRole,
    /// Announced in `hello`; a connection silent for 1.5× this is closed.
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            grace_period: DEFAULT_GRACE_PERIOD,
            hand_raise_roles: default_hand_raise_roles(),
            rejoin_role: RejoinRole::Overwrite,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Every variable is
    /// optional; unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            port: parse_or(var("PORT"), "PORT", defaults.port),
            app_version: var("APP_VERSION").unwrap_or(defaults.app_version),
            grace_period: Duration::from_secs(parse_or(
                var("GRACE_PERIOD_SECS"),
                "GRACE_PERIOD_SECS",
                defaults.grace_period.as_secs(),
            )),
            hand_raise_roles: var("HAND_RAISE_ROLES")
                .and_then(|raw| match parse_roles(&raw) {
                    Ok(roles) => Some(roles),
                    Err(e) => {
                        tracing::warn!(value = %raw, error = %e, "invalid HAND_RAISE_ROLES, using default");
                        None
                    }
                })
                .unwrap_or(defaults.hand_raise_roles),
            rejoin_role: parse_or(var("REJOIN_ROLE"), "REJOIN_ROLE", defaults.rejoin_role),
            heartbeat_interval: match parse_or(
                var("HEARTBEAT_INTERVAL_MS"),
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            ) {
                0 => {
                    tracing::warn!("HEARTBEAT_INTERVAL_MS must be positive, using default");
                    defaults.heartbeat_interval
                }
                ms => Duration::from_millis(ms),
            },
        }
    }

    pub fn role_policy(&self) -> RolePolicy {
        RolePolicy::new(self.hand_raise_roles.iter().copied(), self.rejoin_role)
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "invalid value, using default");
            default
        }
    }
}

/// Comma-separated role names. An explicitly empty list is allowed.
fn parse_roles(raw: &str) -> Result<Vec<Role>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "none")
        .map(Role::from_str)
        .collect()
}
