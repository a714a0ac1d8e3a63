//! Runtime configuration.
//!
//! Resolved once at startup and passed into every service, so request handling never
//! reads process-wide state.

use chrono::Duration;

use crate::error::{RoutingError, RoutingResult};
use crate::models::ProviderId;

pub const ENV_EXPIRE_MINUTES: &str = "CAREROUTE_EXPIRE_MINUTES";
pub const ENV_GRACE_MINUTES: &str = "CAREROUTE_GRACE_MINUTES";
pub const ENV_NOTIFIER_COOLDOWN_MINUTES: &str = "CAREROUTE_NOTIFIER_COOLDOWN_MINUTES";
pub const ENV_PROVIDER_COOLDOWN_MINUTES: &str = "CAREROUTE_PROVIDER_COOLDOWN_MINUTES";
pub const ENV_UNSUITABLE_MESSAGE_PUBLIC: &str = "CAREROUTE_UNSUITABLE_MESSAGE_PUBLIC";
pub const ENV_PRIMARY_CC_ID: &str = "CAREROUTE_PRIMARY_CC_ID";
pub const ENV_EXPIRATION_SHARDS: &str = "CAREROUTE_EXPIRATION_SHARDS";
pub const ENV_LOCK_TTL_SECONDS: &str = "CAREROUTE_LOCK_TTL_SECONDS";
pub const ENV_REQUEST_TIMEOUT_SECONDS: &str = "CAREROUTE_REQUEST_TIMEOUT_SECONDS";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Length of a temporary claim
    pub expire_duration: Duration,
    /// Delay beyond expiry before a temporary claim is revoked
    pub grace_period: Duration,
    /// Minimum gap between two notifications for the same (state, pathway)
    pub notifier_cooldown: Duration,
    /// Minimum gap between two notifications to the same provider
    pub provider_notify_cooldown: Duration,
    /// Post the unsuitable explanation as a patient-visible message
    pub unsuitable_message_public: bool,
    /// Coordinator attached to every new case
    pub primary_cc_id: Option<ProviderId>,
    /// Number of expiration sweep shards (one advisory lock each)
    pub expiration_shards: u32,
    /// Extensions smaller than this are skipped
    pub min_extension_step: Duration,
    /// Lifetime of a worker's advisory lock
    pub lock_ttl: Duration,
    /// Deadline applied to each inbound operation
    pub request_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            expire_duration: Duration::minutes(60),
            grace_period: Duration::minutes(15),
            notifier_cooldown: Duration::minutes(60),
            provider_notify_cooldown: Duration::minutes(60),
            unsuitable_message_public: false,
            primary_cc_id: None,
            expiration_shards: 1,
            min_extension_step: Duration::minutes(1),
            lock_ttl: Duration::seconds(60),
            request_timeout: Duration::seconds(10),
        }
    }
}

impl RoutingConfig {
    /// Build from `CAREROUTE_*` environment variables, falling back to defaults.
    pub fn from_env() -> RoutingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> RoutingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_EXPIRE_MINUTES) {
            config.expire_duration =
                parse_duration(ENV_EXPIRE_MINUTES, &v, Duration::try_minutes)?;
        }
        if let Some(v) = lookup(ENV_GRACE_MINUTES) {
            config.grace_period = parse_duration(ENV_GRACE_MINUTES, &v, Duration::try_minutes)?;
        }
        if let Some(v) = lookup(ENV_NOTIFIER_COOLDOWN_MINUTES) {
            config.notifier_cooldown =
                parse_duration(ENV_NOTIFIER_COOLDOWN_MINUTES, &v, Duration::try_minutes)?;
        }
        if let Some(v) = lookup(ENV_PROVIDER_COOLDOWN_MINUTES) {
            config.provider_notify_cooldown =
                parse_duration(ENV_PROVIDER_COOLDOWN_MINUTES, &v, Duration::try_minutes)?;
        }
        if let Some(v) = lookup(ENV_UNSUITABLE_MESSAGE_PUBLIC) {
            config.unsuitable_message_public = parse_bool(ENV_UNSUITABLE_MESSAGE_PUBLIC, &v)?;
        }
        if let Some(v) = lookup(ENV_PRIMARY_CC_ID) {
            if !v.trim().is_empty() {
                config.primary_cc_id = Some(ProviderId(parse_number(ENV_PRIMARY_CC_ID, &v)?));
            }
        }
        if let Some(v) = lookup(ENV_EXPIRATION_SHARDS) {
            let shards = parse_number(ENV_EXPIRATION_SHARDS, &v)?;
            config.expiration_shards = u32::try_from(shards).map_err(|_| {
                RoutingError::InvalidInput(format!("{} out of range: {}", ENV_EXPIRATION_SHARDS, v))
            })?;
        }
        if let Some(v) = lookup(ENV_LOCK_TTL_SECONDS) {
            config.lock_ttl = parse_duration(ENV_LOCK_TTL_SECONDS, &v, Duration::try_seconds)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECONDS) {
            config.request_timeout =
                parse_duration(ENV_REQUEST_TIMEOUT_SECONDS, &v, Duration::try_seconds)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> RoutingResult<()> {
        let positive = [
            ("expire_duration", self.expire_duration),
            ("notifier_cooldown", self.notifier_cooldown),
            ("lock_ttl", self.lock_ttl),
            ("request_timeout", self.request_timeout),
        ];
        for (name, value) in positive {
            if value <= Duration::zero() {
                return Err(RoutingError::InvalidInput(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if self.grace_period < Duration::zero() {
            return Err(RoutingError::InvalidInput(
                "grace_period cannot be negative".into(),
            ));
        }
        if self.provider_notify_cooldown < Duration::zero() {
            return Err(RoutingError::InvalidInput(
                "provider_notify_cooldown cannot be negative".into(),
            ));
        }
        if self.min_extension_step < Duration::zero() {
            return Err(RoutingError::InvalidInput(
                "min_extension_step cannot be negative".into(),
            ));
        }
        if self.expiration_shards == 0 {
            return Err(RoutingError::InvalidInput(
                "expiration_shards must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Longest sweep period that still revokes within half a grace period.
    pub fn max_sweep_period(&self) -> Duration {
        let half = self.grace_period / 2;
        if half <= Duration::zero() {
            Duration::seconds(1)
        } else {
            half
        }
    }
}

fn parse_number(key: &str, value: &str) -> RoutingResult<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| RoutingError::InvalidInput(format!("{} is not a number: {}", key, value)))
}

fn parse_duration(
    key: &str,
    value: &str,
    unit: fn(i64) -> Option<Duration>,
) -> RoutingResult<Duration> {
    unit(parse_number(key, value)?)
        .ok_or_else(|| RoutingError::InvalidInput(format!("{} out of range: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> RoutingResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RoutingError::InvalidInput(format!(
            "{} is not a boolean: {}",
            key, value
        ))),
    }
}
