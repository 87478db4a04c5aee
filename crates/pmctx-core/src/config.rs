//! Client-side tunables.
//!
//! Contexts take a snapshot of the process-wide [`ClientConfig`] when they
//! are created, so changing it later only affects new contexts.

use std::sync::{LazyLock, RwLock};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 44321;
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long to wait for a collector reply.
    pub request_timeout: Duration,
    /// How long to wait for a TCP connect.
    pub connect_timeout: Duration,
    /// Delay before each successive reconnect attempt; the last entry repeats.
    pub reconnect_backoff: Vec<Duration>,
    pub default_port: u16,
    /// Incoming frames declaring more than this are rejected unread.
    pub max_frame_len: usize,
    /// Use the nanosecond-timestamp fetch frames.
    pub hires_fetch: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            reconnect_backoff: [5, 10, 20, 40, 80]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            default_port: DEFAULT_PORT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            hires_fetch: true,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PMCTX_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("PMCTX_REQUEST_TIMEOUT") {
            match parse_seconds(&raw) {
                Some(d) => config.request_timeout = d,
                None => warn!(value = %raw, "ignoring bad PMCTX_REQUEST_TIMEOUT"),
            }
        }
        if let Some(raw) = lookup("PMCTX_CONNECT_TIMEOUT") {
            match parse_seconds(&raw) {
                Some(d) => config.connect_timeout = d,
                None => warn!(value = %raw, "ignoring bad PMCTX_CONNECT_TIMEOUT"),
            }
        }
        if let Some(raw) = lookup("PMCTX_RECONNECT_TIMEOUT") {
            match parse_backoff(&raw) {
                Some(list) => config.reconnect_backoff = list,
                None => warn!(value = %raw, "ignoring bad PMCTX_RECONNECT_TIMEOUT"),
            }
        }
        if let Some(raw) = lookup("PMCTX_PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) if port > 0 => config.default_port = port,
                _ => warn!(value = %raw, "ignoring bad PMCTX_PORT"),
            }
        }

        config
    }

    /// Delay to wait before reconnect attempt number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        match self.reconnect_backoff.last() {
            None => Duration::ZERO,
            Some(last) => self
                .reconnect_backoff
                .get(attempt)
                .copied()
                .unwrap_or(*last),
        }
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

fn parse_backoff(raw: &str) -> Option<Vec<Duration>> {
    let mut list = Vec::new();
    for part in raw.split(',') {
        let secs: u64 = part.trim().parse().ok()?;
        list.push(Duration::from_secs(secs));
    }
    if list.is_empty() { None } else { Some(list) }
}

static CONFIG: LazyLock<RwLock<ClientConfig>> =
    LazyLock::new(|| RwLock::new(ClientConfig::from_env()));

/// Replaces the process-wide configuration used by new contexts.
pub fn set_client_config(config: ClientConfig) {
    match CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

pub fn client_config() -> ClientConfig {
    match CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff_for(0), Duration::from_secs(5));
        assert_eq!(config.backoff_for(4), Duration::from_secs(80));
        assert_eq!(config.backoff_for(99), Duration::from_secs(80));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PMCTX_REQUEST_TIMEOUT", "2.5"),
            ("PMCTX_RECONNECT_TIMEOUT", "1, 2,3"),
            ("PMCTX_PORT", "4000"),
        ]));
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(
            config.reconnect_backoff,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(config.default_port, 4000);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PMCTX_REQUEST_TIMEOUT", "-1"),
            ("PMCTX_CONNECT_TIMEOUT", "soon"),
            ("PMCTX_RECONNECT_TIMEOUT", "5,x"),
            ("PMCTX_PORT", "0"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
