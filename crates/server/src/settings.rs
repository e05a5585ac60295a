//! Bridge configuration from environment variables.
//!
//! Every knob has a default suitable for local development; the only choice
//! with no default fallback is the transport mode, which is listen mode
//! unless `BRIDGE_ENDPOINT_URL` is set.

use std::time::Duration;

/// How the bridge reaches its automation clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMode {
    /// Accept inbound WebSocket connections on one or more ports.
    Listen { host: String, ports: Vec<u16> },
    /// Dial out to a remote automation hub and serve that single link.
    Connect { endpoint_url: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: BridgeMode,
    /// Shared secret required from clients; `None` disables the check.
    pub capability_token: Option<String>,
    pub heartbeat_interval_ms: u64,
    /// A connection silent for longer than this is closed.
    pub heartbeat_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Cadence of the reaper and heartbeat sweeps.
    pub tick_interval: Duration,
    /// In-flight entries older than this are force-completed.
    pub stale_timeout: Duration,
    pub cache_ttl: Duration,
    pub listen_backlog: u32,
    /// Pause between accept retries when the listener hits transient errors.
    pub accept_sleep: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any name->value source (tests pass a closure).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = match lookup("BRIDGE_ENDPOINT_URL").filter(|s| !s.trim().is_empty()) {
            Some(endpoint_url) => BridgeMode::Connect { endpoint_url },
            None => {
                let host = lookup("BRIDGE_LISTEN_HOST").unwrap_or_else(|| "127.0.0.1".into());
                let ports = parse_ports(
                    &lookup("BRIDGE_LISTEN_PORTS").unwrap_or_else(|| "8090".into()),
                );
                BridgeMode::Listen { host, ports }
            }
        };

        Self {
            mode,
            capability_token: lookup("BRIDGE_CAPABILITY_TOKEN").filter(|s| !s.is_empty()),
            heartbeat_interval_ms: parse_or(&lookup("BRIDGE_HEARTBEAT_INTERVAL_MS"), 10_000),
            heartbeat_timeout: Duration::from_secs(parse_or(
                &lookup("BRIDGE_HEARTBEAT_TIMEOUT_SECS"),
                30,
            )),
            reconnect_delay: Duration::from_secs(parse_or(
                &lookup("BRIDGE_AUTO_RECONNECT_DELAY_SECS"),
                5,
            )),
            tick_interval: Duration::from_secs(parse_or(&lookup("BRIDGE_TICK_INTERVAL_SECS"), 1)),
            stale_timeout: Duration::from_secs(parse_or(&lookup("BRIDGE_STALE_TIMEOUT_SECS"), 30)),
            cache_ttl: Duration::from_secs(parse_or(&lookup("BRIDGE_CACHE_TTL_SECS"), 10)),
            listen_backlog: parse_or(&lookup("BRIDGE_LISTEN_BACKLOG"), 10),
            accept_sleep: Duration::from_secs_f64(
                parse_or(&lookup("BRIDGE_ACCEPT_SLEEP_SECS"), 0.01_f64).max(0.0),
            ),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: &Option<String>, default: T) -> T {
    value
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated port list, skipping anything unparseable.
fn parse_ports(raw: &str) -> Vec<u16> {
    let ports: Vec<u16> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if ports.is_empty() {
        vec![8090]
    } else {
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_to_listen_mode() {
        let settings = settings_from(&[]);
        assert_eq!(
            settings.mode,
            BridgeMode::Listen {
                host: "127.0.0.1".into(),
                ports: vec![8090],
            }
        );
        assert_eq!(settings.capability_token, None);
        assert_eq!(settings.heartbeat_interval_ms, 10_000);
        assert_eq!(settings.stale_timeout, Duration::from_secs(30));
        assert_eq!(settings.cache_ttl, Duration::from_secs(10));
    }

    #[test]
    fn endpoint_url_selects_connect_mode() {
        let settings = settings_from(&[("BRIDGE_ENDPOINT_URL", "ws://hub:9000/bridge")]);
        assert_eq!(
            settings.mode,
            BridgeMode::Connect {
                endpoint_url: "ws://hub:9000/bridge".into(),
            }
        );
    }

    #[test]
    fn multiple_ports_are_parsed() {
        let settings = settings_from(&[("BRIDGE_LISTEN_PORTS", "8090, 8091,8092")]);
        match settings.mode {
            BridgeMode::Listen { ports, .. } => assert_eq!(ports, vec![8090, 8091, 8092]),
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[test]
    fn garbage_ports_fall_back_to_default() {
        let settings = settings_from(&[("BRIDGE_LISTEN_PORTS", "banana, ")]);
        match settings.mode {
            BridgeMode::Listen { ports, .. } => assert_eq!(ports, vec![8090]),
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[test]
    fn empty_token_means_no_auth() {
        let settings = settings_from(&[("BRIDGE_CAPABILITY_TOKEN", "")]);
        assert_eq!(settings.capability_token, None);

        let settings = settings_from(&[("BRIDGE_CAPABILITY_TOKEN", "secret")]);
        assert_eq!(settings.capability_token.as_deref(), Some("secret"));
    }

    #[test]
    fn durations_come_from_env() {
        let settings = settings_from(&[
            ("BRIDGE_AUTO_RECONNECT_DELAY_SECS", "2"),
            ("BRIDGE_STALE_TIMEOUT_SECS", "7"),
            ("BRIDGE_HEARTBEAT_TIMEOUT_SECS", "9"),
        ]);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(2));
        assert_eq!(settings.stale_timeout, Duration::from_secs(7));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(9));
    }
}
