use std::fmt;
use std::time::Duration;

/// Port the simulator listens on when the host string names none.
pub const DEFAULT_PORT: u16 = 42008;

/// Simulator units per scene unit.
pub const DEFAULT_COORDINATE_SCALE: f64 = 32.0;

/// Bridge configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Host string as typed by the user, with or without a port
    pub host: String,
    pub default_port: u16,
    /// Simulator units per scene unit
    pub coordinate_scale: f64,
    /// Minimum time between two scene position/heading writes
    pub render_interval: Duration,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    pub max_players: usize,
    /// Buffered events per subscriber before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            default_port: DEFAULT_PORT,
            coordinate_scale: DEFAULT_COORDINATE_SCALE,
            render_interval: Duration::from_millis(50), // ~20 Hz
            reconnect_delay: Duration::from_secs(1),
            max_players: crate::protocol::MAX_PLAYERS,
            event_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.coordinate_scale.is_finite() || self.coordinate_scale <= 0.0 {
            return Err("coordinate_scale must be finite and > 0".to_string());
        }
        if self.reconnect_delay.is_zero() {
            return Err("reconnect_delay must be > 0".to_string());
        }
        if self.max_players == 0 || self.max_players > crate::protocol::MAX_PLAYERS {
            return Err(format!(
                "max_players must be in 1..={}",
                crate::protocol::MAX_PLAYERS
            ));
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::resolve(&self.host, self.default_port)
    }
}

/// WebSocket address of the simulator, always with an explicit port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Best-effort resolution of a user-typed host string. Never fails: a missing
    /// or unparsable port falls back to `default_port`.
    ///
    /// Accepts `host`, `host:port` and `ws://host[:port][/path]`.
    pub fn resolve(input: &str, default_port: u16) -> Self {
        let input = input.trim();

        if input.contains("://") {
            if let Ok(url) = url::Url::parse(input) {
                if let Some(host) = url.host_str() {
                    // `Url::port` hides a port equal to the scheme default, so look at the text.
                    let port = if has_explicit_port(input) {
                        url.port_or_known_default().unwrap_or(default_port)
                    } else {
                        default_port
                    };
                    return Self {
                        host: host.to_string(),
                        port,
                    };
                }
            }
        }

        match input.rsplit_once(':') {
            Some((host, port)) => Self {
                host: host.to_string(),
                port: port.trim().parse().unwrap_or(default_port),
            },
            None => Self {
                host: input.to_string(),
                port: default_port,
            },
        }
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

/// True when the authority of `scheme://authority/path` carries a `:port`.
fn has_explicit_port(input: &str) -> bool {
    let rest = input.split_once("://").map_or(input, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    // Skip the colons inside a bracketed IPv6 literal.
    let after_host = host_port.rsplit_once(']').map_or(host_port, |(_, tail)| tail);
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty())
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bridge_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint().url(), "ws://localhost:42008");
    }

    #[test]
    fn zero_scale_invalid() {
        let config = BridgeConfig {
            coordinate_scale: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn too_many_players_invalid() {
        let config = BridgeConfig {
            max_players: 65,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bare_host_gets_default_port() {
        assert_eq!(
            Endpoint::resolve("10.0.0.5", DEFAULT_PORT).url(),
            "ws://10.0.0.5:42008"
        );
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(
            Endpoint::resolve("10.0.0.5:9000", DEFAULT_PORT).url(),
            "ws://10.0.0.5:9000"
        );
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let ep = Endpoint::resolve("example.com:notaport", DEFAULT_PORT);
        assert_eq!(ep.host, "example.com");
        assert_eq!(ep.port, DEFAULT_PORT);
    }

    #[test]
    fn ws_url_input_is_accepted() {
        assert_eq!(
            Endpoint::resolve("ws://sim.local:4000/", DEFAULT_PORT).url(),
            "ws://sim.local:4000"
        );
        assert_eq!(
            Endpoint::resolve(" ws://sim.local ", DEFAULT_PORT).url(),
            "ws://sim.local:42008"
        );
    }

    #[test]
    fn ws_url_keeps_port_equal_to_scheme_default() {
        assert_eq!(
            Endpoint::resolve("ws://sim.local:80", DEFAULT_PORT).url(),
            "ws://sim.local:80"
        );
        assert_eq!(
            Endpoint::resolve("wss://sim.local:443/feed", DEFAULT_PORT).port,
            443
        );
        assert_eq!(
            Endpoint::resolve("ws://[::1]:80", DEFAULT_PORT).url(),
            "ws://[::1]:80"
        );
        assert_eq!(Endpoint::resolve("ws://[::1]", DEFAULT_PORT).port, DEFAULT_PORT);
        assert_eq!(
            Endpoint::resolve("ws://sim.local:/", DEFAULT_PORT).port,
            DEFAULT_PORT
        );
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(
            Endpoint::resolve("  localhost ", DEFAULT_PORT).url(),
            "ws://localhost:42008"
        );
    }
}
