//! Configuration types for the signaling channel, peer mesh and relay

use crate::signaling::backoff::BackoffPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for a mesh participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMeshConfig {
    /// Relay WebSocket URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum remote peers in the mesh (default: 10, max: 10)
    pub max_peers: u32,

    /// Reconnect, retry and grace-period timings
    pub recovery: RecoveryOptions,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Recovery timings shared by the signaling channel and the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOptions {
    /// Delay before the first reconnect in milliseconds (default: 1000)
    pub backoff_initial_ms: u64,

    /// Upper bound for any reconnect delay in milliseconds (default: 30000)
    pub backoff_max_ms: u64,

    /// Ceiling for the reconnect attempt counter (default: 6)
    pub backoff_attempt_ceiling: u32,

    /// Attempts after which the relay is reported unreachable (default: 6)
    pub unreachable_after_attempts: u32,

    /// Delay before the single automatic peer retry in milliseconds (default: 1000)
    pub retry_delay_ms: u64,

    /// How long a disconnected peer may take to recover in milliseconds (default: 30000)
    pub grace_period_ms: u64,

    /// Automatic re-offers per failure incident; 0 disables retrying (default: 1)
    pub max_peer_retries: u32,
}

impl Default for VoiceMeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            max_peers: 10,
            recovery: RecoveryOptions::default(),
        }
    }
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_attempt_ceiling: 6,
            unreachable_after_attempts: 6,
            retry_delay_ms: 1000,
            grace_period_ms: 30000,
            max_peer_retries: 1,
        }
    }
}

impl RecoveryOptions {
    /// Backoff policy for the signaling channel
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.backoff_initial_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            attempt_ceiling: self.backoff_attempt_ceiling,
        }
    }

    /// Delay before a failed peer link is recreated
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Grace period granted to a disconnected peer link
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl VoiceMeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `max_peers` is not in range 1-10
    /// - `signaling_url` is not a WebSocket URL
    /// - any recovery timing is zero or the backoff bounds are inverted
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN url must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        let r = &self.recovery;
        if r.backoff_initial_ms == 0 || r.retry_delay_ms == 0 || r.grace_period_ms == 0 {
            return Err(Error::InvalidConfig(
                "recovery timings must be non-zero".to_string(),
            ));
        }
        if r.backoff_initial_ms > r.backoff_max_ms {
            return Err(Error::InvalidConfig(format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                r.backoff_initial_ms, r.backoff_max_ms
            )));
        }
        if r.backoff_attempt_ceiling == 0 || r.unreachable_after_attempts == 0 {
            return Err(Error::InvalidConfig(
                "attempt ceilings must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Preset for participants on the same local network
    ///
    /// Links either come up quickly or not at all, so recovery is tighter.
    ///
    /// # Example
    ///
    /// ```
    /// use voicemesh_webrtc::config::VoiceMeshConfig;
    ///
    /// let config = VoiceMeshConfig::lan_preset("ws://192.168.1.10:8080/ws");
    /// assert_eq!(config.recovery.grace_period_ms, 10000);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn lan_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            recovery: RecoveryOptions {
                retry_delay_ms: 500,
                grace_period_ms: 10000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Preset for flaky mobile or Wi-Fi networks
    ///
    /// Disconnected links get a longer grace period and the relay is
    /// reported unreachable later.
    pub fn unstable_network_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            recovery: RecoveryOptions {
                retry_delay_ms: 2000,
                grace_period_ms: 60000,
                unreachable_after_attempts: 10,
                max_peer_retries: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Add TURN servers to the configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the maximum number of remote peers
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Load configuration from `VOICEMESH_*` environment variables
    ///
    /// - `VOICEMESH_SIGNALING_URL`: relay URL (default: `ws://localhost:8080/ws`)
    /// - `VOICEMESH_STUN_SERVERS`: comma-separated STUN URLs
    /// - `VOICEMESH_TURN_SERVERS`: comma-separated `turn:host:port:username:credential`
    /// - `VOICEMESH_MAX_PEERS`: maximum remote peers
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("VOICEMESH_SIGNALING_URL") {
            config.signaling_url = url;
        }

        if let Ok(list) = std::env::var("VOICEMESH_STUN_SERVERS") {
            config.stun_servers = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(list) = std::env::var("VOICEMESH_TURN_SERVERS") {
            config.turn_servers = parse_turn_servers(&list);
        }

        if let Some(max_peers) = std::env::var("VOICEMESH_MAX_PEERS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_peers = max_peers;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Parse `turn:host:port:username:credential` entries separated by commas
pub fn parse_turn_servers(list: &str) -> Vec<TurnServerConfig> {
    list.split(',')
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.trim().split(':').collect();
            if parts.len() >= 4 {
                Some(TurnServerConfig {
                    url: format!("{}:{}:{}", parts[0], parts[1], parts[2]),
                    username: parts[3].to_string(),
                    credential: parts.get(4).copied().unwrap_or_default().to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Configuration for the trusted relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// Sliding window for the per-IP connection limit in seconds (default: 10)
    pub rate_window_secs: u64,

    /// Connections allowed per IP within the window (default: 15)
    pub rate_max_connections: usize,

    /// Frames buffered per client before new frames are dropped (default: 16)
    pub send_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            rate_window_secs: 10,
            rate_max_connections: 15,
            send_queue: 16,
        }
    }
}

impl RelayConfig {
    /// Validate relay parameters
    pub fn validate(&self) -> Result<()> {
        if self.rate_window_secs == 0 || self.rate_max_connections == 0 {
            return Err(Error::InvalidConfig(
                "rate limiter window and max must be positive".to_string(),
            ));
        }
        if self.send_queue == 0 {
            return Err(Error::InvalidConfig(
                "send_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Rate limiter window as a Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Load relay configuration from the environment
    ///
    /// - `VOICEMESH_RELAY_ADDR`: listen address (default: `0.0.0.0:8080`)
    /// - `WEBRTC_CONN_SEC`: rate limiter window in seconds
    /// - `WEBRTC_CONN_MAX`: connections per IP per window
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("VOICEMESH_RELAY_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("Invalid relay address {}: {}", addr, e)))?;
        }
        if let Some(secs) = std::env::var("WEBRTC_CONN_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            config.rate_window_secs = secs;
        }
        if let Some(max) = std::env::var("WEBRTC_CONN_MAX")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            config.rate_max_connections = max;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = VoiceMeshConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_recovery_timings() {
        let r = RecoveryOptions::default();
        assert_eq!(r.retry_delay(), Duration::from_secs(1));
        assert_eq!(r.grace_period(), Duration::from_secs(30));
        assert_eq!(r.backoff_policy().attempt_ceiling, 6);
        assert_eq!(r.max_peer_retries, 1);
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let config = VoiceMeshConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_max_peers_fails() {
        assert!(VoiceMeshConfig::default().with_max_peers(0).validate().is_err());
        assert!(VoiceMeshConfig::default().with_max_peers(11).validate().is_err());
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let config = VoiceMeshConfig {
            signaling_url: "http://localhost:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_backoff_bounds_fail() {
        let mut config = VoiceMeshConfig::default();
        config.recovery.backoff_initial_ms = 60000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(VoiceMeshConfig::lan_preset("ws://h/ws").validate().is_ok());
        let unstable = VoiceMeshConfig::unstable_network_preset("wss://h/ws");
        assert!(unstable.validate().is_ok());
        assert_eq!(unstable.recovery.grace_period_ms, 60000);
        assert_eq!(unstable.recovery.max_peer_retries, 2);
    }

    #[test]
    fn test_parse_turn_servers() {
        let turn = parse_turn_servers("turn:example.com:3478:alice:secret, bogus");
        assert_eq!(turn.len(), 1);
        assert_eq!(turn[0].url, "turn:example.com:3478");
        assert_eq!(turn[0].username, "alice");
        assert_eq!(turn[0].credential, "secret");

        let config = VoiceMeshConfig::default().with_turn_servers(turn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = VoiceMeshConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: VoiceMeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signaling_url, config.signaling_url);
        assert_eq!(back.recovery, config.recovery);
    }

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_window(), Duration::from_secs(10));
        assert_eq!(config.rate_max_connections, 15);
    }
}
