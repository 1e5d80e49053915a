//! Configuration system.
//!
//! Loads network configuration from JSON strings/files (file IO left to app).
//! Every field has a default so partial JSON documents are accepted.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::message::GameModeKind;

/// Protocol version, compared byte-for-byte during the handshake.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Client input send rate. Fixed by the protocol, independent of render rate.
pub const CLIENT_INPUT_RATE: u32 = 30;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface the server binds, e.g. `0.0.0.0`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Reliable (TCP) and unreliable (UDP) game port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Discovery query port (UDP).
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    /// Inactivity window before a connection is evicted.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    /// Largest unreliable datagram we are willing to send.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Authoritative simulation ticks per second.
    #[serde(default = "default_server_tick_rate")]
    pub server_tick_rate: u32,
    /// State broadcasts per second.
    #[serde(default = "default_network_update_rate")]
    pub network_update_rate: u32,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Render delay behind the newest remote sample.
    #[serde(default = "default_interpolation_delay_ms")]
    pub interpolation_delay_ms: u64,
    #[serde(default = "default_true")]
    pub client_prediction: bool,
    #[serde(default = "default_lag_compensation_window_ms")]
    pub lag_compensation_window_ms: u64,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub server_password: Option<String>,
    #[serde(default)]
    pub game_mode: GameModeKind,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default = "default_easiness")]
    pub easiness: f32,
    /// World seed. Derived from the clock when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_bind_addr() -> String {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED).to_string()
}

fn default_server_port() -> u16 {
    7777
}

fn default_query_port() -> u16 {
    7778
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_keep_alive_interval_ms() -> u64 {
    1000
}

fn default_max_packet_size() -> usize {
    1400
}

fn default_server_tick_rate() -> u32 {
    60
}

fn default_network_update_rate() -> u32 {
    20
}

fn default_max_players() -> usize {
    16
}

fn default_interpolation_delay_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_lag_compensation_window_ms() -> u64 {
    200
}

fn default_server_name() -> String {
    "Frogue Server".to_string()
}

fn default_level() -> u32 {
    1
}

fn default_easiness() -> f32 {
    1.0
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            server_port: default_server_port(),
            query_port: default_query_port(),
            connection_timeout_ms: default_connection_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            max_packet_size: default_max_packet_size(),
            server_tick_rate: default_server_tick_rate(),
            network_update_rate: default_network_update_rate(),
            max_players: default_max_players(),
            interpolation_delay_ms: default_interpolation_delay_ms(),
            client_prediction: true,
            lag_compensation_window_ms: default_lag_compensation_window_ms(),
            server_name: default_server_name(),
            server_password: None,
            game_mode: GameModeKind::default(),
            level: default_level(),
            easiness: default_easiness(),
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Seconds per simulation tick.
    pub fn server_delta(&self) -> f32 {
        1.0 / self.server_tick_rate.max(1) as f32
    }

    /// Seconds between state broadcasts.
    pub fn network_delta(&self) -> f32 {
        1.0 / self.network_update_rate.max(1) as f32
    }

    /// Seconds between client input sends.
    pub fn input_delta(&self) -> f32 {
        1.0 / CLIENT_INPUT_RATE as f32
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn interpolation_delay(&self) -> f32 {
        self.interpolation_delay_ms as f32 / 1000.0
    }

    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.bind_addr.parse().context("parse bind_addr")?;
        Ok(SocketAddr::new(ip, self.server_port))
    }

    pub fn query_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.bind_addr.parse().context("parse bind_addr")?;
        Ok(SocketAddr::new(ip, self.query_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = NetworkConfig::from_json_str(r#"{ "server_port": 9000, "game_mode": "Deathmatch" }"#)
            .unwrap();
        assert_eq!(cfg.server_port, 9000);
        assert_eq!(cfg.query_port, 7778);
        assert_eq!(cfg.game_mode, GameModeKind::Deathmatch);
        assert_eq!(cfg.server_name, "Frogue Server");
        assert!(cfg.client_prediction);
    }

    #[test]
    fn tick_and_network_rates_are_independent() {
        let cfg = NetworkConfig::default();
        assert!((cfg.server_delta() - 1.0 / 60.0).abs() < 1e-6);
        assert!((cfg.network_delta() - 0.05).abs() < 1e-6);
        assert!((cfg.input_delta() - 1.0 / 30.0).abs() < 1e-6);
    }
}
