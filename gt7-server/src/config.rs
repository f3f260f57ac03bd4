//! Server configuration
//!
//! Layered: built-in defaults, then an optional `gt7-server.toml`, then
//! `GT7_*` environment variables (e.g. `GT7_PORT=9000`).

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Config file looked up in the working directory (extension optional)
pub const DEFAULT_CONFIG_FILE: &str = "gt7-server";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Local port the console streams to
    pub udp_recv_port: u16,
    /// Console port receiving heartbeats
    pub udp_send_port: u16,
    /// Re-send the heartbeat after this many packets
    pub heartbeat_packets: u32,
    pub socket_timeout_secs: u64,
    pub ws_heartbeat_secs: u64,
    /// Directory holding `cars.csv` and `maker.csv`
    pub car_data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            udp_recv_port: 33740,
            udp_send_port: 33739,
            heartbeat_packets: 100,
            socket_timeout_secs: 10,
            ws_heartbeat_secs: 30,
            car_data_dir: "data".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from defaults, the optional config file and the environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(file: &str) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", defaults.port as i64)?
            .set_default("udp_recv_port", defaults.udp_recv_port as i64)?
            .set_default("udp_send_port", defaults.udp_send_port as i64)?
            .set_default("heartbeat_packets", defaults.heartbeat_packets as i64)?
            .set_default("socket_timeout_secs", defaults.socket_timeout_secs as i64)?
            .set_default("ws_heartbeat_secs", defaults.ws_heartbeat_secs as i64)?
            .set_default("car_data_dir", defaults.car_data_dir)?
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("GT7").try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn ws_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_secs)
    }
}
