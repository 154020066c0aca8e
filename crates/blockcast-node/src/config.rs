//! Environment-driven configuration for the endpoint binaries.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Gateway the MQTT-SN session talks to.
    pub gateway: SocketAddr,
    /// Local UDP port, 0 = ephemeral.
    pub local_port: u16,
    pub client_id: String,
    /// QoS level used until the control surface cycles it.
    pub default_qos: u8,
    pub chunk_channel: String,
    pub status_channel: String,
    pub event_channel: String,
    pub heartbeat_channel: String,
    /// Outbound payloads are discovered here; received blocks land in a
    /// `received/` subdirectory.
    pub data_dir: PathBuf,
    /// Receive through the threaded single-slot-mailbox transport.
    pub threaded_rx: bool,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

impl NodeConfig {
    pub fn from_env(default_client_id: &str) -> anyhow::Result<Self> {
        let gateway: SocketAddr = var_or("BLOCKCAST_GATEWAY_ADDR", "127.0.0.1:1884")
            .parse()
            .context("BLOCKCAST_GATEWAY_ADDR must be ip:port")?;
        let local_port: u16 = var_or("BLOCKCAST_LOCAL_PORT", "0")
            .parse()
            .context("BLOCKCAST_LOCAL_PORT must be a port number")?;
        let default_qos: u8 = var_or("BLOCKCAST_QOS", "0")
            .parse()
            .context("BLOCKCAST_QOS must be 0, 1 or 2")?;
        anyhow::ensure!(default_qos <= 2, "BLOCKCAST_QOS must be 0, 1 or 2");

        Ok(Self {
            gateway,
            local_port,
            client_id: var_or("BLOCKCAST_CLIENT_ID", default_client_id),
            default_qos,
            chunk_channel: var_or("BLOCKCAST_CHUNK_CHANNEL", "blocks/chunks"),
            status_channel: var_or("BLOCKCAST_STATUS_CHANNEL", "blocks/status"),
            event_channel: var_or("BLOCKCAST_EVENT_CHANNEL", "blocks/events"),
            heartbeat_channel: var_or("BLOCKCAST_HEARTBEAT_CHANNEL", "blocks/heartbeat"),
            data_dir: var_or("BLOCKCAST_DATA_DIR", "./data").into(),
            threaded_rx: var_or("BLOCKCAST_THREADED_RX", "0") == "1",
        })
    }
}
