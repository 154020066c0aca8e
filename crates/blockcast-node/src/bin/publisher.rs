//! Publisher endpoint: sends block transfers to the gateway and consumes
//! the receiver's status reports.
//!
//! The outer loop owns the link: it re-establishes the session after a
//! disconnect, services incoming frames, publishes a heartbeat every few
//! seconds, and reacts to the stdin control surface (`send [file]`, `qos`,
//! `quit`).

use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use blockcast_mqttsn::{Client, ClientConfig, Incoming, UdpTransport};
use blockcast_node::{Command, FsStore, NodeConfig, spawn_stdin_reader};
use blockcast_transfer::store::BlockStore;
use blockcast_transfer::{BlockSender, process_status};

/// Image extensions the `send` command looks for.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Pause before retrying a failed session bring-up.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "blockcast_publisher=info,blockcast_mqttsn=info,blockcast_transfer=info".into()
            }),
        )
        .init();

    let config = NodeConfig::from_env("blockcast_publisher")?;
    let store = FsStore::new(config.data_dir.clone()).context("cannot open block store")?;

    let transport =
        UdpTransport::open(config.local_port).context("cannot open UDP transport")?;
    let mut client = Client::new(
        transport,
        ClientConfig::new(config.gateway, config.client_id.clone()),
    );
    client.set_qos(config.default_qos)?;

    info!(gateway = %config.gateway, "publisher starting");

    let commands = spawn_stdin_reader();
    let mut sender = BlockSender::new();
    let mut last_heartbeat = Instant::now();
    let mut heartbeat_count: u32 = 0;

    loop {
        if !client.is_connected() {
            if let Err(e) = bring_up(&mut client, &config) {
                warn!("session bring-up failed: {}, retrying", e);
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        }

        client.drive();

        match client.poll(Duration::from_millis(100)) {
            Ok(Some(Incoming::Publish(publish))) => {
                let on_status = client.channel_name(publish.topic_id)
                    == Some(config.status_channel.as_str());
                if on_status {
                    process_status(&publish.payload);
                }
                if let Err(e) = client.ack_publish(&publish) {
                    warn!("failed to acknowledge publish: {}", e);
                }
            }
            Ok(Some(Incoming::Disconnect)) => continue,
            Ok(None) => {}
            Err(e) => warn!("poll failed: {}", e),
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            let qos = client.qos();
            let message = format!("blockcast publisher #{heartbeat_count} (QoS {qos})");
            heartbeat_count += 1;
            if let Err(e) = client.publish(&config.heartbeat_channel, message.as_bytes(), qos) {
                // Treat a failed heartbeat as a dead session.
                warn!("heartbeat failed: {}, reconnecting", e);
                let _ = client.disconnect();
            }
            last_heartbeat = Instant::now();
        }

        while let Ok(command) = commands.try_recv() {
            match command {
                Command::CycleQos => {
                    client.cycle_qos();
                }
                Command::Send(path) => {
                    let name = path.or_else(|| store.discover_first_matching(IMAGE_EXTENSIONS));
                    let Some(name) = name else {
                        warn!(dir = %config.data_dir.display(), "no image file to send");
                        continue;
                    };
                    let qos = client.qos();
                    info!(name = %name, qos, "block transfer requested");
                    match sender.send_file(&mut client, &store, &config.chunk_channel, &name, qos)
                    {
                        Ok(()) => info!(name = %name, "block transfer finished"),
                        Err(e) => warn!(name = %name, "block transfer failed: {}", e),
                    }
                }
                Command::Quit => {
                    let _ = client.disconnect();
                    info!("publisher shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Connect and set up every channel the publisher uses.
fn bring_up(client: &mut Client<UdpTransport>, config: &NodeConfig) -> blockcast_mqttsn::Result<()> {
    client.connect()?;
    client.register(&config.chunk_channel)?;
    client.register(&config.heartbeat_channel)?;
    // Status reports come back from the receiver on their own channel.
    client.subscribe(&config.status_channel, 1)?;
    info!("publisher session ready");
    Ok(())
}
