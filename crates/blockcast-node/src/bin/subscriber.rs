//! Subscriber endpoint: receives block transfers and reports back.
//!
//! Chunk-channel publishes feed the reassembler; each one is acknowledged
//! per its QoS only after processing. Finished blocks land in the store's
//! `received/` directory, completion and missing-chunk reports go back out
//! through the status outlet, and the timeout sweep runs every pass.

use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};

use blockcast_mqttsn::{
    Client, ClientConfig, Incoming, ThreadedUdpTransport, Transport, UdpTransport,
};
use blockcast_node::{FsStore, NodeConfig};
use blockcast_transfer::{Reassembler, StatusReporter};

/// Pause before retrying a failed session bring-up.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "blockcast_subscriber=info,blockcast_mqttsn=info,blockcast_transfer=info".into()
            }),
        )
        .init();

    let config = NodeConfig::from_env("blockcast_subscriber")?;
    let client_config = ClientConfig::new(config.gateway, config.client_id.clone());

    info!(
        gateway = %config.gateway,
        threaded_rx = config.threaded_rx,
        "subscriber starting"
    );

    if config.threaded_rx {
        let transport =
            ThreadedUdpTransport::open(config.local_port).context("cannot open UDP transport")?;
        run(Client::new(transport, client_config), config)
    } else {
        let transport =
            UdpTransport::open(config.local_port).context("cannot open UDP transport")?;
        run(Client::new(transport, client_config), config)
    }
}

fn run<T: Transport>(mut client: Client<T>, config: NodeConfig) -> anyhow::Result<()> {
    let store = FsStore::new(config.data_dir.clone()).context("cannot open block store")?;
    let mut reassembler = Reassembler::new();

    loop {
        if !client.is_connected() {
            if let Err(e) = bring_up(&mut client, &config) {
                warn!("session bring-up failed: {}, retrying", e);
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        }

        match client.poll(Duration::from_millis(100)) {
            Ok(Some(Incoming::Publish(publish))) => {
                let channel = client.channel_name(publish.topic_id).map(str::to_string);
                match channel.as_deref() {
                    Some(channel) if channel == config.chunk_channel => {
                        // Service the link around the processing and the
                        // (potentially slow) store write.
                        client.drive();
                        {
                            let mut outlet = StatusReporter::new(
                                &mut client,
                                &config.status_channel,
                                &config.event_channel,
                            );
                            reassembler.on_chunk(&publish.payload, &store, &mut outlet);
                        }
                        client.drive();
                    }
                    Some(channel) if channel == config.heartbeat_channel => {
                        info!(
                            payload = %String::from_utf8_lossy(&publish.payload),
                            "heartbeat received"
                        );
                    }
                    _ => {
                        debug!(topic_id = publish.topic_id, "publish on unmatched topic");
                    }
                }
                // Acknowledge only after the payload has been processed.
                if let Err(e) = client.ack_publish(&publish) {
                    warn!("failed to acknowledge publish: {}", e);
                }
            }
            Ok(Some(Incoming::Disconnect)) => continue,
            Ok(None) => {}
            Err(e) => warn!("poll failed: {}", e),
        }

        reassembler.check_timeout(Instant::now());
    }
}

/// Connect, subscribe to inbound channels, register the report channels.
fn bring_up<T: Transport>(
    client: &mut Client<T>,
    config: &NodeConfig,
) -> blockcast_mqttsn::Result<()> {
    client.connect()?;
    client.subscribe(&config.chunk_channel, 2)?;
    client.subscribe(&config.heartbeat_channel, 2)?;
    client.register(&config.status_channel)?;
    client.register(&config.event_channel)?;
    info!(
        chunks = %config.chunk_channel,
        status = %config.status_channel,
        "subscriber session ready"
    );
    Ok(())
}
