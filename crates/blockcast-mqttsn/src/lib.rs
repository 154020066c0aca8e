/// Blockcast MQTT-SN delivery engine.
///
/// Provides message delivery over a lossy datagram link with:
/// - MQTT-SN 1.2 wire codec for the session and publish frames
/// - Three acknowledgment disciplines: QoS 0 (none), QoS 1 (PUBACK),
///   QoS 2 (PUBREC/PUBREL/PUBCOMP), each with bounded retry
/// - Synchronous one-delivery-at-a-time engine with an explicit context
/// - Pluggable `Transport` collaborator with an explicit `drive` hook
/// - Optional threaded receive path through a bounded single-slot mailbox

pub mod client;
pub mod codec;
pub mod error;
pub mod mailbox;
pub mod threaded;
pub mod transport;

// Re-export key types for convenience.
pub use client::{Client, ClientConfig, Incoming};
pub use codec::{MAX_FRAME, Publish};
pub use error::{DeliveryError, Result};
pub use mailbox::Mailbox;
pub use threaded::ThreadedUdpTransport;
pub use transport::{Transport, UdpTransport};
