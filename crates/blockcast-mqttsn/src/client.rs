//! MQTT-SN client: session bring-up and the per-message delivery engine.
//!
//! The client is an explicit context object — gateway address, channel
//! registry, message-id counter and the currently configured QoS all live
//! here and are threaded through every call. One delivery is outstanding at
//! a time: `publish` blocks the calling context until the acknowledgment
//! discipline for the requested QoS level has run to completion or the
//! attempt budget is spent.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{
    self, MAX_FRAME, MSG_CONNACK, MSG_DISCONNECT, MSG_PINGREQ, MSG_PUBACK, MSG_PUBCOMP,
    MSG_PUBLISH, MSG_PUBREC, MSG_PUBREL, MSG_REGACK, MSG_SUBACK, Publish, RC_ACCEPTED,
};
use crate::error::{DeliveryError, Result};
use crate::transport::Transport;

/// Engine tuning. Defaults are the production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway: SocketAddr,
    pub client_id: String,
    /// Keepalive duration advertised in CONNECT.
    pub keepalive_secs: u16,
    /// How long a QoS 1 publish waits for its PUBACK.
    pub ack_timeout: Duration,
    /// Session acknowledgments (CONNACK/REGACK/SUBACK) and each QoS 2 phase.
    pub handshake_timeout: Duration,
    /// Pause between delivery attempts.
    pub retry_backoff: Duration,
    /// Total attempts for a QoS 1/2 publish.
    pub max_attempts: u32,
}

impl ClientConfig {
    pub fn new(gateway: SocketAddr, client_id: impl Into<String>) -> Self {
        Self {
            gateway,
            client_id: client_id.into(),
            keepalive_secs: 60,
            ack_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(100),
            max_attempts: 3,
        }
    }
}

/// Frames surfaced to the caller by `poll`.
#[derive(Debug)]
pub enum Incoming {
    Publish(Publish),
    Disconnect,
}

pub struct Client<T: Transport> {
    transport: T,
    config: ClientConfig,
    connected: bool,
    next_msg_id: u16,
    qos: u8,
    channels: Vec<(String, u16)>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            connected: false,
            next_msg_id: 1,
            qos: 0,
            channels: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Currently configured QoS level for routine publishes.
    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn set_qos(&mut self, qos: u8) -> Result<()> {
        if qos > 2 {
            return Err(DeliveryError::InvalidQos(qos));
        }
        self.qos = qos;
        info!(qos, "QoS level set");
        Ok(())
    }

    /// Cycle the configured level 0 -> 1 -> 2 -> 0, returning the new value.
    pub fn cycle_qos(&mut self) -> u8 {
        self.qos = (self.qos + 1) % 3;
        info!(qos = self.qos, "QoS level cycled");
        self.qos
    }

    /// Gateway-assigned topic id for a registered/subscribed channel.
    pub fn topic_id(&self, channel: &str) -> Option<u16> {
        self.channels
            .iter()
            .find(|(name, _)| name == channel)
            .map(|&(_, id)| id)
    }

    /// Reverse lookup for incoming dispatch.
    pub fn channel_name(&self, topic_id: u16) -> Option<&str> {
        self.channels
            .iter()
            .find(|&&(_, id)| id == topic_id)
            .map(|(name, _)| name.as_str())
    }

    /// Service the underlying link.
    pub fn drive(&mut self) {
        self.transport.drive();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Establish the session: CONNECT, wait for CONNACK.
    pub fn connect(&mut self) -> Result<()> {
        let frame = codec::encode_connect(&self.config.client_id, self.config.keepalive_secs, true);
        self.transport.send(self.config.gateway, &frame)?;
        debug!(frame = %hex::encode(&frame), "CONNECT sent");

        let body = self.wait_ack("CONNACK", self.config.handshake_timeout, |msg_type, _| {
            msg_type == MSG_CONNACK
        })?;
        let rc = codec::decode_connack(&body)?;
        if rc != RC_ACCEPTED {
            return Err(DeliveryError::Rejected {
                kind: "CONNECT",
                code: rc,
            });
        }
        self.connected = true;
        info!(client_id = %self.config.client_id, gateway = %self.config.gateway, "session established");
        Ok(())
    }

    /// Register a publish channel; the gateway assigns its topic id.
    pub fn register(&mut self, channel: &str) -> Result<u16> {
        self.ensure_connected()?;
        let msg_id = self.next_msg_id;
        let frame = codec::encode_register(msg_id, channel);
        self.transport.send(self.config.gateway, &frame)?;

        let body = self.wait_ack("REGACK", self.config.handshake_timeout, move |msg_type, body| {
            msg_type == MSG_REGACK
                && codec::decode_regack(body)
                    .map(|r| r.msg_id == msg_id)
                    .unwrap_or(false)
        })?;
        let regack = codec::decode_regack(&body)?;
        if regack.return_code != RC_ACCEPTED {
            return Err(DeliveryError::Rejected {
                kind: "REGISTER",
                code: regack.return_code,
            });
        }
        self.advance_msg_id();
        self.remember_channel(channel, regack.topic_id);
        info!(channel, topic_id = regack.topic_id, "channel registered");
        Ok(regack.topic_id)
    }

    /// Subscribe to a channel. Must complete before incoming publishes can
    /// be matched back to the channel name.
    pub fn subscribe(&mut self, channel: &str, qos: u8) -> Result<u16> {
        self.ensure_connected()?;
        if qos > 2 {
            return Err(DeliveryError::InvalidQos(qos));
        }
        let msg_id = self.next_msg_id;
        let frame = codec::encode_subscribe(msg_id, channel, qos);
        self.transport.send(self.config.gateway, &frame)?;

        let body = self.wait_ack("SUBACK", self.config.handshake_timeout, move |msg_type, body| {
            msg_type == MSG_SUBACK
                && codec::decode_suback(body)
                    .map(|s| s.msg_id == msg_id)
                    .unwrap_or(false)
        })?;
        let suback = codec::decode_suback(&body)?;
        if suback.return_code != RC_ACCEPTED {
            return Err(DeliveryError::Rejected {
                kind: "SUBSCRIBE",
                code: suback.return_code,
            });
        }
        self.advance_msg_id();
        self.remember_channel(channel, suback.topic_id);
        info!(
            channel,
            topic_id = suback.topic_id,
            granted_qos = suback.granted_qos,
            "subscribed"
        );
        Ok(suback.topic_id)
    }

    /// Publish `payload` on a registered channel at the requested QoS.
    pub fn publish(&mut self, channel: &str, payload: &[u8], qos: u8) -> Result<()> {
        self.ensure_connected()?;
        let topic_id = self
            .topic_id(channel)
            .ok_or_else(|| DeliveryError::UnknownChannel(channel.to_string()))?;
        match qos {
            0 => self.publish_qos0(topic_id, payload),
            1 => self.publish_qos1(topic_id, payload),
            2 => self.publish_qos2(topic_id, payload),
            other => Err(DeliveryError::InvalidQos(other)),
        }
    }

    /// Receive and dispatch one incoming frame, waiting at most `timeout`.
    ///
    /// PINGREQ is answered internally. Malformed frames are dropped with a
    /// diagnostic. Returns `None` when nothing actionable arrived.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<Incoming>> {
        let mut buf = [0u8; MAX_FRAME];
        let n = self.transport.receive(&mut buf, timeout)?;
        if n == 0 {
            return Ok(None);
        }
        let frame = match codec::parse_frame(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(dump = %hex::encode(&buf[..n.min(32)]), "dropping malformed frame: {}", e);
                return Ok(None);
            }
        };
        match frame.msg_type {
            MSG_PUBLISH => match codec::decode_publish(frame.body) {
                Ok(publish) => Ok(Some(Incoming::Publish(publish))),
                Err(e) => {
                    warn!("dropping malformed PUBLISH: {}", e);
                    Ok(None)
                }
            },
            MSG_PINGREQ => {
                debug!("PINGREQ answered");
                self.transport
                    .send(self.config.gateway, &codec::encode_pingresp())?;
                Ok(None)
            }
            MSG_DISCONNECT => {
                warn!("gateway sent DISCONNECT");
                self.connected = false;
                Ok(Some(Incoming::Disconnect))
            }
            other => {
                debug!(msg_type = other, "ignoring unexpected frame");
                Ok(None)
            }
        }
    }

    /// Acknowledge an incoming publish after it has been processed.
    ///
    /// QoS 1 answers with PUBACK; QoS 2 runs the receive side of the
    /// two-phase handshake. A missed PUBREL leaves the publish processed
    /// (at-least-once) and is only logged.
    pub fn ack_publish(&mut self, publish: &Publish) -> Result<()> {
        match publish.qos {
            0 => Ok(()),
            1 => {
                let frame = codec::encode_puback(publish.topic_id, publish.msg_id, RC_ACCEPTED);
                self.transport.send(self.config.gateway, &frame)?;
                debug!(msg_id = publish.msg_id, "PUBACK sent");
                Ok(())
            }
            2 => {
                self.transport.send(
                    self.config.gateway,
                    &codec::encode_msg_id_frame(MSG_PUBREC, publish.msg_id),
                )?;
                match self.wait_msg_id_frame(
                    "PUBREL",
                    MSG_PUBREL,
                    publish.msg_id,
                    self.config.handshake_timeout,
                ) {
                    Ok(()) => {
                        self.transport.send(
                            self.config.gateway,
                            &codec::encode_msg_id_frame(MSG_PUBCOMP, publish.msg_id),
                        )?;
                        debug!(msg_id = publish.msg_id, "QoS 2 receive handshake complete");
                        Ok(())
                    }
                    Err(DeliveryError::Timeout(_)) => {
                        warn!(msg_id = publish.msg_id, "PUBREL never arrived");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            other => Err(DeliveryError::InvalidQos(other)),
        }
    }

    /// Tear the session down.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.transport
                .send(self.config.gateway, &codec::encode_disconnect())?;
            self.connected = false;
            info!("DISCONNECT sent");
        }
        Ok(())
    }

    // ── QoS disciplines ────────────────────────────────────────────────

    /// QoS 0: one send, success immediately. The datagram may be lost.
    fn publish_qos0(&mut self, topic_id: u16, payload: &[u8]) -> Result<()> {
        let frame = codec::encode_publish(topic_id, 0, 0, false, payload);
        self.transport.send(self.config.gateway, &frame)?;
        debug!(topic_id, len = payload.len(), "published (QoS 0, no ack)");
        Ok(())
    }

    /// QoS 1: send, wait for PUBACK, retry the whole send on timeout.
    fn publish_qos1(&mut self, topic_id: u16, payload: &[u8]) -> Result<()> {
        let msg_id = self.next_msg_id;
        let frame = codec::encode_publish(topic_id, msg_id, 1, false, payload);

        for attempt in 1..=self.config.max_attempts {
            self.transport.send(self.config.gateway, &frame)?;
            match self.wait_puback(msg_id) {
                Ok(()) => {
                    self.advance_msg_id();
                    debug!(topic_id, msg_id, "published (QoS 1)");
                    return Ok(());
                }
                Err(DeliveryError::Timeout(what)) => {
                    if attempt == self.config.max_attempts {
                        return Err(DeliveryError::Timeout(what));
                    }
                    warn!(attempt, msg_id, "no PUBACK, retrying");
                    thread::sleep(self.config.retry_backoff);
                }
                Err(e) => return Err(e),
            }
        }
        Err(DeliveryError::Timeout("PUBACK"))
    }

    /// QoS 2: PUBLISH, PUBREC, PUBREL, PUBCOMP. A failure at either wait
    /// fails the attempt; the retry budget wraps the entire handshake.
    fn publish_qos2(&mut self, topic_id: u16, payload: &[u8]) -> Result<()> {
        let msg_id = self.next_msg_id;
        let frame = codec::encode_publish(topic_id, msg_id, 2, false, payload);

        for attempt in 1..=self.config.max_attempts {
            match self.qos2_handshake(&frame, msg_id) {
                Ok(()) => {
                    self.advance_msg_id();
                    debug!(topic_id, msg_id, "published (QoS 2)");
                    return Ok(());
                }
                Err(DeliveryError::Timeout(what)) => {
                    if attempt == self.config.max_attempts {
                        return Err(DeliveryError::Timeout(what));
                    }
                    warn!(attempt, msg_id, phase = what, "QoS 2 handshake failed, retrying");
                    thread::sleep(self.config.retry_backoff);
                }
                Err(e) => return Err(e),
            }
        }
        Err(DeliveryError::Timeout("PUBREC"))
    }

    fn qos2_handshake(&mut self, publish_frame: &[u8], msg_id: u16) -> Result<()> {
        self.transport.send(self.config.gateway, publish_frame)?;
        self.wait_msg_id_frame("PUBREC", MSG_PUBREC, msg_id, self.config.handshake_timeout)?;
        self.transport.send(
            self.config.gateway,
            &codec::encode_msg_id_frame(MSG_PUBREL, msg_id),
        )?;
        self.wait_msg_id_frame("PUBCOMP", MSG_PUBCOMP, msg_id, self.config.handshake_timeout)?;
        Ok(())
    }

    // ── Waiting helpers ────────────────────────────────────────────────

    fn wait_puback(&mut self, msg_id: u16) -> Result<()> {
        let body = self.wait_ack("PUBACK", self.config.ack_timeout, move |msg_type, body| {
            msg_type == MSG_PUBACK
                && codec::decode_puback(body)
                    .map(|p| p.msg_id == msg_id)
                    .unwrap_or(false)
        })?;
        let puback = codec::decode_puback(&body)?;
        if puback.return_code != RC_ACCEPTED {
            return Err(DeliveryError::Rejected {
                kind: "PUBLISH",
                code: puback.return_code,
            });
        }
        Ok(())
    }

    fn wait_msg_id_frame(
        &mut self,
        what: &'static str,
        want_type: u8,
        msg_id: u16,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_ack(what, timeout, move |msg_type, body| {
            msg_type == want_type
                && codec::decode_msg_id(what, body)
                    .map(|id| id == msg_id)
                    .unwrap_or(false)
        })
        .map(|_| ())
    }

    /// Read frames until `accept` claims one or the deadline passes.
    ///
    /// PINGREQ is answered inline; anything else that `accept` declines is
    /// dropped — the engine is synchronous, so no other delivery can be in
    /// flight while we wait.
    fn wait_ack(
        &mut self,
        what: &'static str,
        timeout: Duration,
        mut accept: impl FnMut(u8, &[u8]) -> bool,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_FRAME];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeliveryError::Timeout(what));
            }
            let n = self.transport.receive(&mut buf, remaining)?;
            if n == 0 {
                continue;
            }
            let frame = match codec::parse_frame(&buf[..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("dropping unparseable frame while waiting for {}: {}", what, e);
                    continue;
                }
            };
            if frame.msg_type == MSG_PINGREQ {
                self.transport
                    .send(self.config.gateway, &codec::encode_pingresp())?;
                continue;
            }
            if accept(frame.msg_type, frame.body) {
                return Ok(frame.body.to_vec());
            }
            debug!(
                msg_type = frame.msg_type,
                "ignoring frame while waiting for {}", what
            );
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DeliveryError::NotConnected)
        }
    }

    /// Advance past 0 on wrap: id 0 is reserved for QoS 0 publishes.
    fn advance_msg_id(&mut self) {
        self.next_msg_id = self.next_msg_id.checked_add(1).unwrap_or(1);
    }

    fn remember_channel(&mut self, channel: &str, topic_id: u16) {
        if let Some(entry) = self.channels.iter_mut().find(|(name, _)| name == channel) {
            entry.1 = topic_id;
        } else {
            self.channels.push((channel.to_string(), topic_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MSG_PUBREL, encode_puback, encode_msg_id_frame};
    use std::collections::VecDeque;
    use std::io;

    struct ScriptedTransport {
        incoming: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(incoming: Vec<Vec<u8>>) -> Self {
            Self {
                incoming: incoming.into(),
                sent: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, _dest: SocketAddr, frame: &[u8]) -> io::Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Ok(0),
            }
        }
    }

    fn test_client(incoming: Vec<Vec<u8>>) -> Client<ScriptedTransport> {
        let mut config = ClientConfig::new("127.0.0.1:1884".parse().unwrap(), "test_client");
        config.ack_timeout = Duration::from_millis(30);
        config.handshake_timeout = Duration::from_millis(30);
        config.retry_backoff = Duration::from_millis(1);
        let mut client = Client::new(ScriptedTransport::new(incoming), config);
        client.connected = true;
        client.remember_channel("chunks", 7);
        client
    }

    #[test]
    fn qos0_is_fire_and_forget() {
        let mut client = test_client(vec![]);
        client.publish("chunks", b"data", 0).unwrap();
        assert_eq!(client.transport().sent.len(), 1);
        // No identifier is consumed.
        assert_eq!(client.next_msg_id, 1);
    }

    #[test]
    fn qos1_consumes_ack_and_advances_id() {
        let mut client = test_client(vec![encode_puback(7, 1, RC_ACCEPTED)]);
        client.publish("chunks", b"data", 1).unwrap();
        assert_eq!(client.transport().sent.len(), 1);
        assert_eq!(client.next_msg_id, 2);
    }

    #[test]
    fn qos1_skips_stale_ack() {
        // An ack for an old message id must not satisfy the wait.
        let mut client = test_client(vec![
            encode_puback(7, 99, RC_ACCEPTED),
            encode_puback(7, 1, RC_ACCEPTED),
        ]);
        client.publish("chunks", b"data", 1).unwrap();
        assert_eq!(client.next_msg_id, 2);
    }

    #[test]
    fn qos1_exhausts_three_attempts() {
        let mut client = test_client(vec![]);
        let err = client.publish("chunks", b"data", 1).unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout("PUBACK")));
        assert_eq!(client.transport().sent.len(), 3);
        // The identifier is not advanced on failure.
        assert_eq!(client.next_msg_id, 1);
    }

    #[test]
    fn qos2_full_handshake() {
        let mut client = test_client(vec![
            encode_msg_id_frame(MSG_PUBREC, 1),
            encode_msg_id_frame(MSG_PUBCOMP, 1),
        ]);
        client.publish("chunks", b"data", 2).unwrap();
        // PUBLISH then PUBREL.
        assert_eq!(client.transport().sent.len(), 2);
        assert_eq!(client.transport().sent[1][1], MSG_PUBREL);
        assert_eq!(client.next_msg_id, 2);
    }

    #[test]
    fn qos2_fails_when_second_phase_times_out() {
        // PUBREC arrives on every attempt but PUBCOMP never does.
        let mut client = test_client(vec![
            encode_msg_id_frame(MSG_PUBREC, 1),
            encode_msg_id_frame(MSG_PUBREC, 1),
            encode_msg_id_frame(MSG_PUBREC, 1),
        ]);
        let err = client.publish("chunks", b"data", 2).unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout("PUBCOMP")));
        assert_eq!(client.next_msg_id, 1);
    }

    #[test]
    fn rejected_puback_is_fatal_without_retry() {
        let mut client = test_client(vec![encode_puback(7, 1, 0x03)]);
        let err = client.publish("chunks", b"data", 1).unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Rejected { kind: "PUBLISH", code: 0x03 }
        ));
        assert_eq!(client.transport().sent.len(), 1);
    }

    #[test]
    fn unknown_channel_is_refused_before_any_send() {
        let mut client = test_client(vec![]);
        let err = client.publish("nowhere", b"data", 0).unwrap_err();
        assert!(matches!(err, DeliveryError::UnknownChannel(_)));
        assert!(client.transport().sent.is_empty());
    }

    #[test]
    fn ack_publish_qos1_sends_puback() {
        let mut client = test_client(vec![]);
        let publish = Publish {
            topic_id: 7,
            msg_id: 42,
            qos: 1,
            dup: false,
            payload: vec![1, 2, 3],
        };
        client.ack_publish(&publish).unwrap();
        let sent = &client.transport().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][1], MSG_PUBACK);
    }

    #[test]
    fn cycle_qos_wraps() {
        let mut client = test_client(vec![]);
        assert_eq!(client.cycle_qos(), 1);
        assert_eq!(client.cycle_qos(), 2);
        assert_eq!(client.cycle_qos(), 0);
    }
}
