/// MQTT-SN 1.2 frame codec.
///
/// ```text
/// [0]      Length (or 0x01 + u16 BE length when the frame is >= 256 bytes)
/// [1]      MsgType
/// [2..]    Variable part (big-endian multi-byte integers)
/// ```
///
/// Only the frames this system actually exchanges are implemented:
/// session bring-up (CONNECT/CONNACK, REGISTER/REGACK, SUBSCRIBE/SUBACK),
/// publishing at all three QoS levels (PUBLISH, PUBACK, PUBREC, PUBREL,
/// PUBCOMP), keepalive (PINGREQ/PINGRESP) and DISCONNECT.

use crate::error::{DeliveryError, Result};

/// Largest frame the engine sends or accepts.
pub const MAX_FRAME: usize = 512;

// Message type codes.
pub const MSG_CONNECT: u8 = 0x04;
pub const MSG_CONNACK: u8 = 0x05;
pub const MSG_REGISTER: u8 = 0x0A;
pub const MSG_REGACK: u8 = 0x0B;
pub const MSG_PUBLISH: u8 = 0x0C;
pub const MSG_PUBACK: u8 = 0x0D;
pub const MSG_PUBCOMP: u8 = 0x0E;
pub const MSG_PUBREC: u8 = 0x0F;
pub const MSG_PUBREL: u8 = 0x10;
pub const MSG_SUBSCRIBE: u8 = 0x12;
pub const MSG_SUBACK: u8 = 0x13;
pub const MSG_PINGREQ: u8 = 0x16;
pub const MSG_PINGRESP: u8 = 0x17;
pub const MSG_DISCONNECT: u8 = 0x18;

// Flags octet.
pub const FLAG_DUP: u8 = 0x80;
pub const FLAG_QOS_MASK: u8 = 0x60;
pub const FLAG_CLEAN_SESSION: u8 = 0x04;

/// Return code 0x00 = accepted.
pub const RC_ACCEPTED: u8 = 0x00;

/// MQTT-SN protocol id carried in CONNECT.
const PROTOCOL_ID: u8 = 0x01;

/// QoS level -> flags bits (bits 5..=6).
pub fn qos_to_flags(qos: u8) -> u8 {
    (qos & 0x03) << 5
}

/// Flags bits -> QoS level.
pub fn flags_to_qos(flags: u8) -> u8 {
    (flags & FLAG_QOS_MASK) >> 5
}

/// A length-decoded frame: message type plus the variable part.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub msg_type: u8,
    pub body: &'a [u8],
}

/// Decode the length prefix and message type of a raw datagram.
pub fn parse_frame(raw: &[u8]) -> Result<Frame<'_>> {
    if raw.len() < 2 {
        return Err(DeliveryError::Malformed {
            kind: "mqtt-sn",
            detail: "shorter than minimal frame",
        });
    }
    let (declared, header) = if raw[0] == 0x01 {
        if raw.len() < 4 {
            return Err(DeliveryError::Malformed {
                kind: "mqtt-sn",
                detail: "truncated long-form length",
            });
        }
        (u16::from_be_bytes([raw[1], raw[2]]) as usize, 4usize)
    } else {
        (raw[0] as usize, 2usize)
    };
    if declared < header || declared > raw.len() {
        return Err(DeliveryError::Malformed {
            kind: "mqtt-sn",
            detail: "declared length out of range",
        });
    }
    Ok(Frame {
        msg_type: raw[header - 1],
        body: &raw[header..declared],
    })
}

/// Assemble a frame: length prefix (short or long form), type, body.
fn build_frame(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let short_total = 2 + body.len();
    if short_total < 256 {
        let mut out = Vec::with_capacity(short_total);
        out.push(short_total as u8);
        out.push(msg_type);
        out.extend_from_slice(body);
        out
    } else {
        let total = 4 + body.len();
        let mut out = Vec::with_capacity(total);
        out.push(0x01);
        out.extend_from_slice(&(total as u16).to_be_bytes());
        out.push(msg_type);
        out.extend_from_slice(body);
        out
    }
}

/// CONNECT: flags, protocol id, keepalive duration, client id.
pub fn encode_connect(client_id: &str, keepalive_secs: u16, clean_session: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + client_id.len());
    body.push(if clean_session { FLAG_CLEAN_SESSION } else { 0 });
    body.push(PROTOCOL_ID);
    body.extend_from_slice(&keepalive_secs.to_be_bytes());
    body.extend_from_slice(client_id.as_bytes());
    build_frame(MSG_CONNECT, &body)
}

/// CONNACK carries a single return code.
pub fn decode_connack(body: &[u8]) -> Result<u8> {
    match body.first() {
        Some(&rc) => Ok(rc),
        None => Err(DeliveryError::Malformed {
            kind: "CONNACK",
            detail: "missing return code",
        }),
    }
}

/// REGISTER: topic id 0 (gateway assigns), message id, topic name.
pub fn encode_register(msg_id: u16, topic_name: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + topic_name.len());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&msg_id.to_be_bytes());
    body.extend_from_slice(topic_name.as_bytes());
    build_frame(MSG_REGISTER, &body)
}

#[derive(Debug, Clone, Copy)]
pub struct Regack {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

pub fn decode_regack(body: &[u8]) -> Result<Regack> {
    if body.len() < 5 {
        return Err(DeliveryError::Malformed {
            kind: "REGACK",
            detail: "body shorter than 5 bytes",
        });
    }
    Ok(Regack {
        topic_id: u16::from_be_bytes([body[0], body[1]]),
        msg_id: u16::from_be_bytes([body[2], body[3]]),
        return_code: body[4],
    })
}

/// SUBSCRIBE by topic name with the requested QoS in the flags.
pub fn encode_subscribe(msg_id: u16, topic_name: &str, qos: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(3 + topic_name.len());
    body.push(qos_to_flags(qos));
    body.extend_from_slice(&msg_id.to_be_bytes());
    body.extend_from_slice(topic_name.as_bytes());
    build_frame(MSG_SUBSCRIBE, &body)
}

#[derive(Debug, Clone, Copy)]
pub struct Suback {
    pub granted_qos: u8,
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

pub fn decode_suback(body: &[u8]) -> Result<Suback> {
    if body.len() < 6 {
        return Err(DeliveryError::Malformed {
            kind: "SUBACK",
            detail: "body shorter than 6 bytes",
        });
    }
    Ok(Suback {
        granted_qos: flags_to_qos(body[0]),
        topic_id: u16::from_be_bytes([body[1], body[2]]),
        msg_id: u16::from_be_bytes([body[3], body[4]]),
        return_code: body[5],
    })
}

/// PUBLISH: flags, topic id, message id (0 for QoS 0), payload.
pub fn encode_publish(topic_id: u16, msg_id: u16, qos: u8, dup: bool, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(5 + payload.len());
    let mut flags = qos_to_flags(qos);
    if dup {
        flags |= FLAG_DUP;
    }
    body.push(flags);
    body.extend_from_slice(&topic_id.to_be_bytes());
    body.extend_from_slice(&msg_id.to_be_bytes());
    body.extend_from_slice(payload);
    build_frame(MSG_PUBLISH, &body)
}

#[derive(Debug, Clone)]
pub struct Publish {
    pub topic_id: u16,
    pub msg_id: u16,
    pub qos: u8,
    pub dup: bool,
    pub payload: Vec<u8>,
}

pub fn decode_publish(body: &[u8]) -> Result<Publish> {
    if body.len() < 5 {
        return Err(DeliveryError::Malformed {
            kind: "PUBLISH",
            detail: "body shorter than 5 bytes",
        });
    }
    Ok(Publish {
        topic_id: u16::from_be_bytes([body[1], body[2]]),
        msg_id: u16::from_be_bytes([body[3], body[4]]),
        qos: flags_to_qos(body[0]),
        dup: body[0] & FLAG_DUP != 0,
        payload: body[5..].to_vec(),
    })
}

/// PUBACK: topic id, message id, return code.
pub fn encode_puback(topic_id: u16, msg_id: u16, return_code: u8) -> Vec<u8> {
    let mut body = [0u8; 5];
    body[0..2].copy_from_slice(&topic_id.to_be_bytes());
    body[2..4].copy_from_slice(&msg_id.to_be_bytes());
    body[4] = return_code;
    build_frame(MSG_PUBACK, &body)
}

#[derive(Debug, Clone, Copy)]
pub struct Puback {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: u8,
}

pub fn decode_puback(body: &[u8]) -> Result<Puback> {
    if body.len() < 5 {
        return Err(DeliveryError::Malformed {
            kind: "PUBACK",
            detail: "body shorter than 5 bytes",
        });
    }
    Ok(Puback {
        topic_id: u16::from_be_bytes([body[0], body[1]]),
        msg_id: u16::from_be_bytes([body[2], body[3]]),
        return_code: body[4],
    })
}

/// PUBREC / PUBREL / PUBCOMP all carry just a message id.
pub fn encode_msg_id_frame(msg_type: u8, msg_id: u16) -> Vec<u8> {
    build_frame(msg_type, &msg_id.to_be_bytes())
}

pub fn decode_msg_id(kind: &'static str, body: &[u8]) -> Result<u16> {
    if body.len() < 2 {
        return Err(DeliveryError::Malformed {
            kind,
            detail: "missing message id",
        });
    }
    Ok(u16::from_be_bytes([body[0], body[1]]))
}

pub fn encode_pingresp() -> Vec<u8> {
    build_frame(MSG_PINGRESP, &[])
}

pub fn encode_disconnect() -> Vec<u8> {
    build_frame(MSG_DISCONNECT, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_roundtrip_shape() {
        let frame = encode_connect("blockcast_publisher", 60, true);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.msg_type, MSG_CONNECT);
        assert_eq!(parsed.body[0], FLAG_CLEAN_SESSION);
        assert_eq!(parsed.body[1], 0x01);
        assert_eq!(u16::from_be_bytes([parsed.body[2], parsed.body[3]]), 60);
        assert_eq!(&parsed.body[4..], b"blockcast_publisher");
    }

    #[test]
    fn publish_roundtrip() {
        let frame = encode_publish(7, 42, 1, false, b"hello");
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.msg_type, MSG_PUBLISH);
        let publish = decode_publish(parsed.body).unwrap();
        assert_eq!(publish.topic_id, 7);
        assert_eq!(publish.msg_id, 42);
        assert_eq!(publish.qos, 1);
        assert!(!publish.dup);
        assert_eq!(publish.payload, b"hello");
    }

    #[test]
    fn publish_qos2_flags() {
        let frame = encode_publish(1, 9, 2, true, &[0xAA]);
        let publish = decode_publish(parse_frame(&frame).unwrap().body).unwrap();
        assert_eq!(publish.qos, 2);
        assert!(publish.dup);
    }

    #[test]
    fn long_form_length() {
        let payload = vec![0x5A; 300];
        let frame = encode_publish(3, 0, 0, false, &payload);
        assert_eq!(frame[0], 0x01);
        assert_eq!(
            u16::from_be_bytes([frame[1], frame[2]]) as usize,
            frame.len()
        );
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.msg_type, MSG_PUBLISH);
        let publish = decode_publish(parsed.body).unwrap();
        assert_eq!(publish.payload, payload);
    }

    #[test]
    fn puback_roundtrip() {
        let frame = encode_puback(0x0102, 0x0304, RC_ACCEPTED);
        assert_eq!(frame.len(), 7);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.msg_type, MSG_PUBACK);
        let puback = decode_puback(parsed.body).unwrap();
        assert_eq!(puback.topic_id, 0x0102);
        assert_eq!(puback.msg_id, 0x0304);
        assert_eq!(puback.return_code, RC_ACCEPTED);
    }

    #[test]
    fn msg_id_frames() {
        for msg_type in [MSG_PUBREC, MSG_PUBREL, MSG_PUBCOMP] {
            let frame = encode_msg_id_frame(msg_type, 77);
            assert_eq!(frame.len(), 4);
            let parsed = parse_frame(&frame).unwrap();
            assert_eq!(parsed.msg_type, msg_type);
            assert_eq!(decode_msg_id("x", parsed.body).unwrap(), 77);
        }
    }

    #[test]
    fn regack_suback_decode() {
        let regack = decode_regack(&[0x00, 0x05, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(regack.topic_id, 5);
        assert_eq!(regack.msg_id, 1);
        assert_eq!(regack.return_code, RC_ACCEPTED);

        let suback = decode_suback(&[0x40, 0x00, 0x09, 0x00, 0x66, 0x00]).unwrap();
        assert_eq!(suback.granted_qos, 2);
        assert_eq!(suback.topic_id, 9);
        assert_eq!(suback.msg_id, 0x66);
    }

    #[test]
    fn reject_short_frames() {
        assert!(parse_frame(&[]).is_err());
        assert!(parse_frame(&[0x02]).is_err());
        assert!(parse_frame(&[0x01, 0x00]).is_err());
        // Declared length larger than the datagram.
        assert!(parse_frame(&[0x09, MSG_PUBLISH, 0x00]).is_err());
        assert!(decode_puback(&[0x00, 0x01]).is_err());
        assert!(decode_connack(&[]).is_err());
    }
}
