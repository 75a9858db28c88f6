//! Trailer appended to PUBLISH frames on inter-node links.
//!
//! Layout, after the standard frame and not counted in its remaining length:
//! 8 bytes big-endian expiry (epoch millis, `0` = never) followed by the 16 byte origin UUID
//! (nil = unknown).


use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use super::{Codec, Packet, Publish};
use crate::error::{DecodeError, EncodeError};
use crate::types::QoS;

pub const BRIDGE_SUFFIX_LEN: usize = 8 + 16;

pub(crate) fn write_suffix(publish: &Publish, dst: &mut BytesMut) {
    dst.put_i64(publish.expiry);
    dst.put_slice(publish.origin.unwrap_or_else(Uuid::nil).as_bytes());
}

/// `src` must hold at least `BRIDGE_SUFFIX_LEN` bytes.
pub(crate) fn read_suffix(publish: &mut Publish, src: &mut Bytes) {
    publish.expiry = src.get_i64();
    let mut origin = [0u8; 16];
    src.copy_to_slice(&mut origin);
    let origin = Uuid::from_bytes(origin);
    publish.origin = if origin.is_nil() { None } else { Some(origin) };
}

/// Serializes one publish, suffix included, as a standalone buffer.
///
/// Packet identifiers have no meaning off the wire; a placeholder is written for QoS 1/2.
pub fn encode_bridged(publish: &Publish) -> Result<Bytes, EncodeError> {
    let mut publish = publish.clone();
    publish.dup = false;
    publish.packet_id = match publish.qos {
        QoS::AtMostOnce => None,
        _ => Some(publish.packet_id.unwrap_or(nonzero_ext::nonzero!(1u16))),
    };
    let mut codec = Codec::default();
    codec.set_bridge(true);
    let mut dst = BytesMut::new();
    codec.encode(Packet::Publish(publish), &mut dst)?;
    Ok(dst.freeze())
}

/// Inverse of [`encode_bridged`]. The buffer must contain exactly one PUBLISH frame.
pub fn decode_bridged(src: &[u8]) -> Result<Publish, DecodeError> {
    let mut codec = Codec::default();
    codec.set_bridge(true);
    let mut buf = BytesMut::from(src);
    match codec.decode(&mut buf)? {
        Some(Packet::Publish(mut publish)) if buf.is_empty() => {
            publish.packet_id = None;
            Ok(publish)
        }
        Some(Packet::Publish(_)) | None => Err(DecodeError::InvalidLength),
        Some(_) => Err(DecodeError::UnsupportedPacketType),
    }
}
