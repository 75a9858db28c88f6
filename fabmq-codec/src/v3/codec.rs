use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::bridge::{read_suffix, write_suffix, BRIDGE_SUFFIX_LEN};
use super::{decode, encode, Packet};
use crate::error::{DecodeError, EncodeError};
use crate::types::{packet_type, QoS};
use crate::utils::decode_variable_length;
use crate::v3::Publish;

#[derive(Debug, Clone, Copy, Default)]
/// Mqtt v3.1 / v3.1.1 protocol codec
pub struct Codec {
    max_size: u32,
    bridge: bool,
}

impl Codec {
    /// Create `Codec` instance
    pub fn new(max_packet_size: u32) -> Self {
        Codec { max_size: max_packet_size, bridge: false }
    }

    /// Set max inbound frame size.
    ///
    /// If max size is set to `0`, size is unlimited.
    /// By default max size is set to `0`
    pub fn set_max_size(&mut self, size: u32) {
        self.max_size = size;
    }

    /// Switch PUBLISH frames to carry the expiry/origin suffix in both directions.
    pub fn set_bridge(&mut self, bridge: bool) {
        self.bridge = bridge;
    }

    #[inline]
    pub fn is_bridge(&self) -> bool {
        self.bridge
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let first_byte = src[0];
        let (remaining_length, consumed) = match decode_variable_length(&src[1..])? {
            Some(v) => v,
            None => return Ok(None),
        };
        if self.max_size != 0 && self.max_size < remaining_length {
            return Err(DecodeError::MaxSizeExceeded);
        }

        let is_publish = (packet_type::PUBLISH_START..=packet_type::PUBLISH_END).contains(&first_byte);
        let suffix_len = if self.bridge && is_publish { BRIDGE_SUFFIX_LEN } else { 0 };
        let header_len = consumed + 1;
        let frame_len = header_len + remaining_length as usize + suffix_len;
        if src.len() < frame_len {
            // nothing is consumed until the whole frame is buffered
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let packet_buf = src.split_to(remaining_length as usize).freeze();
        let mut packet = decode::decode_packet(packet_buf, first_byte)?;
        if suffix_len > 0 {
            let mut suffix = src.split_to(suffix_len).freeze();
            if let Packet::Publish(publish) = &mut packet {
                read_suffix(publish, &mut suffix);
            }
        }
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if let Packet::Publish(Publish { qos, packet_id, .. }) = item {
            if (qos == QoS::AtLeastOnce || qos == QoS::ExactlyOnce) && packet_id.is_none() {
                return Err(EncodeError::PacketIdRequired);
            }
        }
        let content_size = encode::get_encoded_size(&item);
        let content_size = u32::try_from(content_size).map_err(|_| EncodeError::InvalidLength)?;
        dst.reserve(content_size as usize + 5 + BRIDGE_SUFFIX_LEN);
        encode::encode(&item, dst, content_size)?;
        if self.bridge {
            if let Packet::Publish(publish) = &item {
                write_suffix(publish, dst);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use bytestring::ByteString;
    use std::num::NonZeroU16;
    use uuid::Uuid;

    #[test]
    fn test_max_size() {
        let mut codec = Codec::default();
        codec.set_max_size(5);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\0\x09");
        assert_eq!(codec.decode(&mut buf).map_err(|e| matches!(e, DecodeError::MaxSizeExceeded)), Err(true));
    }

    #[test]
    fn test_packet() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();

        let pkt = Publish::new(
            ByteString::from_static("/test"),
            Bytes::from(Vec::from("a".repeat(260 * 1024))),
            QoS::AtMostOnce,
            false,
        );
        codec.encode(Packet::Publish(pkt.clone()), &mut buf).unwrap();

        let pkt2 = if let Packet::Publish(v) = codec.decode(&mut buf).unwrap().unwrap() { v } else { panic!() };
        assert_eq!(pkt, pkt2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_need_more_data() {
        let mut codec = Codec::default();
        let frame: &[u8] = b"\x3d\x0D\x00\x05topic\x43\x21data";

        // every strict prefix yields "need more data" and leaves the buffer untouched
        for n in 0..frame.len() {
            let mut buf = BytesMut::from(&frame[..n]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert_eq!(&buf[..], &frame[..n]);
        }

        let mut buf = BytesMut::from(frame);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Packet::Publish(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\xc0\x00\x40\x02\x43\x21\x30\x0b\x00\x05topic");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::PingRequest));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Packet::PublishAck { packet_id: NonZeroU16::new(0x4321).unwrap() })
        );
        // the trailing publish is incomplete
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 9);

        buf.extend_from_slice(b"data");
        match codec.decode(&mut buf).unwrap() {
            Some(Packet::Publish(p)) => {
                assert_eq!(p.topic, "topic");
                assert_eq!(p.payload, Bytes::from_static(b"data"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_malformed_length() {
        let mut codec = Codec::default();
        let mut buf = BytesMut::from(&b"\x30\xff\xff\xff\xff\x01"[..]);
        assert_eq!(codec.decode(&mut buf).map_err(|e| matches!(e, DecodeError::InvalidLength)), Err(true));
    }

    #[test]
    fn test_bridge_frames() {
        let mut codec = Codec::default();
        codec.set_bridge(true);
        let origin = Uuid::new_v4();

        let mut pkt = Publish::new("a/|b", Bytes::from_static(b"data"), QoS::AtLeastOnce, true);
        pkt.packet_id = NonZeroU16::new(7);
        pkt.expiry = 1_700_000_000_000;
        pkt.origin = Some(origin);

        let mut buf = BytesMut::new();
        codec.encode(Packet::Publish(pkt.clone()), &mut buf).unwrap();
        codec.encode(Packet::PingRequest, &mut buf).unwrap();

        let plain_len = 2 + 2 + 4 + 2 + 4;
        assert_eq!(buf.len(), plain_len + BRIDGE_SUFFIX_LEN + 2);

        // suffix not yet complete
        let mut partial = BytesMut::from(&buf[..plain_len + 10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::Publish(pkt)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::PingRequest));
        assert!(buf.is_empty());
    }
}
