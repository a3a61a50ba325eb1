use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Kind of frame on the wire. The numeric values are part of the wire format
/// and must not be changed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    /// Placeholder value, never valid on the wire.
    Uninitialized = 0,
    /// Acknowledgement for a previously received `DataWithAck` frame. Carries
    /// no payload; `sequence` is the acknowledged sequence number.
    Ack = 1,
    /// Fire-and-forget data.
    Data = 2,
    /// Data that the peer acknowledges; retransmitted until acked or given up.
    DataWithAck = 3,
    /// Liveness probe / probe echo. Carries no payload; `sequence` is the
    /// probe token.
    KeepAlive = 4,
}

/// The wire unit exchanged with the transport collaborator.
///
/// Layout (little-endian):
/// ```ascii
/// 0: channel id (u16)
/// 2: kind (u8)
/// 3: sequence (u16)
/// 5: payload length (u32)
/// 9: payload bytes (length 0 for Ack / KeepAlive)
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub channel_id: u16,
    pub kind: FrameKind,
    pub sequence: u16,
    pub payload: Bytes,
}

impl Frame {
    pub const HEADER_LEN: usize = 9;

    pub fn data(channel_id: u16, kind: FrameKind, sequence: u16, payload: Bytes) -> Frame {
        Frame { channel_id, kind, sequence, payload }
    }

    pub fn ack(channel_id: u16, acked_sequence: u16) -> Frame {
        Frame {
            channel_id,
            kind: FrameKind::Ack,
            sequence: acked_sequence,
            payload: Bytes::new(),
        }
    }

    pub fn keep_alive(channel_id: u16, token: u16) -> Frame {
        Frame {
            channel_id,
            kind: FrameKind::KeepAlive,
            sequence: token,
            payload: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.channel_id);
        buf.put_u8(self.kind.into());
        buf.put_u16_le(self.sequence);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Frame> {
        if buf.remaining() < Self::HEADER_LEN {
            bail!("incomplete frame header: {} bytes", buf.remaining());
        }

        let channel_id = buf.get_u16_le();
        let raw_kind = buf.get_u8();
        let kind = match FrameKind::try_from(raw_kind) {
            Ok(FrameKind::Uninitialized) => bail!("frame kind is uninitialized"),
            Ok(kind) => kind,
            Err(_) => bail!("unknown frame kind {}", raw_kind),
        };
        let sequence = buf.get_u16_le();
        let payload_len = buf.get_u32_le() as usize;

        if buf.remaining() < payload_len {
            bail!("frame payload truncated: {} of {} bytes", buf.remaining(), payload_len);
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Frame { channel_id, kind, sequence, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::data(Frame::data(5, FrameKind::Data, 1, Bytes::from_static(b"abc")),
        vec![5,0, 2, 1,0, 3,0,0,0, b'a',b'b',b'c'])]
    #[case::data_with_ack(Frame::data(300, FrameKind::DataWithAck, 0x1234, Bytes::from_static(b"x")),
        vec![44,1, 3, 0x34,0x12, 1,0,0,0, b'x'])]
    #[case::ack(Frame::ack(7, 9), vec![7,0, 1, 9,0, 0,0,0,0])]
    #[case::keep_alive(Frame::keep_alive(0, 0xffee), vec![0,0, 4, 0xee,0xff, 0,0,0,0])]
    #[case::empty_payload(Frame::data(2, FrameKind::Data, 0, Bytes::new()), vec![2,0, 2, 0,0, 0,0,0,0])]
    fn test_ser(#[case] frame: Frame, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        let deser = Frame::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, frame);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_header(vec![5,0, 2, 1,0])]
    #[case::uninitialized_kind(vec![5,0, 0, 1,0, 0,0,0,0])]
    #[case::unknown_kind(vec![5,0, 99, 1,0, 0,0,0,0])]
    #[case::truncated_payload(vec![5,0, 2, 1,0, 4,0,0,0, b'a',b'b'])]
    fn test_deser_rejects(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(Frame::deser(&mut b).is_err());
    }
}
