use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Wire-level errors. Anything malformed is dropped by the receiver and
/// counted, never propagated as a fatal condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unknown media type tag: {0}")]
    UnknownMediaType(u16),

    #[error("fragment {index} out of range for count {count}")]
    BadFragment { index: u32, count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Opus,
    L16,
    H264,
    F32,
    Raw,
}

impl MediaType {
    pub fn is_audio(self) -> bool {
        matches!(self, MediaType::Opus | MediaType::L16 | MediaType::F32)
    }

    pub fn is_video(self) -> bool {
        matches!(self, MediaType::H264 | MediaType::Raw)
    }

    /// Bytes per sample for uncompressed audio formats.
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            MediaType::L16 => Some(size_of::<i16>()),
            MediaType::F32 => Some(size_of::<f32>()),
            _ => None,
        }
    }

    fn tag(self) -> u16 {
        match self {
            MediaType::Opus => 1,
            MediaType::L16 => 2,
            MediaType::H264 => 3,
            MediaType::F32 => 4,
            MediaType::Raw => 5,
        }
    }

    fn from_tag(tag: u16) -> Result<Self, PacketError> {
        match tag {
            1 => Ok(MediaType::Opus),
            2 => Ok(MediaType::L16),
            3 => Ok(MediaType::H264),
            4 => Ok(MediaType::F32),
            5 => Ok(MediaType::Raw),
            other => Err(PacketError::UnknownMediaType(other)),
        }
    }
}

/// One delivered media object after transport decode and unprotect.
///
/// `encoded_sequence_num` is strictly increasing per `source_id`; gaps mean
/// loss. `source_record_time` is the origin clock in microseconds and is the
/// only cross-stream alignment signal the receiver gets.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub client_id: u64,
    pub source_id: u64,
    pub encoded_sequence_num: u64,
    pub source_record_time: u64,

    pub media_type: MediaType,
    pub is_intra_frame: bool,

    pub fragment_index: u32,
    pub fragment_count: u32,
    pub frame_size: u32,

    pub audio_energy_level: f32,

    pub data: Vec<u8>,
}

impl Default for Packet {
    fn default() -> Self {
        Packet {
            client_id: 0,
            source_id: 0,
            encoded_sequence_num: 0,
            source_record_time: 0,
            media_type: MediaType::F32,
            is_intra_frame: false,
            fragment_index: 0,
            fragment_count: 1,
            frame_size: 0,
            audio_energy_level: 0.0,
            data: Vec::new(),
        }
    }
}

const FLAG_INTRA: u8 = 0b0000_0001;

/// Fixed header: 4 u64 fields, media tag, flags, 3 u32 fields, energy level.
pub const PACKET_HEADER_LEN: usize = 8 * 4 + 2 + 1 + 4 * 3 + 4;

impl Packet {
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.client_id);
        buf.put_u64_le(self.source_id);
        buf.put_u64_le(self.encoded_sequence_num);
        buf.put_u64_le(self.source_record_time);

        buf.put_u16_le(self.media_type.tag());
        buf.put_u8(if self.is_intra_frame { FLAG_INTRA } else { 0 });

        buf.put_u32_le(self.fragment_index);
        buf.put_u32_le(self.fragment_count);
        buf.put_u32_le(self.frame_size);

        buf.put_f32_le(self.audio_energy_level);

        buf.put(&self.data[..]);
    }

    pub fn parse(mut bytes: Bytes) -> Result<Self, PacketError> {
        if bytes.remaining() < PACKET_HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: PACKET_HEADER_LEN,
                got: bytes.remaining(),
            });
        }

        let client_id = bytes.get_u64_le();
        let source_id = bytes.get_u64_le();
        let encoded_sequence_num = bytes.get_u64_le();
        let source_record_time = bytes.get_u64_le();

        let media_type = MediaType::from_tag(bytes.get_u16_le())?;
        let flags = bytes.get_u8();

        let fragment_index = bytes.get_u32_le();
        let fragment_count = bytes.get_u32_le();
        let frame_size = bytes.get_u32_le();

        let audio_energy_level = bytes.get_f32_le();

        if fragment_count == 0 || fragment_index >= fragment_count {
            return Err(PacketError::BadFragment {
                index: fragment_index,
                count: fragment_count,
            });
        }

        let data_len = bytes.remaining();
        let data = bytes.slice(0..data_len).to_vec();

        Ok(Packet {
            client_id,
            source_id,
            encoded_sequence_num,
            source_record_time,
            media_type,
            is_intra_frame: flags & FLAG_INTRA != 0,
            fragment_index,
            fragment_count,
            frame_size,
            audio_energy_level,
            data,
        })
    }
}

/// Sent back to the publisher when the receiver needs a fresh keyframe to
/// resume decoding after loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdrRequest {
    pub client_id: u64,
    pub source_id: u64,
    pub source_timestamp: u64,
}

impl IdrRequest {
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.client_id);
        buf.put_u64_le(self.source_id);
        buf.put_u64_le(self.source_timestamp);
    }

    pub fn parse(mut bytes: Bytes) -> Result<Self, PacketError> {
        if bytes.remaining() < 24 {
            return Err(PacketError::Truncated {
                needed: 24,
                got: bytes.remaining(),
            });
        }

        Ok(IdrRequest {
            client_id: bytes.get_u64_le(),
            source_id: bytes.get_u64_le(),
            source_timestamp: bytes.get_u64_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trip() {
        let packet = Packet {
            client_id: 7,
            source_id: 21,
            encoded_sequence_num: 1001,
            source_record_time: 1_700_000_000_000,
            media_type: MediaType::H264,
            is_intra_frame: true,
            fragment_index: 2,
            fragment_count: 5,
            frame_size: 12_000,
            audio_energy_level: 0.0,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };

        let mut buf = BytesMut::new();
        packet.to_bytes(&mut buf);
        let parsed = Packet::parse(buf.freeze()).unwrap();

        assert_eq!(parsed, packet);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = Packet::parse(Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert!(matches!(err, PacketError::Truncated { .. }));
    }

    #[test]
    fn unknown_media_tag_is_rejected() {
        let mut buf = BytesMut::new();
        Packet::default().to_bytes(&mut buf);
        // media tag sits right after the four u64 fields
        buf[32] = 0xff;
        buf[33] = 0xff;

        let err = Packet::parse(buf.freeze()).unwrap_err();
        assert_eq!(err, PacketError::UnknownMediaType(0xffff));
    }

    #[test]
    fn fragment_index_must_be_in_range() {
        let packet = Packet {
            fragment_index: 4,
            fragment_count: 4,
            ..Packet::default()
        };

        let mut buf = BytesMut::new();
        packet.to_bytes(&mut buf);

        let err = Packet::parse(buf.freeze()).unwrap_err();
        assert_eq!(err, PacketError::BadFragment { index: 4, count: 4 });
    }

    #[test]
    fn idr_request_round_trip() {
        let req = IdrRequest {
            client_id: 1,
            source_id: 2,
            source_timestamp: 3,
        };

        let mut buf = BytesMut::new();
        req.to_bytes(&mut buf);

        assert_eq!(IdrRequest::parse(buf.freeze()).unwrap(), req);
    }
}
