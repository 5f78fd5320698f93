use crate::config::{PixelFormat, VideoParams};
use crate::error::JitterError;

/// Owned decode target. The playout path keeps exactly one of these per
/// video stream and re-emits it whenever there is nothing new to show.
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl DecodedFrame {
    /// Mid-grey YUV420 canvas sized to the stream's maximum, shown until
    /// the first real frame decodes.
    pub fn grey(params: VideoParams) -> Self {
        let len = params.max_width as usize * params.max_height as usize * 12 / 8;
        DecodedFrame {
            width: params.max_width,
            height: params.max_height,
            format: params.pixel_format,
            data: vec![0x80; len],
        }
    }
}

/// Contract for compressed-video decoders injected by the host.
///
/// On success the implementation overwrites `frame` (dimensions, format and
/// buffer) with the decoded picture. On failure it must leave `frame`
/// untouched so the previous picture keeps showing; the engine requests a
/// keyframe and moves on.
pub trait VideoDecoder: Send {
    fn decode(&mut self, input: &[u8], frame: &mut DecodedFrame) -> Result<(), JitterError>;
}

/// Pass-through for `MediaType::Raw` streams: the payload already is a
/// frame in the negotiated format.
pub struct RawDecoder;

impl VideoDecoder for RawDecoder {
    fn decode(&mut self, input: &[u8], frame: &mut DecodedFrame) -> Result<(), JitterError> {
        if input.is_empty() {
            return Err(JitterError::MalformedPacket("empty raw video frame"));
        }

        frame.data.clear();
        frame.data.extend_from_slice(input);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grey_frame_is_yuv420_sized() {
        let frame = DecodedFrame::grey(VideoParams {
            max_width: 640,
            max_height: 480,
            pixel_format: PixelFormat::I420,
        });

        assert_eq!(frame.data.len(), 640 * 480 * 12 / 8);
        assert!(frame.data.iter().all(|&b| b == 0x80));
    }

    #[test]
    fn raw_decoder_replaces_the_buffer() {
        let mut frame = DecodedFrame::grey(VideoParams::default());
        let mut decoder = RawDecoder;

        decoder.decode(b"pixels", &mut frame).unwrap();
        assert_eq!(frame.data, b"pixels");

        // failure leaves the previous picture in place
        assert!(decoder.decode(b"", &mut frame).is_err());
        assert_eq!(frame.data, b"pixels");
    }
}
