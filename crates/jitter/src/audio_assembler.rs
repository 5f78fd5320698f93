use std::sync::Mutex;

use log::warn;
use media_common::{MediaType, Packet};

use crate::config::{AudioParams, SampleType};
use crate::error::JitterError;

// Opus never exceeds 120 ms per packet.
const MAX_SAMPLES_PER_CHANNEL: usize = 48_000 * 120 / 1000;

/// Opus decode stage for one audio stream.
///
/// Opus is stateful: every stream owns exactly one decoder and calls are
/// serialised through the mutex. The same decoder state is what makes
/// concealment work: decoding an empty payload yields the codec's best
/// guess at the missing frame.
pub struct AudioAssembler {
    decoder: Mutex<opus::Decoder>,
    decode_as: SampleType,
    channels: usize,
}

impl AudioAssembler {
    pub fn new(params: AudioParams) -> Result<Self, JitterError> {
        let channels = match params.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(JitterError::DecodeFailure(format!(
                    "unsupported channel count: {n}"
                )));
            }
        };

        let decoder = opus::Decoder::new(params.sample_rate, channels)?;

        Ok(AudioAssembler {
            decoder: Mutex::new(decoder),
            decode_as: params.sample_type,
            channels: params.channels as usize,
        })
    }

    /// Decode the packet's Opus payload in place. The returned packet keeps
    /// all metadata but carries raw samples in the configured format.
    pub fn push(&self, mut packet: Packet) -> Result<Packet, JitterError> {
        debug_assert_eq!(packet.media_type, MediaType::Opus);

        packet.data = self.decode(Some(&packet.data), MAX_SAMPLES_PER_CHANNEL)?;
        packet.media_type = self.decode_as.media_type();
        Ok(packet)
    }

    /// Ask the decoder for a concealment frame of `byte_len` bytes. The
    /// empty input drives the codec's loss-concealment path, which
    /// extrapolates from the frames it has already seen.
    pub fn create_plc(&self, byte_len: usize) -> Result<Packet, JitterError> {
        let samples_per_channel = byte_len / (self.decode_as.bytes_per_sample() * self.channels);
        let data = self.decode(None, samples_per_channel)?;

        Ok(Packet {
            media_type: self.decode_as.media_type(),
            data,
            ..Packet::default()
        })
    }

    fn decode(
        &self,
        input: Option<&[u8]>,
        samples_per_channel: usize,
    ) -> Result<Vec<u8>, JitterError> {
        let mut decoder = self.decoder.lock().expect("decoder mutex poisoned");
        let input = input.unwrap_or(&[]);

        match self.decode_as {
            SampleType::L16 => {
                let mut pcm = vec![0i16; samples_per_channel * self.channels];
                let decoded = decoder.decode(input, &mut pcm, false)?;
                pcm.truncate(decoded * self.channels);

                let mut data = Vec::with_capacity(pcm.len() * size_of::<i16>());
                for sample in pcm {
                    data.extend_from_slice(&sample.to_ne_bytes());
                }
                Ok(data)
            }
            SampleType::F32 => {
                let mut pcm = vec![0f32; samples_per_channel * self.channels];
                let decoded = decoder.decode_float(input, &mut pcm, false)?;
                pcm.truncate(decoded * self.channels);

                let mut data = Vec::with_capacity(pcm.len() * size_of::<f32>());
                for sample in pcm {
                    data.extend_from_slice(&sample.to_ne_bytes());
                }
                Ok(data)
            }
        }
    }
}

/// Concealment of last resort: a frame of silence. Used for streams that
/// arrive already decoded (L16/F32) and have no codec to extrapolate with,
/// and as the fallback when the decoder itself fails.
pub fn create_zero_payload(byte_len: usize, decode_as: SampleType) -> Packet {
    Packet {
        media_type: decode_as.media_type(),
        data: vec![0; byte_len],
        ..Packet::default()
    }
}

/// Decode failures are recoverable: log, substitute silence, keep going.
pub fn plc_or_silence(
    assembler: Option<&AudioAssembler>,
    byte_len: usize,
    decode_as: SampleType,
) -> Packet {
    match assembler {
        Some(assembler) => match assembler.create_plc(byte_len) {
            Ok(packet) if !packet.data.is_empty() => packet,
            Ok(_) => create_zero_payload(byte_len, decode_as),
            Err(err) => {
                warn!("concealment decode failed, substituting silence: {err}");
                create_zero_payload(byte_len, decode_as)
            }
        },
        None => create_zero_payload(byte_len, decode_as),
    }
}
