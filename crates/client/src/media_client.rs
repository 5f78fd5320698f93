use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result as AResult};
use bytes::Bytes;
use dashmap::DashMap;
use log::warn;

use jitter::{Counters, Jitter, PixelFormat, SyncAction, VideoDecoder};
use media_common::{IdrRequest, Packet};

use crate::config::Config;
use crate::events::{EventSink, MediaEvent};

/// Manifest-resolved identity of a delivered object. The manifest layer
/// owns the mapping from transport names to these ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectName {
    pub client_id: u64,
    pub source_id: u64,
}

/// Owned copy of the frame to render this tick.
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: u64,
    pub action: SyncAction,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamMetrics {
    pub client_id: u64,
    pub audio: Counters,
    pub video: Counters,
}

/// Receive side of the conference: one jitter engine per remote client,
/// created when its first object arrives.
///
/// `on_object` is called from transport threads; the pop methods from the
/// audio and video render threads. All paths are non-blocking.
pub struct MediaClient {
    engines: DashMap<u64, Arc<Jitter>>,
    config: Config,
    sink: Box<dyn EventSink>,
}

impl MediaClient {
    pub fn new(config: Config, sink: Box<dyn EventSink>) -> Self {
        MediaClient {
            engines: DashMap::new(),
            config,
            sink,
        }
    }

    fn engine_for(&self, client_id: u64) -> Arc<Jitter> {
        self.engines
            .entry(client_id)
            .or_insert_with(|| {
                let engine = Jitter::new(self.config.jitter_config());
                engine.set_audio_params(self.config.audio_params());
                engine.set_video_params(self.config.video_params());
                Arc::new(engine)
            })
            .clone()
    }

    /// Feed one delivered object payload. Fires the new-source event the
    /// first time a source id shows up within its client's engine.
    pub fn on_object(&self, name: ObjectName, payload: Bytes, now: Instant) -> AResult<()> {
        let mut packet = Packet::parse(payload).context("decoding object payload")?;
        packet.client_id = name.client_id;
        packet.source_id = name.source_id;

        let media_type = packet.media_type;
        let timestamp = packet.source_record_time;

        let engine = self.engine_for(name.client_id);
        if engine.push(packet, now) {
            self.sink.deliver(MediaEvent::NewSource {
                client_id: name.client_id,
                source_id: name.source_id,
                timestamp,
                media_type,
            });
        }

        Ok(())
    }

    /// Pull `length` bytes of playable audio for one remote client. A
    /// request for an unknown client gets silence rather than an error:
    /// render threads need something to write to the device either way.
    pub fn pop_audio(&self, name: ObjectName, length: usize, now: Instant) -> Packet {
        let Some(engine) = self.engines.get(&name.client_id).map(|e| Arc::clone(&e)) else {
            warn!("audio pop for unknown client {}", name.client_id);
            return Packet {
                client_id: name.client_id,
                source_id: name.source_id,
                media_type: self.config.audio_params().sample_type.media_type(),
                data: vec![0; length],
                ..Packet::default()
            };
        };

        engine.pop_audio(name.source_id, length, now)
    }

    /// Frame to render for one remote client this tick, or `None` when the
    /// client is unknown. Keyframe requests surface as events.
    pub fn pop_video(&self, name: ObjectName, now: Instant) -> Option<VideoFrame> {
        let engine = self.engines.get(&name.client_id).map(|e| Arc::clone(&e))?;

        let frame = engine.pop_video(name.source_id, now);

        if frame.idr_requested {
            self.sink.deliver(MediaEvent::IdrRequest(IdrRequest {
                client_id: name.client_id,
                source_id: name.source_id,
                source_timestamp: frame.timestamp(),
            }));
        }

        Some(VideoFrame {
            data: frame.data().to_vec(),
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            timestamp: frame.timestamp(),
            action: frame.action,
        })
    }

    /// Install a compressed-video decoder for one remote client.
    pub fn set_video_decoder(&self, client_id: u64, decoder: Box<dyn VideoDecoder>) {
        self.engine_for(client_id).set_video_decoder(decoder);
    }

    /// Drop a remote client's engine and everything it buffered.
    pub fn remove_client(&self, client_id: u64) {
        if let Some((_, engine)) = self.engines.remove(&client_id) {
            engine.flush();
        }
    }

    /// Read-only counter aggregation across all engines.
    pub fn metrics(&self) -> Vec<StreamMetrics> {
        self.engines
            .iter()
            .map(|entry| StreamMetrics {
                client_id: *entry.key(),
                audio: entry.value().audio_counters(),
                video: entry.value().video_counters(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;
    use bytes::BytesMut;
    use media_common::MediaType;

    fn wire_packet(seq: u64, media_type: MediaType) -> Bytes {
        let packet = Packet {
            encoded_sequence_num: seq,
            source_record_time: seq * 10_000,
            media_type,
            data: vec![0; 480 * 4],
            ..Packet::default()
        };

        let mut buf = BytesMut::new();
        packet.to_bytes(&mut buf);
        buf.freeze()
    }

    #[test]
    fn first_object_announces_the_source() {
        let (sink, events) = ChannelSink::bounded(8);
        let client = MediaClient::new(Config::default(), Box::new(sink));
        let name = ObjectName {
            client_id: 7,
            source_id: 1,
        };

        client
            .on_object(name, wire_packet(1, MediaType::F32), Instant::now())
            .unwrap();
        client
            .on_object(name, wire_packet(2, MediaType::F32), Instant::now())
            .unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            MediaEvent::NewSource {
                client_id: 7,
                source_id: 1,
                timestamp: 10_000,
                media_type: MediaType::F32,
            }
        );
        // only the first packet announces
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn malformed_objects_are_reported() {
        let (sink, _events) = ChannelSink::bounded(8);
        let client = MediaClient::new(Config::default(), Box::new(sink));
        let name = ObjectName {
            client_id: 7,
            source_id: 1,
        };

        let result = client.on_object(name, Bytes::from_static(&[1, 2, 3]), Instant::now());
        assert!(result.is_err());
    }

    #[test]
    fn unknown_streams_pop_silence() {
        let (sink, _events) = ChannelSink::bounded(8);
        let client = MediaClient::new(Config::default(), Box::new(sink));

        let packet = client.pop_audio(
            ObjectName {
                client_id: 404,
                source_id: 1,
            },
            1920,
            Instant::now(),
        );

        assert_eq!(packet.data.len(), 1920);
        assert!(packet.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn removed_clients_are_forgotten() {
        let (sink, _events) = ChannelSink::bounded(8);
        let client = MediaClient::new(Config::default(), Box::new(sink));
        let name = ObjectName {
            client_id: 7,
            source_id: 1,
        };

        client
            .on_object(name, wire_packet(1, MediaType::F32), Instant::now())
            .unwrap();
        assert_eq!(client.metrics().len(), 1);

        client.remove_client(7);
        assert!(client.metrics().is_empty());
    }
}
