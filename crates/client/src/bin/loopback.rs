//! Offline loopback: synthesise a tone, packetise it, run it through the
//! jitter engine and pop it back at render cadence. Useful for eyeballing
//! queue behaviour without a transport or devices.

use std::time::{Duration, Instant};

use anyhow::Result as AResult;
use bytes::BytesMut;
use log::info;

use jitter::SyncAction;
use media_common::{MediaType, Packet};
use murmur_client::{ChannelSink, Config, MediaClient, ObjectName};

const SAMPLE_RATE: u32 = 48_000;
const FRAME_MS: u64 = 10;
const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;
const FRAME_BYTES: usize = SAMPLES_PER_FRAME * size_of::<f32>();

const AUDIO_NAME: ObjectName = ObjectName {
    client_id: 1,
    source_id: 1,
};
const VIDEO_NAME: ObjectName = ObjectName {
    client_id: 1,
    source_id: 2,
};

fn tone_frame(seq: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(FRAME_BYTES);
    let base_sample = (seq - 1) * SAMPLES_PER_FRAME as u64;
    for i in 0..SAMPLES_PER_FRAME {
        let t = (base_sample + i as u64) as f32 / SAMPLE_RATE as f32;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.3;
        data.extend_from_slice(&sample.to_ne_bytes());
    }
    data
}

fn encode(packet: &Packet) -> bytes::Bytes {
    let mut buf = BytesMut::new();
    packet.to_bytes(&mut buf);
    buf.freeze()
}

fn audio_object(seq: u64) -> bytes::Bytes {
    encode(&Packet {
        encoded_sequence_num: seq,
        source_record_time: seq * FRAME_MS * 1000,
        media_type: MediaType::F32,
        data: tone_frame(seq),
        ..Packet::default()
    })
}

fn video_object(seq: u64) -> bytes::Bytes {
    encode(&Packet {
        encoded_sequence_num: seq,
        source_record_time: seq * 33_000,
        media_type: MediaType::Raw,
        is_intra_frame: seq % 30 == 1,
        data: vec![(seq % 256) as u8; 1024],
        ..Packet::default()
    })
}

fn main() -> AResult<()> {
    env_logger::init();

    let (sink, events) = ChannelSink::bounded(64);
    let client = MediaClient::new(Config::default(), Box::new(sink));

    let start = Instant::now();
    info!("running 2 s of interleaved push/pop, with audio loss between seq 120 and 140");

    let mut video_seq = 1u64;
    let mut concealed_pops = 0u64;
    for tick in 1..=200u64 {
        let now = start + Duration::from_millis(tick * FRAME_MS);

        // a burst of audio loss the engine has to conceal
        if !(120..140).contains(&tick) {
            client.on_object(AUDIO_NAME, audio_object(tick), now)?;
        }
        if tick % 3 == 0 {
            client.on_object(VIDEO_NAME, video_object(video_seq), now)?;
            video_seq += 1;
        }

        let packet = client.pop_audio(AUDIO_NAME, FRAME_BYTES, now);
        if packet.source_record_time == 0 {
            concealed_pops += 1;
        }

        if tick % 3 == 0
            && let Some(frame) = client.pop_video(VIDEO_NAME, now)
            && frame.action != SyncAction::Hold
        {
            info!(
                "video tick {tick}: {:?} {}x{} ts={}",
                frame.action, frame.width, frame.height, frame.timestamp
            );
        }

        while let Ok(event) = events.try_recv() {
            info!("event: {event:?}");
        }
    }

    for metrics in client.metrics() {
        info!(
            "client {}: audio={:?} video={:?}",
            metrics.client_id, metrics.audio, metrics.video
        );
    }
    info!("pops that played concealment or synthesised audio: {concealed_pops}");

    Ok(())
}
