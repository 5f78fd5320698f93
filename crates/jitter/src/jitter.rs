use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use log::{debug, info, warn};
use media_common::{MediaType, Packet};

use crate::audio_assembler::{self, AudioAssembler};
use crate::codec::{DecodedFrame, RawDecoder, VideoDecoder};
use crate::config::{AudioParams, JitterConfig, PixelFormat, VideoParams};
use crate::full_fill::FullFill;
use crate::leaky_bucket::LeakyBucket;
use crate::meta_queue::{AUDIO_MAX_FRAMES, Counters, MetaQueue, VIDEO_MAX_FRAMES};
use crate::playout::{JitterCalc, PopFrequencyCounter};
use crate::silence::SilenceDetector;
use crate::sync::{StreamSync, SyncAction};
use crate::video_assembler::VideoAssembler;

/// Nominal packet duration until the first real frame tells us better.
const DEFAULT_MS_PER_PACKET: u64 = 10;

/// Frames video-only playout keeps queued as its own small cushion.
const VIDEO_ONLY_BACKLOG: usize = 2;

struct AudioPlayout {
    queue: MetaQueue,
    playout: FullFill,
    source_id: Option<u64>,
    client_id: u64,
    params: AudioParams,
    ms_per_packet: Option<u64>,
    assembler: Option<AudioAssembler>,
    silence: SilenceDetector,
    fps: PopFrequencyCounter,
    bucket: LeakyBucket,
    jitter_calc: JitterCalc,
}

impl AudioPlayout {
    /// Cadence of this stream, measured from the first genuine media frame
    /// and cached. 10 ms until anything has been seen.
    fn ms_per_packet(&mut self) -> u64 {
        if let Some(ms) = self.ms_per_packet {
            return ms;
        }

        let bytes_per_frame = self.params.bytes_per_frame();
        let discovered = self.queue.iter().find_map(|frame| {
            if frame.kind != crate::meta_queue::FrameKind::Media || frame.packet.data.is_empty() {
                return None;
            }
            let samples_per_channel = frame.packet.data.len() / bytes_per_frame;
            let ms = samples_per_channel as u64 * 1000 / self.params.sample_rate as u64;
            (ms > 0).then_some(ms)
        });

        self.ms_per_packet = discovered;
        discovered.unwrap_or(DEFAULT_MS_PER_PACKET)
    }

    fn ms_in_queue(&mut self) -> u64 {
        self.queue.len() as u64 * self.ms_per_packet()
    }

    /// Byte length of one nominal audio frame at the configured format.
    fn frame_size(&mut self) -> usize {
        let ms = self.ms_per_packet();
        let samples_per_channel = self.params.sample_rate as u64 * ms / 1000;
        samples_per_channel as usize * self.params.bytes_per_frame()
    }

    fn create_plc(&mut self, byte_len: usize) -> Packet {
        audio_assembler::plc_or_silence(self.assembler.as_ref(), byte_len, self.params.sample_type)
    }

    fn pop_frame(&mut self, now: Instant) -> Option<Packet> {
        let packet = self.queue.pop(now)?;
        self.fps.update(now);
        Some(packet)
    }

    /// Trim the head down to `target_ms` worth of frames. Used while the
    /// client has not started popping, so nothing is played out of order.
    fn prune(&mut self, now: Instant, target_ms: u64) {
        let frames_target = (target_ms / self.ms_per_packet()) as usize;
        while self.queue.len() > frames_target {
            self.queue.pop(now);
        }
    }
}

struct VideoPlayout {
    queue: MetaQueue,
    assembler: VideoAssembler,
    source_id: Option<u64>,
    fps: PopFrequencyCounter,
    decoder: Option<Box<dyn VideoDecoder>>,
    raw_decoder: RawDecoder,
    last_frame: DecodedFrame,
    last_timestamp: u64,
}

impl VideoPlayout {
    fn pop_frame(&mut self, now: Instant) -> Option<Packet> {
        let packet = self.queue.pop(now)?;
        self.fps.update(now);
        Some(packet)
    }

    /// Decode one popped frame into the last-decoded slot. Returns true
    /// when the frame was undecodable and a keyframe should be requested.
    fn decode_packet(&mut self, packet: Packet, sync: &mut StreamSync, now: Instant) -> bool {
        let decoder: &mut dyn VideoDecoder = match packet.media_type {
            MediaType::Raw => &mut self.raw_decoder,
            MediaType::H264 => match self.decoder.as_deref_mut() {
                Some(decoder) => decoder,
                None => {
                    warn!("compressed video frame but no decoder installed");
                    self.queue.counters.discarded += 1;
                    return true;
                }
            },
            other => {
                warn!("unexpected media type in video queue: {other:?}");
                return false;
            }
        };

        match decoder.decode(&packet.data, &mut self.last_frame) {
            Ok(()) => {
                sync.video_popped(packet.source_record_time, packet.encoded_sequence_num, now);
                self.last_timestamp = packet.source_record_time;
                false
            }
            Err(err) => {
                // previous picture keeps showing until the next keyframe
                // restarts the decoder
                warn!("video decode failed: {err}");
                true
            }
        }
    }
}

/// Borrowed view of the current video output, valid until the next pop on
/// the same stream. Header fields always describe `data`.
pub struct VideoFrameRef<'a> {
    guard: MutexGuard<'a, VideoPlayout>,
    pub action: SyncAction,
    pub popped: usize,
    /// The scheduler wants the publisher to emit a keyframe now.
    pub idr_requested: bool,
}

impl VideoFrameRef<'_> {
    pub fn data(&self) -> &[u8] {
        &self.guard.last_frame.data
    }

    pub fn width(&self) -> u32 {
        self.guard.last_frame.width
    }

    pub fn height(&self) -> u32 {
        self.guard.last_frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.guard.last_frame.format
    }

    pub fn timestamp(&self) -> u64 {
        self.guard.last_timestamp
    }
}

/// One client's receive-side engine: an audio stream and a video stream
/// kept in lip sync.
///
/// Writers (network ingest) call [`Jitter::push`]; the audio and video
/// render threads call [`Jitter::pop_audio`] and [`Jitter::pop_video`] at
/// device cadence. Each direction is guarded by its own mutex, with the
/// shared sync state locked after either; pops never block on the network
/// and always produce output.
pub struct Jitter {
    audio: Mutex<AudioPlayout>,
    video: Mutex<VideoPlayout>,
    sync: Mutex<StreamSync>,

    /// True until the first pop. While set, pushes keep the audio queue
    /// trimmed so a late-starting client does not begin seconds behind.
    idle_client: AtomicBool,
    /// Mirror of the audio pop cadence for the video path, which must not
    /// take the audio lock.
    audio_pop_delay_ms: AtomicU64,

    config: JitterConfig,
}

impl Jitter {
    pub fn new(config: JitterConfig) -> Self {
        let (target, max) = config.bucket_mode.levels();
        Jitter::with_bucket_levels(config, target, max)
    }

    /// Engine with explicit reservoir levels, overriding the mode presets.
    pub fn with_bucket_levels(config: JitterConfig, target_ms: u64, max_ms: u64) -> Self {
        Jitter {
            audio: Mutex::new(AudioPlayout {
                queue: MetaQueue::new(AUDIO_MAX_FRAMES),
                playout: FullFill::new(),
                source_id: None,
                client_id: 0,
                params: AudioParams::default(),
                ms_per_packet: None,
                assembler: None,
                silence: SilenceDetector::new(),
                fps: PopFrequencyCounter::new(),
                bucket: LeakyBucket::with_levels(target_ms, max_ms),
                jitter_calc: JitterCalc::new(config.num_std),
            }),
            video: Mutex::new(VideoPlayout {
                queue: MetaQueue::new(VIDEO_MAX_FRAMES),
                assembler: VideoAssembler::new(),
                source_id: None,
                fps: PopFrequencyCounter::new(),
                decoder: None,
                raw_decoder: RawDecoder,
                last_frame: DecodedFrame::grey(VideoParams::default()),
                last_timestamp: 0,
            }),
            sync: Mutex::new(StreamSync::new()),
            idle_client: AtomicBool::new(true),
            audio_pop_delay_ms: AtomicU64::new(0),
            config,
        }
    }

    pub fn set_audio_params(&self, params: AudioParams) {
        let mut audio = self.lock_audio();
        audio.params = params;
        // decoder state depends on rate and channel count
        audio.assembler = None;
        audio.ms_per_packet = None;
    }

    pub fn set_video_params(&self, params: VideoParams) {
        let mut video = self.lock_video();
        info!(
            "video params: {}x{} {:?}",
            params.max_width, params.max_height, params.pixel_format
        );
        video.last_frame = DecodedFrame::grey(params);
    }

    pub fn set_video_decoder(&self, decoder: Box<dyn VideoDecoder>) {
        self.lock_video().decoder = Some(decoder);
    }

    /// Route one delivered media packet. Returns true the first time this
    /// engine sees the packet's direction, so the host can announce the
    /// source.
    pub fn push(&self, packet: Packet, now: Instant) -> bool {
        match packet.media_type {
            MediaType::Opus => self.push_opus(packet, now),
            MediaType::L16 | MediaType::F32 => self.push_raw_audio(packet, now),
            MediaType::H264 | MediaType::Raw => self.push_video(packet, now),
        }
    }

    fn push_opus(&self, packet: Packet, now: Instant) -> bool {
        let mut audio = self.lock_audio();
        let new_stream = self.note_audio_source(&mut audio, &packet);

        if audio.assembler.is_none() {
            match AudioAssembler::new(audio.params) {
                Ok(assembler) => audio.assembler = Some(assembler),
                Err(err) => {
                    warn!("audio decoder unavailable: {err}");
                    audio.queue.counters.discarded += 1;
                    return new_stream;
                }
            }
        }

        let decoded = match audio.assembler.as_ref().expect("just created").push(packet) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("audio decode failed, skipping packet: {err}");
                audio.queue.counters.discarded += 1;
                return new_stream;
            }
        };

        self.queue_audio_frame(&mut audio, decoded, now);
        new_stream
    }

    fn push_raw_audio(&self, packet: Packet, now: Instant) -> bool {
        let mut audio = self.lock_audio();
        let new_stream = self.note_audio_source(&mut audio, &packet);

        if packet.media_type == MediaType::F32 {
            if !audio.silence.is_inited() && !packet.data.is_empty() {
                let samples_per_channel = packet.data.len() / audio.params.bytes_per_frame();
                let (rate, channels) = (audio.params.sample_rate, audio.params.channels);
                audio.silence.init(samples_per_channel, rate, channels as usize);
            }
            audio.silence.update(&packet.data);
        }

        self.queue_audio_frame(&mut audio, packet, now);
        new_stream
    }

    fn note_audio_source(&self, audio: &mut AudioPlayout, packet: &Packet) -> bool {
        if audio.source_id.is_some() {
            return false;
        }
        info!(
            "new audio source {} from client {}",
            packet.source_id, packet.client_id
        );
        audio.source_id = Some(packet.source_id);
        audio.client_id = packet.client_id;
        true
    }

    fn queue_audio_frame(&self, audio: &mut AudioPlayout, packet: Packet, now: Instant) {
        let last_popped = self.lock_sync().audio_seq_popped;
        audio.queue.push_audio(packet, last_popped, now);

        let ms_per_packet = audio.ms_per_packet();
        let frame_size = audio.frame_size();

        {
            let AudioPlayout {
                queue,
                assembler,
                params,
                ..
            } = &mut *audio;
            queue.insert_audio_plcs(now, |_seq| {
                audio_assembler::plc_or_silence(assembler.as_ref(), frame_size, params.sample_type)
            });
        }

        let AudioPlayout {
            queue, jitter_calc, ..
        } = &mut *audio;
        jitter_calc.update(queue, ms_per_packet);

        if self.config.idle_prune
            && self.idle_client.load(Ordering::Relaxed)
            && !audio.queue.is_empty()
        {
            let target = audio.bucket.recommended_fill_level(audio.jitter_calc.jitter_ms());
            audio.prune(now, target);
        }
    }

    fn push_video(&self, packet: Packet, now: Instant) -> bool {
        let mut video = self.lock_video();

        let new_stream = video.source_id.is_none();
        if new_stream {
            info!(
                "new video source {} from client {}",
                packet.source_id, packet.client_id
            );
            video.source_id = Some(packet.source_id);
        }

        let Some(frame) = video.assembler.push(packet) else {
            return new_stream;
        };

        let last_popped = self.lock_sync().video_seq_popped;
        let seq = frame.encoded_sequence_num;
        video.queue.push_video(frame, last_popped, now);
        debug!("video push: seq={seq} depth={}", video.queue.len());

        new_stream
    }

    /// Pull exactly `length` bytes of playable audio. Always returns:
    /// anything the queue cannot provide is concealed, and a pop for a
    /// source this engine does not own comes back as plain silence.
    pub fn pop_audio(&self, source_id: u64, length: usize, now: Instant) -> Packet {
        self.idle_client.store(false, Ordering::Relaxed);

        let mut audio = self.lock_audio();
        if audio.source_id != Some(source_id) {
            warn!(
                "audio pop for source {source_id}, engine owns {:?}",
                audio.source_id
            );
            let mut silence =
                audio_assembler::create_zero_payload(length, audio.params.sample_type);
            silence.client_id = audio.client_id;
            silence.source_id = source_id;
            return silence;
        }

        self.queue_monitor(&mut audio, now);

        let divisor = audio.params.bytes_per_frame();
        let sample_rate = audio.params.sample_rate;
        audio.playout.set_sample_divisor(divisor);
        audio.playout.set_sample_rate(sample_rate);

        // one silence-length correction per client pull at most
        let mut num_depth_adjustments = 1;

        while audio.playout.total_in_buffers() < length {
            let frame_size = audio.frame_size();
            let ms_in_queue = audio.ms_in_queue();
            let jitter_ms = audio.jitter_calc.jitter_ms();

            let mut packet: Option<Packet> = None;

            if audio.bucket.initial_fill(ms_in_queue, jitter_ms) {
                // still building the reservoir: play concealment only
                let mut plc = audio.create_plc(frame_size);
                plc.source_record_time = 0;
                packet = Some(plc);
            } else {
                let ratio = audio.bucket.resample_ratio();

                if num_depth_adjustments > 0 && ratio > 1.0 && audio.silence.is_silence() {
                    // queue too shallow: stretch the ongoing silence rather
                    // than drain it further; never stretch a talk spurt
                    let mut plc = audio.create_plc(frame_size);
                    plc.source_record_time = 0;
                    num_depth_adjustments -= 1;
                    audio.bucket.adjust_depth_tracker_for_discarded(1);
                    packet = Some(plc);
                }

                if packet.is_none() {
                    match audio.pop_frame(now) {
                        None => {
                            audio.bucket.empty_bucket(now);
                            let mut plc = audio.create_plc(frame_size);
                            plc.source_record_time = 0;
                            packet = Some(plc);
                        }
                        Some(popped) => {
                            if num_depth_adjustments > 0
                                && ratio < 1.0
                                && audio.silence.is_silence()
                                && audio.queue.total_packet_bytes() > length
                            {
                                // queue too deep inside a silence region:
                                // absorb the skew by dropping this frame
                                num_depth_adjustments -= 1;
                                audio.bucket.adjust_depth_tracker_for_discarded(-1);
                            } else {
                                self.lock_sync().audio_popped(
                                    popped.source_record_time,
                                    popped.encoded_sequence_num,
                                    now,
                                );
                                packet = Some(popped);
                            }
                        }
                    }
                }
            }

            if let Some(p) = packet {
                audio.playout.add_buffer(&p.data, p.source_record_time);
            }
        }

        self.audio_pop_delay_ms
            .store(audio.fps.average_pop_delay_ms(), Ordering::Relaxed);

        let (data, timestamp) = audio
            .playout
            .fill(length)
            .expect("reservoir holds at least `length` bytes");

        Packet {
            client_id: audio.client_id,
            source_id,
            encoded_sequence_num: self.lock_sync().audio_seq_popped.unwrap_or(0),
            source_record_time: timestamp,
            media_type: audio.params.sample_type.media_type(),
            data,
            ..Packet::default()
        }
    }

    /// Produce the frame to render this tick. The scheduler decides whether
    /// to decode new frames, drop to the next keyframe, free-run without
    /// audio, or re-emit the previous picture. A pop for a source this
    /// engine does not own holds on the current frame.
    pub fn pop_video(&self, source_id: u64, now: Instant) -> VideoFrameRef<'_> {
        self.idle_client.store(false, Ordering::Relaxed);

        let mut video = self.lock_video();
        if video.source_id != Some(source_id) {
            warn!(
                "video pop for source {source_id}, engine owns {:?}",
                video.source_id
            );
            return VideoFrameRef {
                guard: video,
                action: SyncAction::Hold,
                popped: 0,
                idr_requested: false,
            };
        }

        if video.queue.is_empty() {
            return VideoFrameRef {
                guard: video,
                action: SyncAction::Hold,
                popped: 0,
                idr_requested: false,
            };
        }

        let mut sync = self.lock_sync();
        let (action, num_pop) = sync.video_action(
            self.audio_pop_delay_ms.load(Ordering::Relaxed),
            video.fps.average_pop_delay_ms(),
            &video.queue,
            now,
        );

        let mut idr_requested = false;
        let mut popped = 0;

        match action {
            SyncAction::Hold => {}
            SyncAction::Pop => {
                for _ in 0..num_pop {
                    if let Some(packet) = video.pop_frame(now) {
                        idr_requested |= video.decode_packet(packet, &mut sync, now);
                        popped += 1;
                    }
                }
            }
            SyncAction::PopDiscard => {
                for _ in 0..num_pop {
                    if video.pop_frame(now).is_some() {
                        popped += 1;
                    }
                }
                idr_requested = true;
                debug!("discarded {popped} undecodable frames, requesting keyframe");
            }
            SyncAction::PopVideoOnly => {
                let drain = video.queue.len().saturating_sub(VIDEO_ONLY_BACKLOG);
                for _ in 0..drain {
                    if let Some(packet) = video.pop_frame(now) {
                        idr_requested |= video.decode_packet(packet, &mut sync, now);
                        popped += 1;
                    }
                }
            }
        }
        drop(sync);

        VideoFrameRef {
            guard: video,
            action,
            popped,
            idr_requested,
        }
    }

    /// Jitter estimate and reservoir control, run once per audio pull.
    fn queue_monitor(&self, audio: &mut AudioPlayout, now: Instant) {
        let last_popped = self.lock_sync().audio_seq_popped;
        let (lost, plcs) = audio.queue.lost_in_queue(last_popped);
        audio.queue.counters.lost = lost;

        let depth_ms = audio.ms_in_queue();
        let jitter_ms = audio.jitter_calc.jitter_ms();
        let ms_per_packet = audio.ms_per_packet();
        let fps = audio.fps.fps();

        debug!(
            "queue monitor: depth={depth_ms}ms lost={lost} plcs={plcs} jitter={jitter_ms}ms"
        );
        audio
            .bucket
            .tick(now, depth_ms, lost, jitter_ms, ms_per_packet, fps);
    }

    pub fn audio_source(&self) -> Option<u64> {
        self.lock_audio().source_id
    }

    pub fn video_source(&self) -> Option<u64> {
        self.lock_video().source_id
    }

    pub fn audio_counters(&self) -> Counters {
        self.lock_audio().queue.counters
    }

    pub fn video_counters(&self) -> Counters {
        self.lock_video().queue.counters
    }

    /// Current audio queue depth in frames, for observability.
    pub fn audio_depth(&self) -> usize {
        self.lock_audio().queue.len()
    }

    /// Drop all buffered media, typically on host shutdown.
    pub fn flush(&self) {
        self.lock_audio().queue.flush();
        self.lock_video().queue.flush();
    }

    fn lock_audio(&self) -> MutexGuard<'_, AudioPlayout> {
        self.audio.lock().expect("audio mutex poisoned")
    }

    fn lock_video(&self) -> MutexGuard<'_, VideoPlayout> {
        self.video.lock().expect("video mutex poisoned")
    }

    fn lock_sync(&self) -> MutexGuard<'_, StreamSync> {
        self.sync.lock().expect("sync mutex poisoned")
    }
}
