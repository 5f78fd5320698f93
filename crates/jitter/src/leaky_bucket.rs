use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::BucketMode;

const TRACKER_INTERVAL_MS: u64 = 1000;
const FILL_HYSTERESIS_MS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainSpeed {
    Normal,
    Increased,
    Decreased,
}

/// Drain controller for the audio queue, modelled as a reservoir with a
/// target depth.
///
/// Each tick compares the current depth against the larger of the
/// configured target and the measured jitter; the resulting drain state
/// maps to a resample ratio the pop path uses to speed up or slow down
/// consumption. `initial_fill` holds playback until the reservoir first
/// reaches its recommended level and then stays released for the stream's
/// lifetime.
pub struct LeakyBucket {
    target_fill_level: u64,
    max_bucket_size: u64,
    initial_fill: bool,
    current_drain: DrainSpeed,
    fill_change: i64,

    queue_depth_tracker: VecDeque<(i64, Instant)>,
    empty_pop_tracker: VecDeque<(u32, Instant)>,
}

impl LeakyBucket {
    pub fn new(mode: BucketMode) -> Self {
        let (target, max) = mode.levels();
        LeakyBucket::with_levels(target, max)
    }

    /// Direct control over the fill levels, for hosts that tune beyond the
    /// two presets.
    pub fn with_levels(target_fill_ms: u64, max_bucket_ms: u64) -> Self {
        LeakyBucket {
            target_fill_level: target_fill_ms,
            max_bucket_size: max_bucket_ms,
            initial_fill: true,
            current_drain: DrainSpeed::Normal,
            fill_change: 0,
            queue_depth_tracker: VecDeque::new(),
            empty_pop_tracker: VecDeque::new(),
        }
    }

    /// Record a pop that found the queue empty.
    pub fn empty_bucket(&mut self, now: Instant) {
        self.empty_pop_tracker.push_back((1, now));
    }

    /// Depth the queue should sit at given the measured jitter: at least
    /// the configured target, never past the bucket bound.
    pub fn recommended_fill_level(&self, audio_jitter_ms: u64) -> u64 {
        self.target_fill_level.max(audio_jitter_ms).min(self.max_bucket_size)
    }

    /// True while playback should hold for the reservoir to reach its
    /// recommended level. Latches to false once reached.
    pub fn initial_fill(&mut self, ms_in_queue: u64, jitter_ms: u64) -> bool {
        if self.initial_fill && ms_in_queue >= self.recommended_fill_level(jitter_ms) {
            self.initial_fill = false;
        }
        self.initial_fill
    }

    fn prune<T>(tracker: &mut VecDeque<(T, Instant)>, now: Instant) {
        let cut_off = now - Duration::from_millis(TRACKER_INTERVAL_MS);
        while tracker.front().is_some_and(|&(_, at)| at < cut_off) {
            tracker.pop_front();
        }
    }

    pub fn tick(
        &mut self,
        now: Instant,
        queue_depth_ms: u64,
        lost_in_queue: u64,
        audio_jitter_ms: u64,
        ms_per_audio: u64,
        fps: u64,
    ) {
        if self.initial_fill(queue_depth_ms, audio_jitter_ms) {
            return;
        }

        self.queue_depth_tracker.push_back((queue_depth_ms as i64, now));
        Self::prune(&mut self.queue_depth_tracker, now);
        Self::prune(&mut self.empty_pop_tracker, now);

        let target = self.recommended_fill_level(audio_jitter_ms);
        self.fill_change = queue_depth_ms as i64 - target as i64;

        self.current_drain = if self.fill_change > FILL_HYSTERESIS_MS {
            DrainSpeed::Increased
        } else if self.fill_change < -FILL_HYSTERESIS_MS {
            DrainSpeed::Decreased
        } else {
            DrainSpeed::Normal
        };

        debug!(
            "bucket tick: depth={queue_depth_ms}ms target={target}ms lost={lost_in_queue} \
             jitter={audio_jitter_ms}ms cadence={ms_per_audio}ms fps={fps} drain={:?}",
            self.current_drain
        );
    }

    /// Playback speed correction: below 1.0 drains the queue, above 1.0
    /// lets it refill.
    pub fn resample_ratio(&self) -> f64 {
        match self.current_drain {
            DrainSpeed::Normal => 1.0,
            DrainSpeed::Increased => 0.9,
            DrainSpeed::Decreased => 1.1,
        }
    }

    /// Shift the recorded depths after silence frames were injected or
    /// thrown away, so the tracker reflects what playback actually saw.
    pub fn adjust_depth_tracker_for_discarded(&mut self, num: i64) {
        for (depth, _) in &mut self.queue_depth_tracker {
            *depth += num;
        }
    }
}
