use std::collections::VecDeque;
use std::time::Instant;

use crate::meta_queue::{FrameKind, MetaQueue};

const WINDOW_MS: u64 = 1000;

/// Rolling window of inter-pop delays over the last second. Tells the
/// engine how fast the client is actually pulling media.
pub struct PopFrequencyCounter {
    deltas: VecDeque<u64>,
    interval_sum: u64,
    last_pop: Option<Instant>,
}

impl PopFrequencyCounter {
    pub fn new() -> Self {
        PopFrequencyCounter {
            deltas: VecDeque::new(),
            interval_sum: 0,
            last_pop: None,
        }
    }

    pub fn update(&mut self, now: Instant) {
        let Some(last) = self.last_pop else {
            self.last_pop = Some(now);
            return;
        };

        let delta = now.duration_since(last).as_millis() as u64;
        self.last_pop = Some(now);

        if self.interval_sum + delta > WINDOW_MS
            && let Some(oldest) = self.deltas.pop_front()
        {
            self.interval_sum -= oldest;
        }

        self.interval_sum += delta;
        self.deltas.push_back(delta);
    }

    /// Moving average of the delay between pops, in milliseconds.
    pub fn average_pop_delay_ms(&self) -> u64 {
        if self.deltas.is_empty() {
            return 0;
        }
        self.interval_sum / self.deltas.len() as u64
    }

    pub fn fps(&self) -> u64 {
        let delay = self.average_pop_delay_ms();
        if delay == 0 { 0 } else { 1000 / delay }
    }
}

impl Default for PopFrequencyCounter {
    fn default() -> Self {
        PopFrequencyCounter::new()
    }
}

/// Sliding-window estimator of inter-arrival jitter.
///
/// Only consecutive first-delivery media frames contribute: concealment and
/// retransmission slots say nothing about network pacing. The exposed value
/// is `ceil(num_std * sigma) + 1` milliseconds, zero while the window is
/// empty.
pub struct JitterCalc {
    values: VecDeque<u64>,
    prev_seq: Option<u64>,
    prev_time: Option<Instant>,
    num_std: u32,
}

impl JitterCalc {
    pub fn new(num_std: u32) -> Self {
        JitterCalc {
            values: VecDeque::new(),
            prev_seq: None,
            prev_time: None,
            num_std,
        }
    }

    /// Scan the (sorted) queue for fresh consecutive media pairs and record
    /// how far each arrival deviated from the nominal cadence.
    pub fn update(&mut self, queue: &MetaQueue, ms_per_packet: u64) {
        if ms_per_packet == 0 {
            return;
        }

        for frame in queue.iter() {
            if frame.kind != FrameKind::Media || frame.prev_kind.is_some() {
                continue;
            }

            let seq = frame.packet.encoded_sequence_num;
            let (Some(prev_seq), Some(prev_time)) = (self.prev_seq, self.prev_time) else {
                self.prev_seq = Some(seq);
                self.prev_time = Some(frame.recv_time);
                continue;
            };

            // the whole queue is rescanned every push: skip what we already
            // evaluated
            if seq <= prev_seq {
                continue;
            }

            if seq == prev_seq + 1 {
                let delta = frame.recv_time.duration_since(prev_time).as_millis() as u64;
                self.values.push_back(delta.abs_diff(ms_per_packet));
            }

            self.prev_seq = Some(seq);
            self.prev_time = Some(frame.recv_time);
        }

        let limit = (WINDOW_MS / ms_per_packet) as usize;
        while self.values.len() > limit {
            self.values.pop_front();
        }
    }

    fn std_deviation(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<u64>() as f64 / n;
        let variance = self
            .values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;

        variance.sqrt()
    }

    pub fn jitter_ms(&self) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        (self.num_std as f64 * self.std_deviation()).ceil() as u64 + 1
    }
}
