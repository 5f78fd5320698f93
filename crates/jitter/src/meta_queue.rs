use std::collections::VecDeque;
use std::time::Instant;

use log::debug;
use media_common::Packet;

/// Quality of a queued slot. Ordering is the upgrade lattice: a slot only
/// ever moves towards `Media`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameKind {
    PlcGenerated,
    PlcDual,
    Media,
}

#[derive(Debug)]
pub struct MetaFrame {
    pub kind: FrameKind,
    /// Kind this slot upgraded from, if a better frame replaced concealment.
    pub prev_kind: Option<FrameKind>,
    pub recv_time: Instant,
    pub packet: Packet,
}

/// Cumulative per-queue statistics, read outside the hot path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total: u64,
    pub total_popped: u64,
    pub lost: u64,
    pub discarded: u64,
    pub discarded_repeats: u64,
    pub concealed_interpolated: u64,
    pub concealed_generated: u64,
    pub missing: u64,
}

/// Ordered per-stream queue of media frames keyed by sequence number.
///
/// Pushes keep the queue sorted whatever the arrival order; collisions are
/// resolved by the upgrade rule for audio and dropped as repeats for video.
pub struct MetaQueue {
    frames: VecDeque<MetaFrame>,
    pub counters: Counters,
    max_size: usize,
}

pub const AUDIO_MAX_FRAMES: usize = 500;
// RAW 1080p30 at 3000 packets per frame for one second
pub const VIDEO_MAX_FRAMES: usize = 3000 * 30;

impl MetaQueue {
    pub fn new(max_size: usize) -> Self {
        MetaQueue {
            frames: VecDeque::new(),
            counters: Counters::default(),
            max_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn front(&self) -> Option<&MetaFrame> {
        self.frames.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaFrame> {
        self.frames.iter()
    }

    pub fn total_packet_bytes(&self) -> usize {
        self.frames.iter().map(|f| f.packet.data.len()).sum()
    }

    pub fn next_seq(&self) -> Option<u64> {
        self.frames.front().map(|f| f.packet.encoded_sequence_num)
    }

    pub fn next_source_time(&self) -> Option<u64> {
        self.frames.front().map(|f| f.packet.source_record_time)
    }

    pub fn flush(&mut self) {
        self.frames.clear();
    }

    fn drain_to_max(&mut self) {
        while self.frames.len() > self.max_size {
            self.frames.pop_front();
            self.counters.discarded += 1;
        }
    }

    /// Insert an audio media frame at its sequence position. Late frames
    /// (at or before the last popped sequence) are dropped; a frame landing
    /// on an occupied slot either upgrades a concealment entry or is
    /// counted as a repeat.
    pub fn push_audio(&mut self, packet: Packet, last_seq_popped: Option<u64>, now: Instant) {
        let new_seq = packet.encoded_sequence_num;

        if let Some(last) = last_seq_popped
            && new_seq <= last
        {
            self.counters.discarded += 1;
            return;
        }

        let frame = MetaFrame {
            kind: FrameKind::Media,
            prev_kind: None,
            recv_time: now,
            packet,
        };

        let tail_seq = self.frames.back().map(|f| f.packet.encoded_sequence_num);
        if tail_seq.is_none_or(|tail| new_seq > tail) {
            self.frames.push_back(frame);
            self.counters.total += 1;
            self.drain_to_max();
            return;
        }

        // out of order: retransmissions, frames replacing concealment
        for idx in 0..self.frames.len() {
            let curr = &self.frames[idx];
            let curr_seq = curr.packet.encoded_sequence_num;

            if new_seq < curr_seq {
                self.frames.insert(idx, frame);
                self.counters.total += 1;
                self.drain_to_max();
                return;
            }

            if new_seq == curr_seq {
                match curr.kind {
                    FrameKind::Media => {
                        self.counters.discarded_repeats += 1;
                    }
                    FrameKind::PlcDual => {
                        self.counters.concealed_interpolated =
                            self.counters.concealed_interpolated.saturating_sub(1);
                        self.counters.total += 1;
                        self.frames[idx] = MetaFrame {
                            prev_kind: Some(FrameKind::PlcDual),
                            ..frame
                        };
                    }
                    FrameKind::PlcGenerated => {
                        self.counters.concealed_generated =
                            self.counters.concealed_generated.saturating_sub(1);
                        self.counters.total += 1;
                        self.frames[idx] = MetaFrame {
                            prev_kind: Some(FrameKind::PlcGenerated),
                            ..frame
                        };
                    }
                }
                return;
            }
        }
    }

    /// Insert a video frame at its sequence position. Video slots carry no
    /// concealment, so any collision is a repeat.
    pub fn push_video(&mut self, packet: Packet, last_seq_popped: Option<u64>, now: Instant) {
        let new_seq = packet.encoded_sequence_num;

        if let Some(last) = last_seq_popped
            && new_seq <= last
        {
            self.counters.discarded += 1;
            return;
        }

        let frame = MetaFrame {
            kind: FrameKind::Media,
            prev_kind: None,
            recv_time: now,
            packet,
        };

        let tail_seq = self.frames.back().map(|f| f.packet.encoded_sequence_num);
        if tail_seq.is_none_or(|tail| new_seq > tail) {
            self.frames.push_back(frame);
            self.counters.total += 1;
            self.drain_to_max();
            return;
        }

        for idx in 0..self.frames.len() {
            let curr_seq = self.frames[idx].packet.encoded_sequence_num;

            if new_seq < curr_seq {
                self.frames.insert(idx, frame);
                self.counters.total += 1;
                self.drain_to_max();
                return;
            }

            if new_seq == curr_seq {
                self.counters.discarded_repeats += 1;
                return;
            }
        }
    }

    pub fn pop(&mut self, _now: Instant) -> Option<Packet> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.counters.total_popped += 1;
                Some(frame.packet)
            }
            None => {
                self.counters.missing += 1;
                None
            }
        }
    }

    /// Fill every sequence gap with generated concealment frames produced by
    /// `make_plc`. Safe to call after every push: media never gets replaced,
    /// so reruns find no gaps.
    pub fn insert_audio_plcs<F>(&mut self, now: Instant, mut make_plc: F)
    where
        F: FnMut(u64) -> Packet,
    {
        let mut idx = 1;
        while idx < self.frames.len() {
            let prev_seq = self.frames[idx - 1].packet.encoded_sequence_num;
            let curr_seq = self.frames[idx].packet.encoded_sequence_num;

            let gap = curr_seq - prev_seq;
            if gap > 1 {
                debug!("concealing {} missing audio frames after seq {prev_seq}", gap - 1);
                for offset in 1..gap {
                    let mut packet = make_plc(prev_seq + offset);
                    packet.encoded_sequence_num = prev_seq + offset;
                    self.frames.insert(
                        idx,
                        MetaFrame {
                            kind: FrameKind::PlcGenerated,
                            prev_kind: None,
                            recv_time: now,
                            packet,
                        },
                    );
                    self.counters.concealed_generated += 1;
                    idx += 1;
                }
            }

            idx += 1;
        }
    }

    /// Count of sequence discontinuities relative to the last popped frame,
    /// plus concealment entries still queued.
    pub fn lost_in_queue(&self, last_seq_popped: Option<u64>) -> (u64, u64) {
        let mut lost = 0;
        let mut num_plc = 0;
        let mut prev_seq = last_seq_popped;

        for frame in &self.frames {
            let seq = frame.packet.encoded_sequence_num;
            if let Some(prev) = prev_seq
                && seq != prev + 1
            {
                lost += 1;
            }
            prev_seq = Some(seq);

            if frame.kind != FrameKind::Media {
                num_plc += 1;
            }
        }

        (lost, num_plc)
    }
}
