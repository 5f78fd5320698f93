use std::time::Instant;

use crate::meta_queue::MetaQueue;

/// How long video keeps waiting for audio before free-running.
const AUDIO_STALL_MS: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Emit the last decoded frame again.
    Hold,
    /// Decode `num_pop` frames in order and emit the last.
    Pop,
    /// Drop `num_pop` undecodable frames and ask upstream for a keyframe.
    PopDiscard,
    /// Audio is gone: drain the queue down to a small backlog, decoding.
    PopVideoOnly,
}

/// Cross-stream playout state: what audio and video last handed to the
/// client, in both source time and local time.
pub struct StreamSync {
    pub local_audio_pop_time: Option<Instant>,
    pub source_audio_time_popped: u64,
    pub audio_seq_popped: Option<u64>,

    pub local_video_pop_time: Option<Instant>,
    pub source_video_time_popped: u64,
    pub video_seq_popped: Option<u64>,
}

impl StreamSync {
    pub fn new() -> Self {
        StreamSync {
            local_audio_pop_time: None,
            source_audio_time_popped: 0,
            audio_seq_popped: None,
            local_video_pop_time: None,
            source_video_time_popped: 0,
            video_seq_popped: None,
        }
    }

    pub fn audio_popped(&mut self, source_time: u64, seq: u64, now: Instant) {
        self.source_audio_time_popped = source_time;
        self.audio_seq_popped = Some(seq);
        self.local_audio_pop_time = Some(now);
    }

    pub fn video_popped(&mut self, source_time: u64, seq: u64, now: Instant) {
        self.source_video_time_popped = source_time;
        self.video_seq_popped = Some(seq);
        self.local_video_pop_time = Some(now);
    }

    fn audio_stalled(&self, now: Instant) -> bool {
        self.local_audio_pop_time
            .is_some_and(|at| now.duration_since(at).as_millis() as u64 > AUDIO_STALL_MS)
    }

    /// Pick the action for this render tick by walking the queue from the
    /// head. `num_pop` is how many frames the chosen action applies to.
    pub fn video_action(
        &self,
        _audio_pop_delay: u64,
        _video_pop_delay: u64,
        queue: &MetaQueue,
        now: Instant,
    ) -> (SyncAction, usize) {
        let mut action = SyncAction::Hold;
        let mut num_pop = 0usize;

        for frame in queue.iter() {
            let packet = &frame.packet;

            let Some(last_seq) = self.video_seq_popped else {
                // fresh stream: nothing decodable until the first keyframe
                if !packet.is_intra_frame {
                    action = SyncAction::PopDiscard;
                    num_pop += 1;
                    continue;
                }
                if action != SyncAction::PopDiscard {
                    action = SyncAction::Pop;
                    num_pop += 1;
                }
                break;
            };

            if packet.encoded_sequence_num == last_seq + num_pop as u64 + 1 {
                // in-order frame
                if self.source_audio_time_popped == 0 {
                    // no audio on this stream yet: free-run
                    action = SyncAction::PopVideoOnly;
                    num_pop += 1;
                } else if packet.source_record_time < self.source_audio_time_popped {
                    // behind the audio clock: keep popping to catch up
                    action = SyncAction::Pop;
                    num_pop += 1;
                } else if self.audio_stalled(now) {
                    action = SyncAction::PopVideoOnly;
                    num_pop += 1;
                    break;
                } else {
                    // frame is ahead of audio and audio is alive: either we
                    // already chose pops for older frames, or we hold
                    return (action, num_pop);
                }
            } else {
                // out of order; a pop already chosen deeper takes priority
                if action == SyncAction::Pop {
                    break;
                }

                if !packet.is_intra_frame {
                    action = SyncAction::PopDiscard;
                    num_pop += 1;
                } else {
                    if action != SyncAction::PopDiscard {
                        action = SyncAction::Pop;
                        num_pop += 1;
                    }
                    break;
                }
            }
        }

        (action, num_pop)
    }
}

impl Default for StreamSync {
    fn default() -> Self {
        StreamSync::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta_queue::{MetaQueue, VIDEO_MAX_FRAMES};
    use media_common::{MediaType, Packet};
    use std::time::Duration;

    fn frame(seq: u64, ts: u64, intra: bool) -> Packet {
        Packet {
            encoded_sequence_num: seq,
            source_record_time: ts,
            media_type: MediaType::H264,
            is_intra_frame: intra,
            data: vec![0; 32],
            ..Packet::default()
        }
    }

    fn queue_of(packets: Vec<Packet>) -> MetaQueue {
        let now = Instant::now();
        let mut q = MetaQueue::new(VIDEO_MAX_FRAMES);
        for p in packets {
            q.push_video(p, None, now);
        }
        q
    }

    #[test]
    fn fresh_stream_discards_up_to_the_keyframe() {
        let sync = StreamSync::new();
        let q = queue_of(vec![
            frame(1, 100, false),
            frame(2, 200, false),
            frame(3, 300, false),
            frame(4, 400, false),
            frame(5, 500, true),
        ]);

        let (action, num_pop) = sync.video_action(0, 0, &q, Instant::now());
        assert_eq!(action, SyncAction::PopDiscard);
        assert_eq!(num_pop, 4);
    }

    #[test]
    fn fresh_stream_pops_a_leading_keyframe() {
        let sync = StreamSync::new();
        let q = queue_of(vec![frame(5, 500, true), frame(6, 600, false)]);

        let (action, num_pop) = sync.video_action(0, 0, &q, Instant::now());
        assert_eq!(action, SyncAction::Pop);
        assert_eq!(num_pop, 1);
    }

    #[test]
    fn no_audio_yet_means_video_only() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(500, 5, now);

        let q = queue_of(vec![frame(6, 600, false)]);
        let (action, _) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::PopVideoOnly);
    }

    #[test]
    fn frames_behind_the_audio_clock_are_popped_together() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, now);
        sync.audio_popped(350, 40, now);

        let q = queue_of(vec![
            frame(2, 200, false),
            frame(3, 300, false),
            frame(4, 400, false),
        ]);

        let (action, num_pop) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::Pop);
        assert_eq!(num_pop, 2);
    }

    #[test]
    fn video_ahead_of_live_audio_holds() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, now);
        sync.audio_popped(150, 40, now);

        let q = queue_of(vec![frame(2, 200, false)]);
        let (action, num_pop) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::Hold);
        assert_eq!(num_pop, 0);
    }

    #[test]
    fn stalled_audio_triggers_a_single_video_only_pop() {
        let base = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, base);
        sync.audio_popped(150, 40, base);

        let q = queue_of(vec![frame(2, 200, false), frame(3, 300, false)]);

        let later = base + Duration::from_millis(450);
        let (action, num_pop) = sync.video_action(0, 0, &q, later);
        assert_eq!(action, SyncAction::PopVideoOnly);
        assert_eq!(num_pop, 1);
    }

    #[test]
    fn gap_without_keyframe_discards() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, now);
        sync.audio_popped(900, 40, now);

        // seq 3 onwards: seq 2 was lost
        let q = queue_of(vec![frame(3, 300, false), frame(4, 400, false)]);
        let (action, num_pop) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::PopDiscard);
        assert_eq!(num_pop, 2);
    }

    #[test]
    fn gap_ending_in_keyframe_pops_it() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, now);
        sync.audio_popped(900, 40, now);

        let q = queue_of(vec![frame(5, 500, true), frame(6, 600, false)]);
        let (action, num_pop) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::Pop);
        assert_eq!(num_pop, 1);
    }

    #[test]
    fn in_order_pops_are_not_abandoned_for_a_later_gap() {
        let now = Instant::now();
        let mut sync = StreamSync::new();
        sync.video_popped(100, 1, now);
        sync.audio_popped(900, 40, now);

        // 2 and 3 are in order and behind audio; 7 is a later gap
        let q = queue_of(vec![
            frame(2, 200, false),
            frame(3, 300, false),
            frame(7, 700, false),
        ]);

        let (action, num_pop) = sync.video_action(0, 0, &q, now);
        assert_eq!(action, SyncAction::Pop);
        assert_eq!(num_pop, 2);
    }
}
