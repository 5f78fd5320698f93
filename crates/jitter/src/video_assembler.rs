use std::collections::BTreeMap;

use log::debug;
use media_common::Packet;

/// Incomplete frames tolerated before the oldest is abandoned. Loss of a
/// single fragment would otherwise pin its siblings forever.
const MAX_PENDING_FRAMES: usize = 32;

/// Reassembles packetised video frames.
///
/// Fragments of one frame share a `source_record_time`; within a frame they
/// are ordered by `fragment_index`. Once every index in `[0, count)` is
/// present the fragments are concatenated into a single packet and the
/// pending entry is dropped.
pub struct VideoAssembler {
    pending: BTreeMap<u64, BTreeMap<u32, Packet>>,
    pub abandoned: u64,
}

impl VideoAssembler {
    pub fn new() -> Self {
        VideoAssembler {
            pending: BTreeMap::new(),
            abandoned: 0,
        }
    }

    /// Insert one fragment. Returns the assembled frame when this fragment
    /// completes it.
    pub fn push(&mut self, packet: Packet) -> Option<Packet> {
        if packet.fragment_count <= 1 {
            return Some(packet);
        }

        let timestamp = packet.source_record_time;
        let count = packet.fragment_count;
        let fragments = self.pending.entry(timestamp).or_default();

        if packet.fragment_index >= count || fragments.contains_key(&packet.fragment_index) {
            debug!(
                "rejected video fragment {}/{count} for ts {timestamp}",
                packet.fragment_index
            );
            return None;
        }
        fragments.insert(packet.fragment_index, packet);

        // indices are unique and bounded by count, so a full map is
        // exactly [0, count)
        if fragments.len() < count as usize {
            self.drop_stale();
            return None;
        }

        let fragments = self.pending.remove(&timestamp).expect("entry just filled");
        let mut iter = fragments.into_values();
        let mut assembled = iter.next().expect("count >= 2");
        for fragment in iter {
            assembled.data.extend_from_slice(&fragment.data);
        }

        assembled.frame_size = assembled.data.len() as u32;
        assembled.fragment_index = 0;
        assembled.fragment_count = 1;

        Some(assembled)
    }

    fn drop_stale(&mut self) {
        while self.pending.len() > MAX_PENDING_FRAMES {
            let oldest = *self.pending.keys().next().expect("len checked");
            self.pending.remove(&oldest);
            self.abandoned += 1;
            debug!("abandoned incomplete video frame at ts {oldest}");
        }
    }
}

impl Default for VideoAssembler {
    fn default() -> Self {
        VideoAssembler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_common::MediaType;

    fn fragment(ts: u64, index: u32, count: u32, data: &[u8]) -> Packet {
        Packet {
            source_record_time: ts,
            media_type: MediaType::H264,
            fragment_index: index,
            fragment_count: count,
            frame_size: data.len() as u32,
            data: data.to_vec(),
            ..Packet::default()
        }
    }

    #[test]
    fn single_fragment_passes_through() {
        let mut assembler = VideoAssembler::new();
        let out = assembler.push(fragment(100, 0, 1, b"frame")).unwrap();
        assert_eq!(out.data, b"frame");
    }

    #[test]
    fn reassembly_is_identical_in_any_order() {
        let original: Vec<u8> = (0u8..=249).collect();
        let chunks: Vec<&[u8]> = original.chunks(50).collect();

        let mut assembler = VideoAssembler::new();
        let mut out = None;
        for index in [3u32, 0, 4, 1, 2] {
            out = assembler.push(fragment(77, index, 5, chunks[index as usize]));
        }

        let assembled = out.unwrap();
        assert_eq!(assembled.data, original);
        assert_eq!(assembled.fragment_count, 1);
        assert_eq!(assembled.frame_size, 250);
        assert!(assembler.pending.is_empty());
    }

    #[test]
    fn incomplete_frames_stay_pending() {
        let mut assembler = VideoAssembler::new();
        assert!(assembler.push(fragment(100, 0, 3, b"a")).is_none());
        assert!(assembler.push(fragment(100, 2, 3, b"c")).is_none());
        assert_eq!(assembler.pending.len(), 1);
    }

    #[test]
    fn duplicate_fragments_are_rejected() {
        let mut assembler = VideoAssembler::new();
        assembler.push(fragment(100, 0, 2, b"a"));
        assert!(assembler.push(fragment(100, 0, 2, b"a")).is_none());

        // the duplicate must not have corrupted the frame
        let out = assembler.push(fragment(100, 1, 2, b"b")).unwrap();
        assert_eq!(out.data, b"ab");
    }

    #[test]
    fn interleaved_frames_assemble_independently() {
        let mut assembler = VideoAssembler::new();
        assembler.push(fragment(100, 0, 2, b"a1"));
        assembler.push(fragment(200, 0, 2, b"b1"));

        let first = assembler.push(fragment(100, 1, 2, b"a2")).unwrap();
        assert_eq!(first.data, b"a1a2");

        let second = assembler.push(fragment(200, 1, 2, b"b2")).unwrap();
        assert_eq!(second.data, b"b1b2");
    }

    #[test]
    fn stalled_frames_are_abandoned() {
        let mut assembler = VideoAssembler::new();
        for ts in 0..(MAX_PENDING_FRAMES as u64 + 5) {
            assembler.push(fragment(ts, 0, 2, b"x"));
        }

        assert_eq!(assembler.pending.len(), MAX_PENDING_FRAMES);
        assert_eq!(assembler.abandoned, 5);
    }
}
