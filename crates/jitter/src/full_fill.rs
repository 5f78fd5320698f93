use std::collections::VecDeque;

/// Elastic byte reservoir between packet-sized producers and the arbitrary
/// pull sizes a playout device asks for.
///
/// Buffers keep their origin timestamp; a partial drain leaves the head
/// buffer in place and advances `read_front`, so the timestamp handed out on
/// the next fill can be offset by the samples already consumed.
pub struct FullFill {
    buffers: VecDeque<(Vec<u8>, u64)>,
    read_front: usize,

    /// Interleaved bytes per sample instant, used to translate the residual
    /// byte cursor into elapsed microseconds.
    sample_divisor: usize,
    sample_rate: u32,
}

impl FullFill {
    pub fn new() -> Self {
        FullFill {
            buffers: VecDeque::new(),
            read_front: 0,
            sample_divisor: size_of::<f32>(),
            sample_rate: 48_000,
        }
    }

    pub fn set_sample_divisor(&mut self, divisor: usize) {
        debug_assert!(divisor > 0);
        self.sample_divisor = divisor;
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        debug_assert!(rate > 0);
        self.sample_rate = rate;
    }

    pub fn total_in_buffers(&self) -> usize {
        let total: usize = self.buffers.iter().map(|(data, _)| data.len()).sum();
        total - self.read_front
    }

    pub fn add_buffer(&mut self, data: &[u8], timestamp: u64) {
        self.buffers.push_back((data.to_vec(), timestamp));
    }

    /// Timestamp of the first unread byte of a buffer recorded at
    /// `timestamp`, `front` bytes into it. A zero timestamp marks
    /// synthesised data and is passed through untouched.
    fn offset_timestamp(&self, front: usize, timestamp: u64) -> u64 {
        if front == 0 || timestamp == 0 {
            return timestamp;
        }

        let samples = (front / self.sample_divisor) as u64;
        timestamp + samples * 1_000_000 / self.sample_rate as u64
    }

    /// Drain exactly `length` bytes, or `None` when the reservoir holds
    /// less. Returns the drained bytes and the timestamp of their first
    /// sample.
    pub fn fill(&mut self, length: usize) -> Option<(Vec<u8>, u64)> {
        if self.total_in_buffers() < length {
            return None;
        }

        let mut out = Vec::with_capacity(length);
        let mut timestamp = None;

        while out.len() < length {
            let (data, ts) = self.buffers.front().expect("length checked above");
            let available = data.len() - self.read_front;
            let to_fill = length - out.len();

            if timestamp.is_none() {
                timestamp = Some(self.offset_timestamp(self.read_front, *ts));
            }

            if available <= to_fill {
                out.extend_from_slice(&data[self.read_front..]);
                self.read_front = 0;
                self.buffers.pop_front();
            } else {
                let start = self.read_front;
                out.extend_from_slice(&data[start..start + to_fill]);
                self.read_front += to_fill;
            }
        }

        Some((out, timestamp.unwrap_or(0)))
    }
}

impl Default for FullFill {
    fn default() -> Self {
        FullFill::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservoir() -> FullFill {
        let mut ff = FullFill::new();
        // mono f32 at 48 kHz
        ff.set_sample_divisor(4);
        ff.set_sample_rate(48_000);
        ff
    }

    #[test]
    fn exact_fill_frees_the_head() {
        let mut ff = reservoir();
        ff.add_buffer(&[1; 8], 1_000);

        let (data, ts) = ff.fill(8).unwrap();
        assert_eq!(data, vec![1; 8]);
        assert_eq!(ts, 1_000);
        assert_eq!(ff.total_in_buffers(), 0);
    }

    #[test]
    fn insufficient_data_returns_none() {
        let mut ff = reservoir();
        ff.add_buffer(&[0; 4], 0);

        assert!(ff.fill(8).is_none());
        assert_eq!(ff.total_in_buffers(), 4);
    }

    #[test]
    fn partial_fill_advances_the_cursor() {
        let mut ff = reservoir();
        ff.add_buffer(&[1, 2, 3, 4, 5, 6, 7, 8], 1_000);

        let (first, _) = ff.fill(4).unwrap();
        assert_eq!(first, vec![1, 2, 3, 4]);
        assert_eq!(ff.total_in_buffers(), 4);

        // remainder comes from the same head, not from its start
        let (second, _) = ff.fill(4).unwrap();
        assert_eq!(second, vec![5, 6, 7, 8]);
        assert_eq!(ff.total_in_buffers(), 0);
    }

    #[test]
    fn residual_cursor_offsets_the_timestamp() {
        let mut ff = reservoir();
        ff.add_buffer(&[0; 16], 1_000);

        ff.fill(8).unwrap();
        // 2 samples consumed at 48 kHz: 2 * 1e6 / 48000 = 41 us
        let (_, ts) = ff.fill(8).unwrap();
        assert_eq!(ts, 1_000 + 2 * 1_000_000 / 48_000);
    }

    #[test]
    fn synthesised_timestamp_stays_zero() {
        let mut ff = reservoir();
        ff.add_buffer(&[0; 16], 0);

        ff.fill(8).unwrap();
        let (_, ts) = ff.fill(8).unwrap();
        assert_eq!(ts, 0);
    }

    #[test]
    fn fill_spans_multiple_buffers() {
        let mut ff = reservoir();
        ff.add_buffer(&[1; 4], 1_000);
        ff.add_buffer(&[2; 4], 2_000);
        ff.add_buffer(&[3; 4], 3_000);

        let (data, ts) = ff.fill(10).unwrap();
        assert_eq!(data, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        assert_eq!(ts, 1_000);
        assert_eq!(ff.total_in_buffers(), 2);

        // next fill starts inside the third buffer; two residual bytes are
        // less than one 4-byte sample, so no offset yet
        let (rest, ts) = ff.fill(2).unwrap();
        assert_eq!(rest, vec![3, 3]);
        assert_eq!(ts, 3_000);
    }
}
