// Talk-spurt vs silence classification over decoded F32 audio. Silence can
// be stretched or dropped to absorb clock skew without audible artefacts;
// anything inside a talk spurt must never be touched.

const SIGNAL_ATTACK_S: f32 = 0.001;
const SIGNAL_DECAY_S: f32 = 0.1;
const NOISE_ATTACK_S: f32 = 50.0;
const NOISE_DECAY_S: f32 = 0.03;
const LEVEL_FLOOR: f32 = 5.0e-5;

const SNR_SILENCE_THRESHOLD: f32 = 2.3;
const MIN_UPDATES: u32 = 20;

/// Two-rate envelope follower: a fast follower tracks the signal level, a
/// slow one the noise floor. Their ratio approximates SNR.
struct AudioLevel {
    signal_level: f32,
    noise_level: f32,
    signal_attack_rate: f32,
    signal_decay_rate: f32,
    noise_attack_rate: f32,
    noise_decay_rate: f32,
    num_updates: u32,
}

impl AudioLevel {
    fn new(buffer_size: usize, sample_rate: u32) -> Self {
        let frames_per_second = buffer_size as f32 / sample_rate as f32;
        let rate = |time_constant: f32| 1.0 - (-frames_per_second / time_constant).exp();

        AudioLevel {
            signal_level: 0.0,
            noise_level: 0.0,
            signal_attack_rate: rate(SIGNAL_ATTACK_S),
            signal_decay_rate: rate(SIGNAL_DECAY_S),
            noise_attack_rate: rate(NOISE_ATTACK_S),
            noise_decay_rate: rate(NOISE_DECAY_S),
            num_updates: 0,
        }
    }

    /// Must be called exactly once per frame or the follower rates skew.
    fn update(&mut self, level: f32) {
        let signal_rate = if self.signal_level < level {
            self.signal_attack_rate
        } else {
            self.signal_decay_rate
        };
        self.signal_level += signal_rate * (level - self.signal_level);
        self.signal_level = self.signal_level.max(LEVEL_FLOOR);

        let noise_rate = if self.noise_level < level {
            self.noise_attack_rate
        } else {
            self.noise_decay_rate
        };
        self.noise_level += noise_rate * (level - self.noise_level);
        self.noise_level = self.noise_level.max(LEVEL_FLOOR);

        self.num_updates += 1;
    }

    fn snr(&self) -> f32 {
        if self.noise_level == 0.0 {
            return 0.0;
        }
        self.signal_level / self.noise_level
    }
}

fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Per-stream silence detector. Only F32 mono/stereo is supported; streams
/// in any other format never report silence.
pub struct SilenceDetector {
    level: Option<AudioLevel>,
    channels: usize,
}

impl SilenceDetector {
    pub fn new() -> Self {
        SilenceDetector {
            level: None,
            channels: 1,
        }
    }

    pub fn is_inited(&self) -> bool {
        self.level.is_some()
    }

    /// `buffer_size` is samples per channel in one frame.
    pub fn init(&mut self, buffer_size: usize, sample_rate: u32, channels: usize) {
        self.channels = channels.clamp(1, 2);
        self.level = Some(AudioLevel::new(buffer_size, sample_rate));
    }

    /// Feed one decoded frame of raw F32 payload bytes.
    pub fn update(&mut self, payload: &[u8]) {
        let Some(level) = &mut self.level else {
            return;
        };

        let samples: Vec<f32> = payload
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if samples.is_empty() {
            return;
        }

        let frame_level = if self.channels == 2 {
            let half = samples.len() / 2;
            mean_abs(&samples[..half]) + mean_abs(&samples[half..])
        } else {
            mean_abs(&samples)
        };

        level.update(frame_level);
    }

    /// True once the followers have converged and the SNR sits below the
    /// skew-drop threshold.
    pub fn is_silence(&self) -> bool {
        let Some(level) = &self.level else {
            return false;
        };

        level.num_updates > MIN_UPDATES && level.snr() < SNR_SILENCE_THRESHOLD
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        SilenceDetector::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(value: f32, samples: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples * 4);
        for _ in 0..samples {
            out.extend_from_slice(&value.to_ne_bytes());
        }
        out
    }

    #[test]
    fn uninitialised_detector_never_reports_silence() {
        let mut detector = SilenceDetector::new();
        detector.update(&frame_of(0.0, 480));
        assert!(!detector.is_silence());
    }

    #[test]
    fn quiet_input_converges_to_silence() {
        let mut detector = SilenceDetector::new();
        detector.init(480, 48_000, 1);

        let frame = frame_of(0.0, 480);
        for _ in 0..50 {
            detector.update(&frame);
        }

        assert!(detector.is_silence());
    }

    #[test]
    fn needs_to_converge_before_classifying() {
        let mut detector = SilenceDetector::new();
        detector.init(480, 48_000, 1);

        let frame = frame_of(0.0, 480);
        for _ in 0..MIN_UPDATES {
            detector.update(&frame);
        }

        assert!(!detector.is_silence());
    }

    #[test]
    fn sudden_speech_over_a_quiet_floor_is_voiced() {
        let mut detector = SilenceDetector::new();
        detector.init(480, 48_000, 1);

        for _ in 0..50 {
            detector.update(&frame_of(0.0, 480));
        }
        // loud talk spurt: signal follower attacks fast, noise floor lags
        for _ in 0..5 {
            detector.update(&frame_of(0.5, 480));
        }

        assert!(!detector.is_silence());
    }
}
