use media_common::MediaType;

/// Operating mode for the playout reservoir. Active participants keep the
/// queue shallow for conversational latency; pure listeners trade latency
/// for resilience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketMode {
    #[default]
    Active,
    Listener,
}

impl BucketMode {
    /// (target fill, max bucket) in milliseconds.
    pub fn levels(self) -> (u64, u64) {
        match self {
            BucketMode::Active => (20, 150),
            BucketMode::Listener => (150, 500),
        }
    }
}

/// Format audio is decoded to before playout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleType {
    #[default]
    F32,
    L16,
}

impl SampleType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::F32 => size_of::<f32>(),
            SampleType::L16 => size_of::<i16>(),
        }
    }

    pub fn media_type(self) -> MediaType {
        match self {
            SampleType::F32 => MediaType::F32,
            SampleType::L16 => MediaType::L16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    I420,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_type: SampleType,
}

impl Default for AudioParams {
    fn default() -> Self {
        AudioParams {
            sample_rate: 48_000,
            channels: 1,
            sample_type: SampleType::F32,
        }
    }
}

impl AudioParams {
    /// Interleaved bytes for one sample instant across all channels.
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_type.bytes_per_sample() * self.channels as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VideoParams {
    pub max_width: u32,
    pub max_height: u32,
    pub pixel_format: PixelFormat,
}

impl Default for VideoParams {
    fn default() -> Self {
        VideoParams {
            max_width: 1280,
            max_height: 720,
            pixel_format: PixelFormat::I420,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JitterConfig {
    pub bucket_mode: BucketMode,
    /// Multiplier on the inter-arrival standard deviation when turning the
    /// jitter window into a depth recommendation.
    pub num_std: u32,
    /// Trim the audio queue while the client has never popped.
    pub idle_prune: bool,
}

impl Default for JitterConfig {
    fn default() -> Self {
        JitterConfig {
            bucket_mode: BucketMode::Active,
            num_std: 4,
            idle_prune: true,
        }
    }
}
