use std::path::Path;

use anyhow::{Context, Result as AResult};
use serde::{Deserialize, Serialize};

use jitter::{AudioParams, BucketMode, JitterConfig, PixelFormat, SampleType, VideoParams};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SampleTypeName {
    F32,
    L16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormatName {
    Nv12,
    I420,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BucketModeName {
    Active,
    Listener,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct AudioSection {
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    pub sample_type: SampleTypeName,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct VideoSection {
    pub max_width: u32,
    pub max_height: u32,
    pub pixel_format: PixelFormatName,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct BucketSection {
    pub mode: BucketModeName,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct JitterSection {
    #[serde(default = "default_num_std")]
    pub num_std: u32,
    #[serde(default = "default_idle_prune")]
    pub idle_prune: bool,
}

fn default_channels() -> u32 {
    1
}

fn default_num_std() -> u32 {
    4
}

fn default_idle_prune() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Config {
    pub audio: AudioSection,
    pub video: VideoSection,
    pub bucket: BucketSection,
    pub jitter: JitterSection,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            audio: AudioSection {
                sample_rate: 48_000,
                channels: 1,
                sample_type: SampleTypeName::F32,
            },
            video: VideoSection {
                max_width: 1280,
                max_height: 720,
                pixel_format: PixelFormatName::I420,
            },
            bucket: BucketSection {
                mode: BucketModeName::Active,
            },
            jitter: JitterSection {
                num_std: 4,
                idle_prune: true,
            },
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> AResult<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            sample_type: match self.audio.sample_type {
                SampleTypeName::F32 => SampleType::F32,
                SampleTypeName::L16 => SampleType::L16,
            },
        }
    }

    pub fn video_params(&self) -> VideoParams {
        VideoParams {
            max_width: self.video.max_width,
            max_height: self.video.max_height,
            pixel_format: match self.video.pixel_format {
                PixelFormatName::Nv12 => PixelFormat::Nv12,
                PixelFormatName::I420 => PixelFormat::I420,
            },
        }
    }

    pub fn jitter_config(&self) -> JitterConfig {
        JitterConfig {
            bucket_mode: match self.bucket.mode {
                BucketModeName::Active => BucketMode::Active,
                BucketModeName::Listener => BucketMode::Listener,
            },
            num_std: self.jitter.num_std,
            idle_prune: self.jitter.idle_prune,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let raw = r#"
            [audio]
            sample_rate = 48000
            channels = 2
            sample_type = "l16"

            [video]
            max_width = 1920
            max_height = 1080
            pixel_format = "nv12"

            [bucket]
            mode = "listener"

            [jitter]
            num_std = 3
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.sample_type, SampleTypeName::L16);
        assert_eq!(config.video.pixel_format, PixelFormatName::Nv12);
        assert_eq!(config.bucket.mode, BucketModeName::Listener);
        assert_eq!(config.jitter.num_std, 3);
        // defaulted
        assert!(config.jitter.idle_prune);
    }

    #[test]
    fn engine_params_mirror_the_sections() {
        let config = Config::default();
        assert_eq!(config.audio_params().sample_rate, 48_000);
        assert_eq!(config.video_params().max_width, 1280);
        assert_eq!(config.jitter_config().num_std, 4);
    }
}
