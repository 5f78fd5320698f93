//! Receive-side jitter buffer and playout engine.
//!
//! Delivered media objects go in through [`Jitter::push`]; the render loop
//! pulls synchronised audio with [`Jitter::pop_audio`] and video with
//! [`Jitter::pop_video`]. Pops never block and never fail for lack of data:
//! missing audio becomes concealment, missing video repeats the last decoded
//! frame.

pub mod audio_assembler;
pub mod codec;
pub mod config;
pub mod error;
pub mod full_fill;
pub mod jitter;
pub mod leaky_bucket;
pub mod meta_queue;
pub mod playout;
pub mod silence;
pub mod sync;
pub mod video_assembler;

pub use codec::{DecodedFrame, RawDecoder, VideoDecoder};
pub use config::{AudioParams, BucketMode, JitterConfig, PixelFormat, SampleType, VideoParams};
pub use error::JitterError;
pub use jitter::{Jitter, VideoFrameRef};
pub use meta_queue::Counters;
pub use sync::{StreamSync, SyncAction};
