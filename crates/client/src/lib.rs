//! Host-facing conferencing media client.
//!
//! The transport layer hands decoded, decrypted object payloads to
//! [`MediaClient::on_object`]; render loops pull per-client audio and video
//! back out. One jitter engine runs per remote client, created on first
//! sight and announced through the event sink.

pub mod config;
pub mod events;
pub mod media_client;

pub use config::Config;
pub use events::{ChannelSink, EventSink, FnSink, MediaEvent};
pub use media_client::{MediaClient, ObjectName, StreamMetrics, VideoFrame};
