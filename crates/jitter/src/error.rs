use thiserror::Error;

/// Codec-level failures inside the engine. Every one of them is absorbed
/// internally — concealment for audio, the previous picture plus a keyframe
/// request for video — and surfaces to callers only as counters and logs.
#[derive(Debug, Error)]
pub enum JitterError {
    #[error("codec failure: {0}")]
    DecodeFailure(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
}

impl From<opus::Error> for JitterError {
    fn from(err: opus::Error) -> Self {
        JitterError::DecodeFailure(err.to_string())
    }
}
