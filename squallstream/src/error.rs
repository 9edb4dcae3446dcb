use thiserror::Error;

/// All errors produced by the SquallStream transport layer.
#[derive(Debug, Error)]
pub enum SquallStreamError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("payload too large: {size} bytes exceeds segment limit {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("stream is closed")]
    StreamClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SquallStreamError>;
