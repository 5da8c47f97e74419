use datastream_core::error::StreamError;
use thiserror::Error;

/// Result type local to datastream-spill.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("spill storage error: {0}")]
    Storage(String),

    #[error("unsupported codec: {0}")]
    CodecUnsupported(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch in block at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("corrupt block: {0}")]
    Corrupt(String),

    #[error("unknown partition {0}")]
    UnknownPartition(String),
}

impl From<Error> for StreamError {
    fn from(e: Error) -> Self {
        StreamError::Storage(e.to_string())
    }
}
