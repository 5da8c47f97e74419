use datastream_core::error::StreamError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Spill(#[from] datastream_spill::Error),
}

impl From<Error> for StreamError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => StreamError::Config(msg),
            Error::Spill(inner) => inner.into(),
        }
    }
}
