//! Decoding errors for payloads that cross a process boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for DecodeError {
    fn from(e: bincode::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
