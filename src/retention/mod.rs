//! Retention for complete documents
//!
//! A [`RetentionSweeper`] periodically asks an [`ExpiryIndex`] which complete
//! documents are past their time to live and removes them through the store.

mod expiry;
mod sweep;

use thiserror::Error;

use crate::stream::StreamError;

pub use expiry::{ExpiryIndex, MtimeExpiry};
pub use sweep::{RetentionSweeper, SweepHandle, SweepStats};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Expiry index error: {0}")]
    Index(String),
}

pub type Result<T> = std::result::Result<T, SweepError>;
