//! Error types for mp4frag-media.

use std::io;
use thiserror::Error;

/// Result type for mp4frag-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mp4frag-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from the input or writing to the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required atom in MP4 file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Sample index beyond the bounds of a sample source.
    #[error("Sample index out of range: {index} (count: {count})")]
    OutOfRange { index: u32, count: u32 },

    /// Operation not supported by this object.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The input cannot be fragmented with the given tracks/options.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create a not-supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::OutOfRange { index: 7, count: 5 };
        assert_eq!(err.to_string(), "Sample index out of range: 7 (count: 5)");

        let err = Error::configuration("no audio or video track");
        assert_eq!(
            err.to_string(),
            "Configuration error: no audio or video track"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
