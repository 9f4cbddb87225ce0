use std::io;
use thiserror::Error;

/// Result type alias for NEST operations.
pub type Result<T> = anyhow::Result<T>;

/// Failures shared by the download worker and the answer-file writer.
///
/// The `Display` text is what the operator sees on the page; anything more
/// detailed belongs in the log.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Cannot download the file: HTTP error code {0}")]
    Http(u16),

    #[error("Downloaded image is neither an OVA nor an ISO, can't use it")]
    UnrecognizedImageFormat,

    #[error("Couldn't parse URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
