use std::io;
use thiserror::Error;

/// Errors produced while opening or reading a compound file
#[derive(Error, Debug)]
pub enum OleError {
    /// The file is not a compound file: bad signature, byte order or sector shift
    #[error("invalid compound file header: {0}")]
    Header(String),

    /// The container structures are corrupt (broken or cyclic chains, bad directory)
    #[error("corrupt compound document: {0}")]
    CompoundDocument(String),

    /// The requested directory entry does not exist
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Wrapper for [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html)
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
}

impl OleError {
    /// Returns true if the error originates from malformed content
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::Header(_) | Self::CompoundDocument(_))
    }
}
