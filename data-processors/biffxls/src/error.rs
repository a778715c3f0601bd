use cfbole::crypto::{CryptoError, NoValidPasswordError};
use cfbole::OleError;
use std::io;
use thiserror::Error;

/// Errors produced while decoding a workbook
///
/// The variants before [`ExcelError::Format`] are fatal container or encryption failures and
/// are never produced for recoverable content problems, which end up in `anomalies()` instead
#[derive(Error, Debug)]
pub enum ExcelError {
    /// The input is not a compound file: bad signature, byte order or sector shift
    #[error("invalid compound file header: {0}")]
    Header(String),

    /// The compound document is corrupt or lacks a usable workbook stream
    #[error("compound document error: {0}")]
    CompoundDocument(String),

    /// The workbook is encrypted and no usable password was provided
    #[error(transparent)]
    InvalidPassword(#[from] NoValidPasswordError),

    /// A record overruns the stream (strict mode only)
    #[error("record stream error at offset 0x{offset:x}: {message}")]
    RecordStream {
        /// Offset of the record header
        offset: u64,
        /// Problem description
        message: String,
    },

    /// The workbook structure is invalid (e.g. missing or unexpected BOF)
    #[error("invalid workbook: {0}")]
    Format(String),

    /// The feature is recognized but not handled
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed encryption metadata
    #[error("invalid encryption data: {0}")]
    Crypto(String),

    /// The configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value is out of range
    #[error("invalid configuration parameter {parameter}: {message}")]
    ConfigParameterValue {
        /// Parameter name
        parameter: &'static str,
        /// Problem description
        message: String,
    },

    /// Wrapper for [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html)
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl ExcelError {
    /// Returns true if error is related with invalid data format
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Header(_)
                | Self::CompoundDocument(_)
                | Self::RecordStream { .. }
                | Self::Format(_)
                | Self::Crypto(_)
        )
    }

    /// Returns true if the workbook could not be decrypted with the provided password
    pub fn is_password_error(&self) -> bool {
        matches!(self, Self::InvalidPassword(_))
    }
}

impl From<io::Error> for ExcelError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::Format("truncated record".to_string()),
            _ => Self::Io(e),
        }
    }
}

impl From<OleError> for ExcelError {
    fn from(e: OleError) -> Self {
        match e {
            OleError::Header(s) => Self::Header(s),
            OleError::CompoundDocument(s) => Self::CompoundDocument(s),
            OleError::NotFound(s) => Self::CompoundDocument(format!("{s} not found")),
            OleError::Io(e) => Self::Io(e),
        }
    }
}

impl From<CryptoError> for ExcelError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::NoValidPassword(e) => Self::InvalidPassword(e),
            CryptoError::Ole(e) => e.into(),
            CryptoError::Unsupported(s) => Self::Unsupported(s),
            CryptoError::InvalidData(s) => Self::Crypto(s),
            CryptoError::Io(e) => Self::Io(e),
        }
    }
}

impl From<std::num::TryFromIntError> for ExcelError {
    fn from(e: std::num::TryFromIntError) -> Self {
        Self::Format(e.to_string())
    }
}
