//! Facilities for reading runtime configuration values
use crate::ExcelError;
use encoding_rs::Encoding;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;
use tracing::trace;

/// Default configuration file name
pub const CONFIG_FILE: &str = "biffxls.toml";

/// Decoder options
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderOptions {
    /// Password used to decrypt protected workbooks
    ///
    /// When unset (or when it does not match) the default `VelvetSweatshop` is tried
    pub password: Option<String>,

    /// Whether a record overrunning the stream is fatal
    pub strict: bool,

    /// Encoding label used for byte strings when the workbook code page is missing or unknown
    pub fallback_encoding: String,

    /// Whether the input reader is kept and returned by `Xls::release()`
    pub leave_open: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            password: None,
            strict: false,
            fallback_encoding: "windows-1252".to_string(),
            leave_open: false,
        }
    }
}

impl DecoderOptions {
    /// Constructs `DecoderOptions` from [`CONFIG_FILE`] and `BIFFXLS__` environment variables
    pub fn new() -> Result<Self, ExcelError> {
        Self::from_file(CONFIG_FILE)
    }

    /// Constructs `DecoderOptions` from the given `toml` file and environment variables
    ///
    /// A missing file is not an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExcelError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BIFFXLS__").split("__"))
            .extract()?;
        config.validate()?;
        trace!("final config: {config:#?}");
        Ok(config)
    }

    /// Sets the decryption password
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Sets strict length checking
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn validate(&self) -> Result<(), ExcelError> {
        if Encoding::for_label(self.fallback_encoding.as_bytes()).is_none() {
            return Err(ExcelError::ConfigParameterValue {
                parameter: "fallback_encoding",
                message: format!("unknown encoding label {:?}", self.fallback_encoding),
            });
        }
        Ok(())
    }

    /// The configured fallback encoding
    pub(crate) fn fallback_encoding(&self) -> &'static Encoding {
        Encoding::for_label(self.fallback_encoding.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1252)
    }
}
