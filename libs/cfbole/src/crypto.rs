//! # Ole encryption
//!
//! This module is dedicated to processing cryptography data found in Office documents
//! according to [\[MS-OFFCRYPTO\]](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-offcrypto/3c34d72a-1a61-4b52-a893-196f9157f083)
//!
//! The encryption scheme is selected once, when an [`EncryptionInfo`] is turned into a
//! [`SecretKey`]; the key is then applied to any number of blocks
//!
//! Feature support:
//! - [x] XOR Obfuscation (method 1)
//! - [x] Office Binary Document RC4 Encryption
//! - [x] Office Binary Document RC4 CryptoAPI Encryption
//! - [x] ECMA-376 *Standard Encryption*
//! - [x] ECMA-376 *Agile Encryption*
//! - [ ] ECMA-376 *Extensible Encryption*
//!
//! Agile algorithm support:
//! - [x] AES-128
//! - [x] AES-192
//! - [x] AES-256
//!
//! Agile counters support:
//! - [x] CBC
//! - [x] CFB-8
//!
//! Agile hash support:
//! - [x] SHA1
//! - [x] SHA256
//! - [x] SHA384
//! - [x] SHA512

mod agile;
mod legacy;
mod standard;
use crate::{Ole, OleError};
pub use agile::*;
use byteutils::io::*;
pub use legacy::*;
pub use standard::*;
use std::io::{self, Read, Seek};
use thiserror::Error;
use tracing::{debug, warn};

/// The password Excel uses when a workbook is encrypted without one
pub const DEFAULT_PASSWORD: &str = "VelvetSweatshop";

/// Error returned when none of the provided passwords matches the verifier
#[derive(Error, Debug, Clone, PartialEq)]
#[error("No valid password provided ({algorithm})")]
pub struct NoValidPasswordError {
    algorithm: String,
}

impl NoValidPasswordError {
    /// Creates the error for the named algorithm
    pub fn new(algorithm: &str) -> Self {
        Self {
            algorithm: algorithm.to_string(),
        }
    }

    /// The algorithm whose verifier did not match
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }
}

/// Errors produced by the cipher suite
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The encryption metadata is malformed
    #[error("invalid encryption data: {0}")]
    InvalidData(String),

    /// The encryption scheme is recognized but not handled here
    #[error("unsupported encryption: {0}")]
    Unsupported(String),

    /// Password verification failed
    #[error(transparent)]
    NoValidPassword(#[from] NoValidPasswordError),

    /// The container could not be read
    #[error(transparent)]
    Ole(#[from] OleError),

    /// Wrapper for [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html)
    #[error("IO error: {0:?}")]
    Io(io::Error),
}

impl From<io::Error> for CryptoError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::InvalidData("truncated data".to_string()),
            _ => Self::Io(e),
        }
    }
}

/// Encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncryptionAlgo {
    /// RC4
    Rc4,
    /// AES-128
    Aes128,
    /// AES-192
    Aes192,
    /// AES-256
    Aes256,
}

impl std::fmt::Display for EncryptionAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Self::Rc4 => "RC4",
                Self::Aes128 => "AES-128",
                Self::Aes192 => "AES-192",
                Self::Aes256 => "AES-256",
            }
        )
    }
}

/// Version of a component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Version {
    /// Major number
    pub major: u16,
    /// Minor number
    pub minor: u16,
}

impl Version {
    /// Reads and parse a component version
    pub fn new<R: Read + ?Sized>(r: &mut R) -> Result<Self, io::Error> {
        Ok(Self {
            major: rdu16le(r)?,
            minor: rdu16le(r)?,
        })
    }

    fn is(&self, other: (u16, u16)) -> bool {
        self.major == other.0 && self.minor == other.1
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The position of a ciphertext fragment within its stream
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockContext {
    /// Absolute offset of the first byte of the fragment
    pub stream_position: u64,
    /// Size of the record the fragment belongs to (XOR obfuscation only)
    pub record_size: usize,
}

/// Encryption metadata, as a tagged union over the supported schemes
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum EncryptionInfo {
    /// XOR obfuscation (method 1)
    Xor(XorObfuscation),
    /// Office Binary Document RC4 Encryption
    Rc4(BinaryRc4Encryption),
    /// CryptoAPI *Standard Encryption* (RC4 in binary documents, AES in packages)
    CryptoApi(StandardEncryption),
    /// *Agile Encryption*
    Agile(AgileEncryption),
}

impl EncryptionInfo {
    /// Parses a versioned *Encryption Info* structure
    pub fn parse(buf: &[u8]) -> Result<Self, CryptoError> {
        let mut r = buf;
        let version = Version::new(&mut r)?;
        debug!("EncryptionInfo version {version}");
        if version.is((1, 1)) {
            Ok(Self::Rc4(BinaryRc4Encryption::new(&mut r)?))
        } else if version.is((4, 4)) {
            Ok(Self::Agile(AgileEncryption::new(r).inspect_err(|e| {
                warn!("Failed to parse AgileEncryption: {e}");
            })?))
        } else if version.minor == 3 && [3, 4].contains(&version.major) {
            warn!("Extensible Encryption is not supported");
            Err(CryptoError::Unsupported(
                "Extensible Encryption".to_string(),
            ))
        } else if version.minor == 2 && [2, 3, 4].contains(&version.major) {
            Ok(Self::CryptoApi(StandardEncryption::new(r).inspect_err(
                |e| {
                    warn!("Failed to parse StandardEncryption: {e}");
                },
            )?))
        } else {
            warn!("Unsupported/Invalid EncryptionInfo version ({version})");
            Err(CryptoError::InvalidData(format!(
                "Unsupported/Invalid EncryptionInfo version ({version})"
            )))
        }
    }

    /// A short description of the scheme
    pub fn algorithm(&self) -> String {
        match self {
            Self::Xor(_) => "XOR obfuscation".to_string(),
            Self::Rc4(_) => "RC4".to_string(),
            Self::CryptoApi(se) => format!("CryptoAPI {}", se.header.algorithm),
            Self::Agile(ae) => match ae.algo() {
                Ok(algo) => format!("Agile {algo}"),
                Err(_) => "Agile".to_string(),
            },
        }
    }

    /// Verifies `password` and returns the derived key
    pub fn derive_key(&self, password: &str) -> Result<SecretKey, CryptoError> {
        let key = match self {
            Self::Xor(xo) => xo.get_key(password).map(SecretKey::Xor),
            Self::Rc4(rc4) => rc4.get_key(password).map(SecretKey::Rc4),
            Self::CryptoApi(se) => match se.header.algorithm {
                EncryptionAlgo::Rc4 => Rc4CryptoApiEncryption(se)
                    .get_key(password)
                    .map(SecretKey::CryptoApiRc4),
                _ => se.get_key(password).map(SecretKey::Standard),
            },
            Self::Agile(ae) => ae.get_key(password)?.map(SecretKey::Agile),
        };
        key.ok_or_else(|| NoValidPasswordError::new(&self.algorithm()).into())
    }

    /// Returns [true] if `password` matches the stored verifier
    pub fn verify_password(&self, password: &str) -> bool {
        self.derive_key(password).is_ok()
    }
}

/// A verified decryption key
#[derive(Debug, Clone)]
pub enum SecretKey {
    /// Xor obfuscation key
    Xor(XorKey),
    /// 40-bit RC4 base key
    Rc4(BinaryRc4Key),
    /// CryptoApi Rc4 base key
    CryptoApiRc4(CryptoApiRc4Key),
    /// *Standard Encryption* AES key
    Standard(AesKey),
    /// *Agile Encryption* key
    Agile(AgileKey),
}

impl SecretKey {
    /// Decrypts a fragment of an in-place encrypted stream
    ///
    /// Only the binary document schemes (XOR and RC4) encrypt streams in place
    pub fn decrypt(&self, buf: &mut [u8], ctx: BlockContext) -> Result<(), CryptoError> {
        match self {
            Self::Xor(k) => k.apply(buf, ctx),
            Self::Rc4(k) => apply_rc4_blocks(buf, ctx.stream_position, |block, data, skip| {
                k.apply(block, data, skip)
            }),
            Self::CryptoApiRc4(k) => {
                apply_rc4_blocks(buf, ctx.stream_position, |block, data, skip| {
                    k.apply(block, data, skip)
                })
            }
            Self::Standard(_) | Self::Agile(_) => {
                return Err(CryptoError::Unsupported(
                    "AES keys only apply to encrypted packages".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Decrypts the content of an *EncryptedPackage* stream
    pub fn decrypt_package(&self, package: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut r = package;
        let size = rdu64le(&mut r)?;
        match self {
            Self::Standard(k) => k.decrypt_stream(size, r),
            Self::Agile(k) => k.decrypt_stream(size, r),
            _ => Err(CryptoError::Unsupported(
                "RC4 and XOR schemes do not protect packages".to_string(),
            )),
        }
    }

    /// Returns the raw key bytes for the given block
    ///
    /// XOR and AES keys are not block based and return [None]
    pub fn block_key(&self, block_number: u32) -> Option<Vec<u8>> {
        match self {
            Self::Rc4(k) => Some(k.get_block_key(block_number).to_vec()),
            Self::CryptoApiRc4(k) => Some(k.get_block_key(block_number)),
            _ => None,
        }
    }
}

/// Interface to the cryptography of encrypted packages
///
/// Modern Office documents protected with a password are stored as an Ole object
/// carrying an *EncryptionInfo* and an *EncryptedPackage* stream
#[derive(Debug)]
pub struct OleCrypto {
    /// *Encryption Info*
    pub encryption_info: EncryptionInfo,
}

impl OleCrypto {
    /// Parse cryptography data from an Ole object
    pub fn new<R: Read + Seek>(ole: &Ole<R>) -> Result<Self, CryptoError> {
        let entry = ole.find_stream("EncryptionInfo")?;
        let data = ole.read_stream(entry)?;
        let encryption_info = EncryptionInfo::parse(&data).inspect_err(|e| {
            debug!("Failed to parse EncryptionInfo: {e}");
        })?;
        if matches!(encryption_info, EncryptionInfo::Rc4(_) | EncryptionInfo::Xor(_))
            || matches!(&encryption_info, EncryptionInfo::CryptoApi(se) if se.header.algorithm == EncryptionAlgo::Rc4)
        {
            warn!("RC4 is not allowed in package encryption");
            return Err(CryptoError::InvalidData(
                "RC4 is not allowed in package encryption".to_string(),
            ));
        }
        Ok(Self { encryption_info })
    }

    /// Validate the provided password
    pub fn get_key(&self, password: &str) -> Result<SecretKey, CryptoError> {
        self.encryption_info.derive_key(password)
    }

    /// Decrypts the *EncryptedPackage* of an Ole object
    pub fn decrypt<R: Read + Seek>(
        &self,
        key: &SecretKey,
        ole: &Ole<R>,
    ) -> Result<Vec<u8>, CryptoError> {
        let entry = ole.find_stream("EncryptedPackage").inspect_err(|e| {
            warn!("EncryptedPackage not found: {}", e);
        })?;
        let package = ole.read_stream(entry)?;
        key.decrypt_package(&package).inspect_err(|e| {
            debug!("Ole decrypt failed: {e}");
        })
    }
}
