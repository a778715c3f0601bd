//! Ole *Standard Encryption* (CryptoAPI)
use super::{CryptoError, EncryptionAlgo};
use aes::cipher::{inout, BlockDecrypt as _, KeyInit as _};
use byteutils::io::*;
use sha1::{Digest as _, Sha1};
use std::io::Read;
use tracing::{debug, warn};

/// Specifies properties of the encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncryptionHeaderFlags {
    /// Specifies whether CryptoAPI RC4 or ECMA-376 encryption is used
    pub crypto_api: bool,
    /// Specifies whether document properties are unencrypted
    pub doc_props: bool,
    /// Indicates if extensible encryption is used
    pub external: bool,
    /// Indicates that the protected content is an ECMA-376 document
    pub aes: bool,
}

impl EncryptionHeaderFlags {
    fn new<R: Read + ?Sized>(r: &mut R) -> Result<Self, CryptoError> {
        let v = rdu32le(r)?;
        Ok(Self {
            crypto_api: v & 0b100 != 0,
            doc_props: v & 0b1000 != 0,
            external: v & 0b1_0000 != 0,
            aes: v & 0b10_0000 != 0,
        })
    }
}

/// Encryption properties for an encrypted stream
#[derive(Debug, Clone)]
pub struct EncryptionHeader {
    /// The properties of the encryption algorithm
    pub flags: EncryptionHeaderFlags,
    /// The encryption algorithm id
    pub alg_id: u32,
    /// The hashing algorithm (always SHA-1)
    pub alg_id_hash: u32,
    /// The number of bytes in the encryption key
    pub key_size: usize,
    /// Implementation-specific value that corresponds to constants accepted by the specified CSP
    pub provider_type: u32,
    /// The CSP name
    pub csp_name: String,
    /// The encryption algorithm
    pub algorithm: EncryptionAlgo,
}

impl EncryptionHeader {
    fn new(mut r: &[u8]) -> Result<Self, CryptoError> {
        let flags = EncryptionHeaderFlags::new(&mut r)?;
        let size_extra = rdu32le(&mut r)?;
        if size_extra != 0 {
            return Err(CryptoError::InvalidData(format!(
                "Invalid EncryptionHeader SizeExtra ({size_extra})"
            )));
        }
        let alg_id = rdu32le(&mut r)?;
        let algorithm = if !flags.crypto_api || flags.external {
            None
        } else if !flags.aes {
            match alg_id {
                0x00000000 | 0x00006801 => Some(EncryptionAlgo::Rc4),
                _ => None,
            }
        } else {
            match alg_id {
                0x00000000 | 0x0000660e => Some(EncryptionAlgo::Aes128),
                0x0000660f => Some(EncryptionAlgo::Aes192),
                0x00006610 => Some(EncryptionAlgo::Aes256),
                _ => None,
            }
        };
        let Some(algorithm) = algorithm else {
            return Err(CryptoError::InvalidData(format!(
                "Invalid EncryptionHeader AlgId {alg_id}"
            )));
        };
        let alg_id_hash = rdu32le(&mut r)?;
        if ![0x00000000, 0x00008004].contains(&alg_id_hash) {
            return Err(CryptoError::InvalidData(format!(
                "Invalid EncryptionHeader AlgIDHash ({alg_id_hash})"
            )));
        }
        let mut key_bits = rdu32le(&mut r)?;
        if algorithm == EncryptionAlgo::Rc4 && key_bits == 0 {
            // Zero means the 40-bit default
            key_bits = 40;
        }
        match algorithm {
            EncryptionAlgo::Rc4 if key_bits & 7 == 0 && (40..=128).contains(&key_bits) => {}
            EncryptionAlgo::Aes128 if key_bits == 128 => {}
            EncryptionAlgo::Aes192 if key_bits == 192 => {}
            EncryptionAlgo::Aes256 if key_bits == 256 => {}
            _ => {
                return Err(CryptoError::InvalidData(format!(
                    "Invalid EncryptionHeader KeySize ({key_bits}) for AlgID {alg_id}"
                )));
            }
        }

        let provider_type = rdu32le(&mut r)?;
        let _reserved1 = rdu32le(&mut r)?;
        let _reserved2 = rdu32le(&mut r)?;
        let csp_units: Vec<u16> = r
            .chunks_exact(2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .take_while(|&c| c != 0)
            .collect();
        Ok(Self {
            flags,
            alg_id,
            alg_id_hash,
            key_size: (key_bits / 8) as usize,
            provider_type,
            csp_name: String::from_utf16_lossy(&csp_units),
            algorithm,
        })
    }
}

/// Data used to verify the decryption password / key
#[derive(Debug, Clone)]
pub struct EncryptionVerifier {
    /// Salt for key derivation
    pub salt: [u8; 16],
    /// The encrypted verifier
    pub encrypted_verifier: [u8; 16],
    /// The encrypted SHA-1 hash of the verifier
    pub encrypted_verifier_hash: Vec<u8>,
}

impl EncryptionVerifier {
    fn new<R: Read + ?Sized>(r: &mut R, algorithm: EncryptionAlgo) -> Result<Self, CryptoError> {
        let salt_size = rdu32le(r)?;
        if salt_size != 16 {
            return Err(CryptoError::InvalidData(format!(
                "Invalid EncryptionVerifier SaltSize ({salt_size})"
            )));
        }
        let salt: [u8; 16] = rdarray(r)?;
        let encrypted_verifier: [u8; 16] = rdarray(r)?;
        let verifier_hash_size = rdu32le(r)?;
        if verifier_hash_size != 20 {
            // Always sha-1
            return Err(CryptoError::InvalidData(format!(
                "Invalid EncryptionVerifier VerifierHashSize ({verifier_hash_size})"
            )));
        }
        // AES pads the hash to the block size
        let mut encrypted_verifier_hash = match algorithm {
            EncryptionAlgo::Rc4 => vec![0u8; 20],
            _ => vec![0u8; 32],
        };
        r.read_exact(&mut encrypted_verifier_hash)?;
        Ok(Self {
            salt,
            encrypted_verifier,
            encrypted_verifier_hash,
        })
    }
}

/// *Standard encryption* data
#[derive(Debug, Clone)]
pub struct StandardEncryption {
    /// Header flags
    pub flags: EncryptionHeaderFlags,
    /// Header
    pub header: EncryptionHeader,
    /// Verifier
    pub verifier: EncryptionVerifier,
}

impl StandardEncryption {
    const ITERATIONS: u32 = 50_000;

    /// Parse a *standard encryption* structure (following the version)
    pub fn new(mut r: &[u8]) -> Result<Self, CryptoError> {
        let flags = EncryptionHeaderFlags::new(&mut r)?;
        let hdr_len = rdu32le(&mut r)? as usize;
        if hdr_len > r.len() {
            return Err(CryptoError::InvalidData(format!(
                "EncryptionHeader size ({hdr_len}) exceeds available data"
            )));
        }
        let (hdr, mut rest) = r.split_at(hdr_len);
        let header = EncryptionHeader::new(hdr)?;
        if header.flags != flags {
            return Err(CryptoError::InvalidData(
                "Incompatible EncryptionInfo flags".to_string(),
            ));
        }
        let verifier = EncryptionVerifier::new(&mut rest, header.algorithm)?;
        Ok(StandardEncryption {
            flags,
            header,
            verifier,
        })
    }

    fn derive_key(&self, password: &str) -> Vec<u8> {
        // Initial sha1(salt + password.as_utf16le)
        let mut sha1 = Sha1::new();
        sha1.update(self.verifier.salt);
        for word in password.encode_utf16() {
            sha1.update(word.to_le_bytes());
        }
        let mut hash = [0u8; 20];
        sha1.finalize_into_reset((&mut hash).into());
        // Iterations
        for iteration in 0..Self::ITERATIONS {
            sha1.update(iteration.to_le_bytes());
            sha1.update(hash);
            sha1.finalize_into_reset((&mut hash).into());
        }
        // A zero
        sha1.update(hash);
        sha1.update(0u32.to_le_bytes());
        sha1.finalize_into_reset((&mut hash).into());
        // x1 - filled with 6
        let mut base = [0x36; 64];
        for (x, h) in base.iter_mut().zip(hash) {
            *x ^= h;
        }
        sha1.update(base);
        let mut x1 = [0u8; 20];
        sha1.finalize_into_reset((&mut x1).into());
        // x2 - filled with \
        let mut base = [0x5c; 64];
        for (x, h) in base.iter_mut().zip(hash) {
            *x ^= h;
        }
        sha1.update(base);
        let mut x2 = [0u8; 20];
        sha1.finalize_into((&mut x2).into());
        // Truncate to key_size (guaranteed to fit)
        let mut res: Vec<u8> = Vec::with_capacity(20 + 20);
        res.extend_from_slice(&x1);
        res.extend_from_slice(&x2);
        res.truncate(self.header.key_size);
        res
    }

    /// Validate the provided password and return the derived AES key
    pub fn get_key(&self, password: &str) -> Option<AesKey> {
        if self.header.algorithm == EncryptionAlgo::Rc4 {
            warn!("RC4 keys are derived through the CryptoAPI RC4 scheme");
            return None;
        }
        let key = AesKey {
            algorithm: self.header.algorithm,
            key: self.derive_key(password),
        };
        let mut verifier = self.verifier.encrypted_verifier;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.verifier.encrypted_verifier_hash.get(0..32)?);
        key.decrypt_ecb(&mut verifier);
        key.decrypt_ecb(&mut hash);
        let computed_hash = Sha1::digest(verifier);
        debug!("Standard verifier hash match: {}", hash[0..20] == *computed_hash);
        (hash[0..20] == *computed_hash).then_some(key)
    }
}

/// *Standard Encryption* AES key
#[derive(Clone)]
pub struct AesKey {
    algorithm: EncryptionAlgo,
    key: Vec<u8>,
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "AesKey({})", self.algorithm)
    }
}

impl AesKey {
    /// Decrypts `buf` in place with AES-ECB
    ///
    /// Trailing bytes which do not fill a block are left untouched
    fn decrypt_ecb(&self, buf: &mut [u8]) {
        let blocks = inout::InOutBuf::from(buf).into_chunks().0;
        // Key size validated when the header is parsed
        match self.algorithm {
            EncryptionAlgo::Aes128 => {
                aes::Aes128Dec::new(self.key.as_slice().into()).decrypt_blocks_inout(blocks)
            }
            EncryptionAlgo::Aes192 => {
                aes::Aes192Dec::new(self.key.as_slice().into()).decrypt_blocks_inout(blocks)
            }
            EncryptionAlgo::Aes256 => {
                aes::Aes256Dec::new(self.key.as_slice().into()).decrypt_blocks_inout(blocks)
            }
            EncryptionAlgo::Rc4 => {}
        }
    }

    /// Decrypt the payload of an *EncryptedPackage* (after the size field)
    pub(super) fn decrypt_stream(&self, size: u64, cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let size = usize::try_from(size)
            .ok()
            .filter(|&s| s <= cipher.len())
            .ok_or_else(|| {
                CryptoError::InvalidData(format!(
                    "EncryptedPackage declares {size} bytes but only {} are present",
                    cipher.len()
                ))
            })?;
        let padded = ((size + 15) & !15).min(cipher.len() & !15);
        let mut plain = cipher[0..padded].to_vec();
        self.decrypt_ecb(&mut plain);
        plain.truncate(size);
        Ok(plain)
    }
}
