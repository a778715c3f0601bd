//! Ole *Agile Encryption*
use super::{CryptoError, EncryptionAlgo};
use aes::cipher::{block_padding, BlockDecryptMut as _, KeyIvInit as _};
use base64::Engine as _;
use serde::{de::Error as _, Deserialize, Deserializer};
use sha1::Sha1;
use sha2::{
    digest::{Digest, DynDigest},
    Sha256, Sha384, Sha512,
};
use tracing::debug;

const SEGMENT_SIZE: usize = 4096;
const BLOCK_KEY_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_KEY_VERIFIER_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_KEY_VALUE: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];

fn invalid<S: Into<String>>(msg: S) -> CryptoError {
    CryptoError::InvalidData(msg.into())
}

/// A base64-encoded binary sequence
#[derive(Debug, Clone)]
pub struct Base64Binary(Vec<u8>);

impl<'de> Deserialize<'de> for Base64Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        base64::prelude::BASE64_STANDARD
            .decode(&s)
            .map(Base64Binary)
            .map_err(|e| D::Error::custom(format!("Invalid Base64Binary value ({s}): {e}")))
    }
}

impl AsRef<[u8]> for Base64Binary {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Block chaining type (counter)
#[derive(Debug)]
pub enum EncryptionChaining {
    /// Cipher Block Chaining
    Cbc,
    /// Cipher feedback with 8-bit window
    Cfb,
}

/// A complex type that specifies the encryption used within this element
#[derive(Deserialize, Debug, Clone)]
pub struct CtKeyData {
    /// The number of bytes used by a salt
    #[serde(rename = "@saltSize")]
    pub salt_size: usize,
    /// The number of bytes used to encrypt one block of data
    #[serde(rename = "@blockSize")]
    pub block_size: usize,
    /// The number of bits used by an encryption algorithm
    #[serde(rename = "@keyBits")]
    pub key_bits: usize,
    /// The number of bytes used by a hash value
    #[serde(rename = "@hashSize")]
    pub hash_size: usize,
    /// The cipher algorithm
    #[serde(rename = "@cipherAlgorithm")]
    pub cipher_algorithm: String,
    /// The chaining mode used by cipher_algorithm
    #[serde(rename = "@cipherChaining")]
    pub cipher_chaining: String,
    /// The hashing algorithm
    #[serde(rename = "@hashAlgorithm")]
    pub hash_algorithm: String,
    /// Randomly generated salt
    #[serde(rename = "@saltValue")]
    pub salt_value: Base64Binary,
}

/// Data used to verify whether the encrypted data passes an integrity check
#[derive(Deserialize, Debug)]
pub struct CtDataIntegrity {
    /// Encrypted key used for encrypting the hmac
    #[serde(rename = "@encryptedHmacKey")]
    pub encrypted_hmac_key: Base64Binary,
    /// Encrypted hmac
    #[serde(rename = "@encryptedHmacValue")]
    pub encrypted_hmac_value: Base64Binary,
}

/// Intermediate key and related encryption data
#[derive(Deserialize, Debug)]
pub struct CtPasswordKeyEncryptor {
    /// The number of bytes used by a salt
    #[serde(rename = "@saltSize")]
    pub salt_size: usize,
    /// The number of bytes used to encrypt one block of data
    #[serde(rename = "@blockSize")]
    pub block_size: usize,
    /// The number of bits used by an encryption algorithm
    #[serde(rename = "@keyBits")]
    pub key_bits: usize,
    /// The number of bytes used by a hash value
    #[serde(rename = "@hashSize")]
    pub hash_size: usize,
    /// The cipher algorithm
    #[serde(rename = "@cipherAlgorithm")]
    pub cipher_algorithm: String,
    /// The chaining mode used by cipher_algorithm
    #[serde(rename = "@cipherChaining")]
    pub cipher_chaining: String,
    /// The hashing algorithm
    #[serde(rename = "@hashAlgorithm")]
    pub hash_algorithm: String,
    /// Randomly generated salt
    #[serde(rename = "@saltValue")]
    pub salt_value: Base64Binary,
    /// The number of times to iterate the password hash when creating the key
    #[serde(rename = "@spinCount")]
    pub spin_count: u32,
    /// Verifier input (encrypted)
    #[serde(rename = "@encryptedVerifierHashInput")]
    pub encrypted_verifier_hash_input: Base64Binary,
    /// Verifier hash (encrypted)
    #[serde(rename = "@encryptedVerifierHashValue")]
    pub encrypted_verifier_hash_value: Base64Binary,
    /// Intermediate key
    #[serde(rename = "@encryptedKeyValue")]
    pub encrypted_key_value: Base64Binary,
}

impl CtPasswordKeyEncryptor {
    fn derive_partial_key(&self, password: &str) -> Result<Vec<u8>, CryptoError> {
        // Initial digest(salt + password.as_utf16le)
        let mut digest = self.cd_get_digest()?;
        digest.update(self.cd_salt_value());
        for word in password.encode_utf16() {
            digest.update(&word.to_le_bytes());
        }
        let mut hash = digest.finalize_reset().to_vec();

        // Iterations
        for iteration in 0..self.spin_count {
            digest.update(&iteration.to_le_bytes());
            digest.update(&hash);
            hash = digest.finalize_reset().to_vec();
        }
        Ok(hash)
    }

    fn derive_key_final(&self, partial: &[u8], block_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        // Final (hash + blockKey)
        let mut digest = self.cd_get_digest()?;
        digest.update(partial);
        digest.update(block_key);
        let mut hash = digest.finalize().to_vec();
        hash.resize(self.cd_key_size(), 0x36);
        Ok(hash)
    }

    fn get_key(&self, password: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let partial_key = self.derive_partial_key(password)?;
        let iv = self.cd_iv(None)?;

        let verifier_key = self.derive_key_final(&partial_key, &BLOCK_KEY_VERIFIER_INPUT)?;
        let mut verifier_hash_input =
            self.cd_decrypt(&verifier_key, &iv, self.encrypted_verifier_hash_input.as_ref())?;
        verifier_hash_input.truncate(self.salt_size);
        let mut digest = self.cd_get_digest()?;
        digest.update(&verifier_hash_input);
        let computed_hash = digest.finalize();

        let verifier_key = self.derive_key_final(&partial_key, &BLOCK_KEY_VERIFIER_VALUE)?;
        let mut verifier_hash_value =
            self.cd_decrypt(&verifier_key, &iv, self.encrypted_verifier_hash_value.as_ref())?;
        verifier_hash_value.truncate(self.hash_size);
        if verifier_hash_value != *computed_hash {
            debug!("Agile verifier mismatch");
            return Ok(None);
        }

        let intermediate_key = self.derive_key_final(&partial_key, &BLOCK_KEY_KEY_VALUE)?;
        let key = self.cd_decrypt(&intermediate_key, &iv, self.encrypted_key_value.as_ref())?;
        Ok(Some(key))
    }
}

/// Key encryptor
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CtKeyEncryptor {
    /// Intermediate key data
    pub encrypted_key: CtPasswordKeyEncryptor,
    /// The key encryptor type
    #[serde(rename = "@uri")]
    pub uri: String,
}

/// A sequences of one(!) key encryptor
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CtKeyEncryptors {
    /// Key encryptors
    pub key_encryptor: CtKeyEncryptor,
}

/// *Agile encryption* data
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AgileEncryption {
    /// Encryption key data
    pub key_data: CtKeyData,
    /// Data integrity
    pub data_integrity: Option<CtDataIntegrity>,
    /// Intermediate key data
    pub key_encryptors: CtKeyEncryptors,
}

impl AgileEncryption {
    /// Parse an *agile encryption* structure (following the version)
    pub fn new(mut r: &[u8]) -> Result<Self, CryptoError> {
        let _reserved = byteutils::io::rdu32le(&mut r)?; // 0x40
        let ae: AgileEncryption = quick_xml::de::from_reader(r)
            .map_err(|e| invalid(format!("Invalid Agile EncryptionInfo: {e}")))?;
        ae.validate()?;
        Ok(ae)
    }

    /// The content encryption algorithm
    pub fn algo(&self) -> Result<EncryptionAlgo, CryptoError> {
        self.key_data.cd_algo()
    }

    fn validate(&self) -> Result<(), CryptoError> {
        let kd = &self.key_data;
        let ek = &self.key_encryptors.key_encryptor.encrypted_key;
        kd.cd_validate()
            .map_err(|e| invalid(format!("Invalid keyData: {e}")))?;
        ek.cd_validate()
            .map_err(|e| invalid(format!("Invalid PasswordKeyEncryptor: {e}")))?;
        if kd.cipher_algorithm != ek.cipher_algorithm {
            return Err(invalid(format!(
                "Invalid PasswordKeyEncryptor: invalid cipherAlgorithm {} vs {}",
                ek.cipher_algorithm, kd.cipher_algorithm,
            )));
        }
        if kd.hash_algorithm != ek.hash_algorithm {
            return Err(invalid(format!(
                "Invalid PasswordKeyEncryptor: invalid hashAlgorithm {} vs {}",
                ek.hash_algorithm, kd.hash_algorithm,
            )));
        }
        if !(1..=10_000_000).contains(&ek.spin_count) {
            return Err(invalid(format!(
                "Invalid PasswordKeyEncryptor: invalid SpinCount ({})",
                ek.spin_count
            )));
        }
        for (name, len, min) in [
            (
                "encryptedVerifierHashInput",
                ek.encrypted_verifier_hash_input.0.len(),
                ek.salt_size,
            ),
            (
                "encryptedVerifierHashValue",
                ek.encrypted_verifier_hash_value.0.len(),
                ek.hash_size,
            ),
            (
                "encryptedKeyValue",
                ek.encrypted_key_value.0.len(),
                kd.cd_key_size(),
            ),
        ] {
            if len < min {
                return Err(invalid(format!(
                    "Invalid PasswordKeyEncryptor: invalid {name} length {len} vs {min}"
                )));
            }
        }
        Ok(())
    }

    /// Validate the provided password and return the derived key
    ///
    /// Returns `Ok(None)` if the password does not match
    pub fn get_key(&self, password: &str) -> Result<Option<AgileKey>, CryptoError> {
        let Some(mut key) = self
            .key_encryptors
            .key_encryptor
            .encrypted_key
            .get_key(password)?
        else {
            return Ok(None);
        };
        key.truncate(self.key_data.cd_key_size());
        Ok(Some(AgileKey {
            key,
            key_data: self.key_data.clone(),
        }))
    }
}

/// *Agile Encryption* key
#[derive(Clone)]
pub struct AgileKey {
    key: Vec<u8>,
    key_data: CtKeyData,
}

impl std::fmt::Debug for AgileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "AgileKey({} {})",
            self.key_data.cipher_algorithm, self.key_data.cipher_chaining
        )
    }
}

impl AgileKey {
    /// Decrypt the payload of an *EncryptedPackage* (after the size field)
    ///
    /// Each 4096 byte segment is encrypted separately with an IV derived from its index
    pub(super) fn decrypt_stream(&self, size: u64, cipher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let kd = &self.key_data;
        let size = usize::try_from(size)
            .ok()
            .filter(|&s| s <= cipher.len())
            .ok_or_else(|| {
                invalid(format!(
                    "EncryptedPackage declares {size} bytes but only {} are present",
                    cipher.len()
                ))
            })?;
        let mut plain = Vec::with_capacity(size);
        for (segment, chunk) in cipher.chunks(SEGMENT_SIZE).enumerate() {
            if plain.len() >= size {
                break;
            }
            let iv = kd.cd_iv(Some(&(segment as u32).to_le_bytes()))?;
            let decrypted = kd.cd_decrypt(&self.key, &iv, chunk)?;
            let wanted = (size - plain.len()).min(decrypted.len());
            plain.extend_from_slice(&decrypted[0..wanted]);
        }
        Ok(plain)
    }
}

trait CryptoData {
    fn cd_salt_size(&self) -> usize;
    fn cd_salt_value(&self) -> &[u8];
    fn cd_cipher_algorithm(&self) -> &str;
    fn cd_key_bits(&self) -> usize;
    fn cd_block_size(&self) -> usize;
    fn cd_hash_algorithm(&self) -> &str;
    fn cd_hash_size(&self) -> usize;
    fn cd_cipher_chaining(&self) -> &str;

    fn cd_key_size(&self) -> usize {
        self.cd_key_bits() / 8
    }

    fn cd_algo(&self) -> Result<EncryptionAlgo, CryptoError> {
        match self.cd_cipher_algorithm() {
            "AES" => match self.cd_key_bits() {
                128 => Ok(EncryptionAlgo::Aes128),
                192 => Ok(EncryptionAlgo::Aes192),
                256 => Ok(EncryptionAlgo::Aes256),
                bits => Err(invalid(format!("invalid keyBits ({bits}) for AES"))),
            },
            algo => Err(CryptoError::Unsupported(format!(
                "cipherAlgorithm {algo}"
            ))),
        }
    }

    fn cd_chaining(&self) -> Result<EncryptionChaining, CryptoError> {
        match self.cd_cipher_chaining() {
            "ChainingModeCBC" => Ok(EncryptionChaining::Cbc),
            "ChainingModeCFB" => Ok(EncryptionChaining::Cfb),
            chaining => Err(invalid(format!("invalid CipherChaining ({chaining})"))),
        }
    }

    fn cd_validate(&self) -> Result<(), CryptoError> {
        let salt_size = self.cd_salt_size();
        if !(1..=65536).contains(&salt_size) {
            return Err(invalid(format!("invalid saltSize ({salt_size})")));
        }
        if salt_size != self.cd_salt_value().len() {
            return Err(invalid(format!(
                "saltSize mismatch ({} vs {})",
                salt_size,
                self.cd_salt_value().len()
            )));
        }
        let block_size = self.cd_block_size();
        let key_bits = self.cd_key_bits();
        if block_size != 16 {
            return Err(invalid(format!(
                "invalid blockSize ({block_size}) for {} with keyBits ({key_bits})",
                self.cd_cipher_algorithm()
            )));
        }
        self.cd_algo()?;
        self.cd_chaining()?;
        let digest = self.cd_get_digest()?;
        if digest.output_size() != self.cd_hash_size() {
            return Err(invalid(format!(
                "hashSize mismatch ({} vs {})",
                self.cd_hash_size(),
                digest.output_size(),
            )));
        }
        Ok(())
    }

    fn cd_get_digest(&self) -> Result<Box<dyn DynDigest>, CryptoError> {
        let digest: Box<dyn DynDigest> = match self.cd_hash_algorithm() {
            "SHA1" => Box::new(Sha1::new()),
            "SHA256" => Box::new(Sha256::new()),
            "SHA384" => Box::new(Sha384::new()),
            "SHA512" => Box::new(Sha512::new()),
            algo => {
                return Err(CryptoError::Unsupported(format!("hashAlgorithm {algo}")));
            }
        };
        Ok(digest)
    }

    /// Decrypts `cypher` (zero padded to the block size) and returns as many bytes as the input
    fn cd_decrypt(&self, key: &[u8], iv: &[u8], cypher: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block_size = self.cd_block_size();
        let mut padded = cypher.to_vec();
        padded.resize(cypher.len().div_ceil(block_size) * block_size, 0);
        let mut plain = vec![0u8; padded.len()];
        macro_rules! run {
            ($mode:ident, $aes:ty) => {
                $mode::Decryptor::<$aes>::new_from_slices(key, iv)
                    .map_err(|e| invalid(format!("invalid key or IV length: {e}")))?
                    .decrypt_padded_b2b_mut::<block_padding::NoPadding>(&padded, &mut plain)
                    .map_err(|e| invalid(format!("decryption failed: {e}")))?
            };
        }
        match (self.cd_chaining()?, self.cd_algo()?) {
            (EncryptionChaining::Cbc, EncryptionAlgo::Aes128) => run!(cbc, aes::Aes128),
            (EncryptionChaining::Cbc, EncryptionAlgo::Aes192) => run!(cbc, aes::Aes192),
            (EncryptionChaining::Cbc, EncryptionAlgo::Aes256) => run!(cbc, aes::Aes256),
            (EncryptionChaining::Cfb, EncryptionAlgo::Aes128) => run!(cfb8, aes::Aes128),
            (EncryptionChaining::Cfb, EncryptionAlgo::Aes192) => run!(cfb8, aes::Aes192),
            (EncryptionChaining::Cfb, EncryptionAlgo::Aes256) => run!(cfb8, aes::Aes256),
            (_, algo) => {
                return Err(CryptoError::Unsupported(format!("{algo} in agile encryption")))
            }
        };
        plain.truncate(cypher.len());
        Ok(plain)
    }

    fn cd_iv(&self, block_key: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let mut hash = if let Some(block_key) = block_key {
            // Hash of salt + block_key
            let mut digest = self.cd_get_digest()?;
            digest.update(self.cd_salt_value());
            digest.update(block_key);
            digest.finalize().to_vec()
        } else {
            // Just the salt
            self.cd_salt_value().to_vec()
        };
        hash.resize(self.cd_block_size(), 0x36);
        Ok(hash)
    }
}

macro_rules! impl_crypto_data {
    ($($ty:ty),+) => {
        $(impl CryptoData for $ty {
            fn cd_salt_size(&self) -> usize {
                self.salt_size
            }
            fn cd_salt_value(&self) -> &[u8] {
                self.salt_value.0.as_slice()
            }
            fn cd_cipher_algorithm(&self) -> &str {
                self.cipher_algorithm.as_str()
            }
            fn cd_key_bits(&self) -> usize {
                self.key_bits
            }
            fn cd_block_size(&self) -> usize {
                self.block_size
            }
            fn cd_hash_algorithm(&self) -> &str {
                self.hash_algorithm.as_str()
            }
            fn cd_hash_size(&self) -> usize {
                self.hash_size
            }
            fn cd_cipher_chaining(&self) -> &str {
                self.cipher_chaining.as_str()
            }
        })+
    };
}

impl_crypto_data!(CtKeyData, CtPasswordKeyEncryptor);
