//! Legacy (in-place) binary document encryption

mod xor;
use super::standard::StandardEncryption;
use super::{CryptoError, EncryptionAlgo};
use md5::{Digest as _, Md5};
use rc4::{KeyInit as _, Rc4, StreamCipher as _};
use sha1::Sha1;
use std::io::Read;
use tracing::debug;
pub use xor::*;

/// The size of an RC4 re-keying block in binary documents
pub const RC4_BLOCK_SIZE: u64 = 1024;

/// Office Binary Document RC4 Encryption data
#[derive(Debug, Clone)]
pub struct BinaryRc4Encryption {
    /// Salt
    pub salt: [u8; 16],
    /// Encrypted verifier
    pub encrypted_verifier: [u8; 16],
    /// Encrypted MD5 hash
    pub encrypted_hash: [u8; 16],
}

impl BinaryRc4Encryption {
    /// Read Office Binary Document RC4 Encryption data
    pub fn new<R: Read + ?Sized>(r: &mut R) -> Result<Self, CryptoError> {
        let mut salt = [0u8; 16];
        let mut encrypted_verifier = [0u8; 16];
        let mut encrypted_hash = [0u8; 16];
        r.read_exact(&mut salt)?;
        r.read_exact(&mut encrypted_verifier)?;
        r.read_exact(&mut encrypted_hash)?;
        Ok(Self {
            salt,
            encrypted_verifier,
            encrypted_hash,
        })
    }

    fn derive_key(&self, password: &str) -> BinaryRc4Key {
        // Initial md5(password.as_utf16le)
        let mut md5 = Md5::new();
        for word in password.encode_utf16() {
            md5.update(word.to_le_bytes());
        }
        let mut hash = [0u8; 16];
        md5.finalize_into_reset((&mut hash).into());

        // md5(repeat 16x (hash[0..5] + salt))
        let mut buf = [0u8; 336];
        for chunk in buf.chunks_exact_mut(21) {
            chunk[0..5].copy_from_slice(&hash[0..5]);
            chunk[5..21].copy_from_slice(&self.salt);
        }
        md5.update(buf);
        md5.finalize_into((&mut hash).into());
        let mut key = [0u8; 5];
        key.copy_from_slice(&hash[0..5]);
        BinaryRc4Key { key }
    }

    /// Validate the provided password and return the derived base key
    pub fn get_key(&self, password: &str) -> Option<BinaryRc4Key> {
        let key = self.derive_key(password);

        // decrypt verifier and hash with a single block 0 keystream
        let mut buf = [0u8; 32];
        buf[0..16].copy_from_slice(&self.encrypted_verifier);
        buf[16..32].copy_from_slice(&self.encrypted_hash);
        key.apply(0, &mut buf, 0);
        let computed_hash = Md5::digest(&buf[0..16]);

        if buf[16..32] == *computed_hash {
            Some(key)
        } else {
            debug!("RC4 verifier mismatch");
            None
        }
    }
}

/// 40-bit RC4 base key
#[derive(Debug, Clone)]
pub struct BinaryRc4Key {
    key: [u8; 5],
}

impl BinaryRc4Key {
    pub(super) fn get_block_key(&self, block_number: u32) -> [u8; 16] {
        // md5(key + block_number)
        let mut md5 = Md5::new();
        md5.update(self.key);
        md5.update(block_number.to_le_bytes());
        let mut hash = [0u8; 16];
        md5.finalize_into((&mut hash).into());
        hash
    }

    pub(super) fn apply(&self, block_number: u32, buf: &mut [u8], offset: usize) {
        rc4_apply(&self.get_block_key(block_number), offset, buf);
    }
}

/// Office Binary Document RC4 CryptoAPI Encryption
pub struct Rc4CryptoApiEncryption<'a>(pub &'a StandardEncryption);

impl Rc4CryptoApiEncryption<'_> {
    /// Validate the provided password and return the derived base key
    pub fn get_key(&self, password: &str) -> Option<CryptoApiRc4Key> {
        let se = self.0;
        if se.header.algorithm != EncryptionAlgo::Rc4 {
            return None;
        }
        // Initial sha1(salt + password.as_utf16le)
        let mut sha1 = Sha1::new();
        sha1.update(se.verifier.salt);
        for word in password.encode_utf16() {
            sha1.update(word.to_le_bytes());
        }
        let mut base = [0u8; 20];
        sha1.finalize_into((&mut base).into());
        let key = CryptoApiRc4Key {
            base,
            key_size: se.header.key_size,
        };

        // decrypt verifier and hash with block 0 key
        let mut buf = [0u8; 16 + 20];
        buf[0..16].copy_from_slice(&se.verifier.encrypted_verifier);
        buf[16..].copy_from_slice(se.verifier.encrypted_verifier_hash.get(0..20)?);
        key.apply(0, &mut buf, 0);
        let computed_hash = Sha1::digest(&buf[0..16]);

        if buf[16..] == *computed_hash {
            Some(key)
        } else {
            debug!("CryptoAPI RC4 verifier mismatch");
            None
        }
    }
}

/// CryptoApi Rc4 base key
#[derive(Debug, Clone)]
pub struct CryptoApiRc4Key {
    base: [u8; 20],
    key_size: usize,
}

impl CryptoApiRc4Key {
    pub(super) fn get_block_key(&self, block_number: u32) -> Vec<u8> {
        let mut sha1 = Sha1::new();
        sha1.update(self.base);
        sha1.update(block_number.to_le_bytes());
        let mut block_key = sha1.finalize().to_vec();
        block_key.truncate(self.key_size);
        if self.key_size == 5 {
            // 40-bit keys are zero extended to 128 bits
            block_key.resize(16, 0);
        }
        block_key
    }

    pub(super) fn apply(&self, block_number: u32, buf: &mut [u8], offset: usize) {
        rc4_apply(&self.get_block_key(block_number), offset, buf);
    }
}

/// Runs an RC4 keystream over `buf` after discarding `skip` bytes
fn rc4_apply(key: &[u8], skip: usize, buf: &mut [u8]) {
    macro_rules! sized {
        ($($len:literal => $size:ident),+) => {
            match key.len() {
                $($len => {
                    let mut rc4 = Rc4::<rc4::consts::$size>::new(key.into());
                    rc4.apply_keystream(&mut vec![0u8; skip]);
                    rc4.apply_keystream(buf);
                })+
                // Key sizes are validated when the encryption header is parsed
                n => unreachable!("invalid RC4 key size {n}"),
            }
        };
    }
    sized!(
        6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10, 11 => U11,
        12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16
    )
}

/// Applies a block keyed RC4 to `buf`, which starts at `stream_position`
///
/// The keystream restarts every [`RC4_BLOCK_SIZE`] bytes of the stream
pub(super) fn apply_rc4_blocks<F: Fn(u32, &mut [u8], usize)>(
    buf: &mut [u8],
    stream_position: u64,
    apply: F,
) {
    let mut offset = (stream_position % RC4_BLOCK_SIZE) as usize; // Safe bc mod
    let mut block_number = (stream_position / RC4_BLOCK_SIZE) as u32; // Cast is intentional
    let mut start = 0usize;
    while start < buf.len() {
        let encrypted_size = (buf.len() - start).min(RC4_BLOCK_SIZE as usize - offset);
        apply(
            block_number,
            &mut buf[start..(start + encrypted_size)],
            offset,
        );
        offset = 0;
        start += encrypted_size;
        block_number = block_number.wrapping_add(1);
    }
}
