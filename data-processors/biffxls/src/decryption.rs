//! Workbook stream decryption
//!
//! A *FilePass* record in the globals substream marks the rest of the stream as encrypted.
//! Record headers always stay in plain text, and so do the payloads of the few records needed
//! to locate and describe the encryption. The adapter turns the raw stream into a plain copy so
//! that the record decoder never deals with ciphertext
use crate::records::{LengthPolicy, RecordStream, RecordType};
use crate::ExcelError;
use byteutils::io::*;
use cfbole::crypto::{
    BlockContext, CryptoError, EncryptionAlgo, EncryptionInfo, SecretKey, XorObfuscation,
    DEFAULT_PASSWORD,
};
use tracing::{debug, warn};

/// Locates the *FilePass* record and parses the encryption metadata it carries
///
/// Returns [None] if the workbook is not encrypted
pub fn probe(raw: &[u8]) -> Result<Option<EncryptionInfo>, ExcelError> {
    let mut stream = RecordStream::new(raw, LengthPolicy::Loose);
    let mut biff5 = false;
    let mut in_globals = false;
    while let Some(record) = stream.read()? {
        match record.ty {
            ty if ty.is_bof() && !in_globals => {
                in_globals = true;
                // BIFF2-BIFF5 only know XOR obfuscation
                biff5 = ty != RecordType::BOF || u16_at(record.data, 0) == Some(0x0500);
            }
            ty if ty.is_bof() || ty == RecordType::EOF => break,
            RecordType::FilePass => {
                debug!("FilePass found at 0x{:x}", record.offset);
                return parse_filepass(record.data, biff5).map(Some);
            }
            _ => {}
        }
    }
    Ok(None)
}

fn parse_filepass(data: &[u8], biff5: bool) -> Result<EncryptionInfo, ExcelError> {
    let mut r = data;
    if biff5 {
        return Ok(EncryptionInfo::Xor(XorObfuscation {
            key: rdu16le(&mut r)?,
            verifier: rdu16le(&mut r)?,
        }));
    }
    match rdu16le(&mut r)? {
        0 => Ok(EncryptionInfo::Xor(XorObfuscation {
            key: rdu16le(&mut r)?,
            verifier: rdu16le(&mut r)?,
        })),
        1 => {
            let info = EncryptionInfo::parse(r)?;
            match &info {
                EncryptionInfo::CryptoApi(se) if se.header.algorithm != EncryptionAlgo::Rc4 => {
                    Err(ExcelError::Unsupported(format!(
                        "{} encryption in a binary workbook",
                        info.algorithm()
                    )))
                }
                EncryptionInfo::Agile(_) => Err(ExcelError::Unsupported(
                    "Agile encryption in a binary workbook".to_string(),
                )),
                _ => Ok(info),
            }
        }
        other => Err(ExcelError::Crypto(format!(
            "Invalid FilePass.wEncryptionType {other}"
        ))),
    }
}

/// Verifies the password and returns the decryption key
///
/// The configured password is tried first, then the default `VelvetSweatshop`
pub fn derive_key(
    info: &EncryptionInfo,
    password: Option<&str>,
) -> Result<(SecretKey, bool), ExcelError> {
    if let Some(password) = password {
        match info.derive_key(password) {
            Ok(key) => return Ok((key, false)),
            Err(CryptoError::NoValidPassword(_)) => {
                debug!("Provided password rejected, trying the default one");
            }
            Err(e) => return Err(e.into()),
        }
    }
    match info.derive_key(DEFAULT_PASSWORD) {
        Ok(key) => Ok((key, true)),
        Err(e) => {
            warn!("No valid password for {}", info.algorithm());
            Err(e.into())
        }
    }
}

/// Decrypts a whole workbook stream
pub fn decrypt(key: &SecretKey, raw: &[u8]) -> Result<Vec<u8>, ExcelError> {
    let mut plain = raw.to_vec();
    let mut pos = 0usize;
    while pos + 4 <= plain.len() {
        let ty = RecordType::new(u16::from_le_bytes([plain[pos], plain[pos + 1]]));
        let size = usize::from(u16::from_le_bytes([plain[pos + 2], plain[pos + 3]]));
        let start = pos + 4;
        let end = (start + size).min(plain.len());
        let start = match ty {
            _ if ty.is_never_encrypted() => end,
            // lbPlyPos stays in plain text
            RecordType::BoundSheet8 => (start + 4).min(end),
            _ => start,
        };
        if start < end {
            key.decrypt(
                &mut plain[start..end],
                BlockContext {
                    stream_position: start as u64,
                    record_size: size,
                },
            )?;
        }
        pos = pos + 4 + size;
    }
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(code: u16, data: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&code.to_le_bytes());
        v.extend_from_slice(&(data.len() as u16).to_le_bytes());
        v.extend_from_slice(data);
        v
    }

    fn bof(vers: u16) -> Vec<u8> {
        let mut data = vers.to_le_bytes().to_vec();
        data.extend_from_slice(&5u16.to_le_bytes());
        data.resize(16, 0);
        rec(0x0809, &data)
    }

    #[test]
    fn plain_workbook() -> Result<(), ExcelError> {
        let mut raw = bof(0x0600);
        raw.extend(rec(0x0042, &1252u16.to_le_bytes()));
        raw.extend(rec(0x000a, &[]));
        raw.extend(rec(0x002f, &[0, 0, 1, 2, 3, 4])); // outside the globals
        assert!(probe(&raw)?.is_none());
        assert!(probe(&[])?.is_none());
        Ok(())
    }

    #[test]
    fn xor_filepass() -> Result<(), ExcelError> {
        let xo = XorObfuscation::for_password("secret").expect("empty password");
        let mut filepass = 0u16.to_le_bytes().to_vec();
        filepass.extend_from_slice(&xo.key.to_le_bytes());
        filepass.extend_from_slice(&xo.verifier.to_le_bytes());
        let mut raw = bof(0x0600);
        raw.extend(rec(0x002f, &filepass));
        raw.extend(rec(0x000a, &[]));

        let info = probe(&raw)?.expect("FilePass not detected");
        assert!(matches!(&info, EncryptionInfo::Xor(x) if *x == xo));
        let (_, default) = derive_key(&info, Some("secret"))?;
        assert!(!default);
        assert!(matches!(
            derive_key(&info, Some("wrong")),
            Err(ExcelError::InvalidPassword(_))
        ));
        assert!(matches!(
            derive_key(&info, None),
            Err(ExcelError::InvalidPassword(_))
        ));
        Ok(())
    }

    #[test]
    fn default_password() -> Result<(), ExcelError> {
        let xo = XorObfuscation::for_password(DEFAULT_PASSWORD).expect("empty password");
        let info = EncryptionInfo::Xor(xo);
        assert!(derive_key(&info, None)?.1);
        assert!(derive_key(&info, Some("whatever"))?.1);
        Ok(())
    }

    #[test]
    fn unknown_encryption_type() {
        let mut raw = bof(0x0600);
        raw.extend(rec(0x002f, &[7, 0]));
        assert!(matches!(probe(&raw), Err(ExcelError::Crypto(_))));
    }

    #[test]
    fn plain_records_are_untouched() -> Result<(), ExcelError> {
        let xo = XorObfuscation::for_password("pw").expect("empty password");
        let info = EncryptionInfo::Xor(xo);
        let (key, _) = derive_key(&info, Some("pw"))?;

        let mut raw = bof(0x0600);
        raw.extend(rec(0x002f, &[0, 0, 1, 2, 3, 4]));
        raw.extend(rec(0x0085, &[0x10, 0x20, 0x30, 0x40, 0xaa, 0xbb]));
        raw.extend(rec(0x0203, &[0x55; 14]));
        let plain = decrypt(&key, &raw)?;
        assert_eq!(plain.len(), raw.len());
        // BOF and FilePass
        assert_eq!(plain[..30], raw[..30]);
        // BoundSheet8: header and lbPlyPos
        assert_eq!(plain[30..38], raw[30..38]);
        assert_ne!(plain[38..40], raw[38..40]);
        // Number: header only
        assert_eq!(plain[40..44], raw[40..44]);
        assert_ne!(plain[44..], raw[44..]);
        Ok(())
    }
}
