//! XOR obfuscation (method 1)

use super::super::BlockContext;

/// XOR obfuscation metadata: the key and the password verifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XorObfuscation {
    /// The obfuscation key
    pub key: u16,
    /// The password verifier
    pub verifier: u16,
}

impl XorObfuscation {
    /// Computes the obfuscation metadata for `password`
    ///
    /// Returns [None] for the empty password
    pub fn for_password(password: &str) -> Option<Self> {
        let password = XorKey::password_bytes(password)?;
        Some(Self {
            key: XorKey::key_method1(&password),
            verifier: XorKey::verifier_method1(&password),
        })
    }

    /// Validate the provided password and return the derived obfuscation data
    pub fn get_key(&self, password: &str) -> Option<XorKey> {
        let password = XorKey::password_bytes(password)?;
        if XorKey::verifier_method1(&password) == self.verifier {
            Some(XorKey {
                key: XorKey::xor_array_method1(&password),
            })
        } else {
            None
        }
    }
}

/// Xor obfuscation array
#[derive(Debug, Clone)]
pub struct XorKey {
    key: [u8; 16],
}

impl XorKey {
    const PAD_ARRAY: [u8; 15] = [
        0xbb, 0xff, 0xff, 0xba, 0xff, 0xff, 0xb9, 0x80, 0x00, 0xbe, 0x0f, 0x00, 0xbf, 0x0f, 0x00,
    ];

    /// Reduces the password to at most 15 single byte characters
    ///
    /// Each UTF-16 unit contributes its low byte, or its high byte when the low one is zero
    fn password_bytes(password: &str) -> Option<Vec<u8>> {
        let pbytes: Vec<u8> = password
            .encode_utf16()
            .take(15)
            .map(|c| match c as u8 {
                0 => (c >> 8) as u8,
                lo => lo,
            })
            .collect();
        (!pbytes.is_empty()).then_some(pbytes)
    }

    fn position(ctx: &BlockContext) -> usize {
        (ctx.stream_position as usize).wrapping_add(ctx.record_size) & 0xf
    }

    pub(in super::super) fn apply(&self, block: &mut [u8], ctx: BlockContext) {
        let mut position = Self::position(&ctx);
        for v in block.iter_mut() {
            *v = (*v ^ self.key[position]).rotate_left(3);
            position = (position + 1) & 0xf;
        }
    }

    /// Obfuscates `block` (the inverse of the decryption transform)
    pub fn obfuscate(&self, block: &mut [u8], ctx: BlockContext) {
        let mut position = Self::position(&ctx);
        for v in block.iter_mut() {
            *v = v.rotate_right(3) ^ self.key[position];
            position = (position + 1) & 0xf;
        }
    }

    fn verifier_method1(password: &[u8]) -> u16 {
        let len = password.len();
        let mut verifier = 0u16;
        for c in password.iter().rev().chain(&[len as u8]) {
            let imd1: u16 = verifier >> 14 & 1;
            let imd2: u16 = (verifier << 1) & 0x7fff;
            verifier = (imd1 | imd2) ^ u16::from(*c);
        }
        verifier ^ 0xce4b
    }

    fn key_method1(password: &[u8]) -> u16 {
        const XOR_MATRIX: [u16; 105] = [
            0xaefc, 0x4dd9, 0x9bb2, 0x2745, 0x4e8a, 0x9d14, 0x2a09, 0x7b61, 0xf6c2, 0xfda5, 0xeb6b,
            0xc6f7, 0x9dcf, 0x2bbf, 0x4563, 0x8ac6, 0x05ad, 0x0b5a, 0x16b4, 0x2d68, 0x5ad0, 0x0375,
            0x06ea, 0x0dd4, 0x1ba8, 0x3750, 0x6ea0, 0xdd40, 0xd849, 0xa0b3, 0x5147, 0xa28e, 0x553d,
            0xaa7a, 0x44d5, 0x6f45, 0xde8a, 0xad35, 0x4a4b, 0x9496, 0x390d, 0x721a, 0xeb23, 0xc667,
            0x9cef, 0x29ff, 0x53fe, 0xa7fc, 0x5fd9, 0x47d3, 0x8fa6, 0x0f6d, 0x1eda, 0x3db4, 0x7b68,
            0xf6d0, 0xb861, 0x60e3, 0xc1c6, 0x93ad, 0x377b, 0x6ef6, 0xddec, 0x45a0, 0x8b40, 0x06a1,
            0x0d42, 0x1a84, 0x3508, 0x6a10, 0xaa51, 0x4483, 0x8906, 0x022d, 0x045a, 0x08b4, 0x1168,
            0x76b4, 0xed68, 0xcaf1, 0x85c3, 0x1ba7, 0x374e, 0x6e9c, 0x3730, 0x6e60, 0xdcc0, 0xa9a1,
            0x4363, 0x86c6, 0x1dad, 0x3331, 0x6662, 0xccc4, 0x89a9, 0x0373, 0x06e6, 0x0dcc, 0x1021,
            0x2042, 0x4084, 0x8108, 0x1231, 0x2462, 0x48c4,
        ];
        const INITIAL_CODE: [u16; 15] = [
            0xe1f0, 0x1d0f, 0xcc9c, 0x84c0, 0x110c, 0x0e10, 0xf1ce, 0x313e, 0x1872, 0xe139, 0xd40f,
            0x84f9, 0x280c, 0xa96a, 0x4ec3,
        ];
        let mut key = INITIAL_CODE[password.len() - 1];
        let mut current_element = 0x68 + 1;
        for c in password.iter().rev() {
            let mut c = *c;
            for _ in 0..7 {
                current_element -= 1;
                if c & 0x40 != 0 {
                    key ^= XOR_MATRIX[current_element];
                }
                c <<= 1;
            }
        }
        key
    }

    fn xor_array_method1(password: &[u8]) -> [u8; 16] {
        let key = Self::key_method1(password);
        let [key_lo, key_hi] = key.to_le_bytes();
        let mut padded = [0u8; 16];
        for (dst, src) in padded
            .iter_mut()
            .zip(password.iter().chain(Self::PAD_ARRAY.iter()))
        {
            *dst = *src;
        }
        for pair in padded.chunks_exact_mut(2) {
            pair[0] = (pair[0] ^ key_lo).rotate_right(1);
            pair[1] = (pair[1] ^ key_hi).rotate_right(1);
        }
        padded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method1() {
        assert_eq!(XorKey::key_method1(b"contextal"), 0x3702);
        assert_eq!(XorKey::key_method1(b"123456789abcdef"), 0xc378);
        assert!(XorObfuscation::for_password("").is_none());
        for (p, vrfy, arr) in [
            (
                "even",
                0xca95,
                b"\x96\x02\x96\x0e\xf9\xc6\xdbd\xdb\xc6\xf8y$f\xa39",
            ),
            (
                "odd",
                0xcc26,
                b"\xb2z7\x95\xfa\xb7X\xb7\xfa\x94EHZ\xcf\x05\x97",
            ),
            ("contextal", 0xdaa9, b"\xb0,6\xa1\xb3\xa7;+7F\xfed\\d\xfeG"),
            (
                "1",
                0xce28,
                b"\xd9>\xbe\x1c\x1c\x1c\xbe?\x01\xe3\x1edA<\xc6\xe3",
            ),
            (
                "0123456789abcde",
                0xb7c4,
                b"\xa5\x0e\xa4\x0f\xa7\x0c\xa6\r\xa1\n\r\xa7\x0c\xa4\x0fK",
            ),
            ("0123456789abcd", 0xb7a0, b"W'V&U%T$S#\xff\x8e\xfe\x8d\x92@"),
            (
                "0123456789abcdefgh",
                0xb7c4,
                b"\xa5\x0e\xa4\x0f\xa7\x0c\xa6\r\xa1\n\r\xa7\x0c\xa4\x0fK",
            ),
        ] {
            let info = XorObfuscation {
                key: 0,
                verifier: vrfy,
            };
            let key = info
                .get_key(p)
                .unwrap_or_else(|| panic!("verify fail for \"{p}\""));
            assert_eq!(key.key.as_slice(), arr, "wrong array on \"{p}\"");
            assert_eq!(
                XorObfuscation::for_password(p).map(|x| x.verifier),
                Some(vrfy)
            );
        }
        let info = XorObfuscation::for_password("even").unwrap();
        assert!(info.get_key("odd").is_none());
    }

    #[test]
    fn apply() {
        let key = XorKey {
            key: [
                42, 88, 43, 91, 40, 90, 41, 93, 46, 89, 42, 88, 43, 91, 40, 156,
            ],
        };
        const CYPHER: [u8; 11] = [
            0xacu8, 0x05, 0x00, 0x00, 0x5b, 0x28, 0xfc, 0x2a, 0xde, 0x6d, 0x5d,
        ];
        let mut data = CYPHER;
        key.apply(
            &mut data,
            BlockContext {
                stream_position: 1374,
                record_size: 11,
            },
        );
        assert_eq!(
            data.as_slice(),
            &[0xaf, 0x79, 0xc2, 0x59, 0x00, 0x00, 0x03, 0x00, 0x34, 0x32, 0x30]
        );
        let mut data = CYPHER;
        key.apply(
            &mut data[1..],
            BlockContext {
                stream_position: 1375,
                record_size: 11,
            },
        );
        assert_eq!(
            &data[1..],
            &[0x79, 0xc2, 0x59, 0x00, 0x00, 0x03, 0x00, 0x34, 0x32, 0x30]
        );

        let ctx = BlockContext {
            stream_position: 1374,
            record_size: 11,
        };
        let plain = data;
        key.obfuscate(&mut data, ctx);
        assert_eq!(data[1..], CYPHER[1..]);
        key.apply(&mut data, ctx);
        assert_eq!(data, plain);
    }
}
