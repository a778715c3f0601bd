//! Logical record payloads spanning [`Continue`](super::RecordType::Continue) records
use byteutils::io::*;
use encoding_rs::Encoding;
use std::io::{self, Read};

/// Reader over the payload of a record and its continuation fragments
///
/// Plain reads flow across fragment boundaries; unicode character arrays follow the
/// BIFF8 rule where each continuation restarts with a fresh option byte
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    parts: Vec<&'a [u8]>,
    index: usize,
    pos: usize,
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of record")
}

impl<'a> Fragments<'a> {
    /// Creates a reader over `parts`, the first being the record payload
    pub fn new(parts: Vec<&'a [u8]>) -> Self {
        Self {
            parts,
            index: 0,
            pos: 0,
        }
    }

    /// Creates a reader over a record without continuations
    pub fn single(data: &'a [u8]) -> Self {
        Self::new(vec![data])
    }

    /// Number of unread bytes, across all fragments
    pub fn remaining(&self) -> usize {
        self.parts
            .iter()
            .skip(self.index)
            .map(|p| p.len())
            .sum::<usize>()
            - self.pos
    }

    /// Number of fragments (the record itself included)
    pub fn fragment_count(&self) -> usize {
        self.parts.len()
    }

    fn current_remaining(&self) -> usize {
        self.parts
            .get(self.index)
            .map_or(0, |p| p.len() - self.pos)
    }

    fn next_fragment(&mut self) -> bool {
        if self.index + 1 < self.parts.len() {
            self.index += 1;
            self.pos = 0;
            true
        } else {
            false
        }
    }

    /// Skips `len` bytes
    pub fn skip(&mut self, mut len: usize) -> Result<(), io::Error> {
        while len > 0 {
            if self.current_remaining() == 0 && !self.next_fragment() {
                return Err(eof());
            }
            let done = self.current_remaining().min(len);
            self.pos += done;
            len -= done;
        }
        Ok(())
    }

    /// Reads `cch` characters, compressed (one byte each) unless `high_byte` is set
    ///
    /// At each fragment boundary an option byte selects the width of the remaining characters
    pub fn read_unicode(&mut self, cch: usize, mut high_byte: bool) -> Result<String, io::Error> {
        let mut units: Vec<u16> = Vec::with_capacity(cch);
        while units.len() < cch {
            if self.current_remaining() == 0 {
                if !self.next_fragment() {
                    return Err(eof());
                }
                high_byte = rdu8(self)? & 0x01 != 0;
                continue;
            }
            let cur = &self.parts[self.index][self.pos..];
            let wanted = cch - units.len();
            if high_byte {
                let n = (cur.len() / 2).min(wanted);
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Character split across record fragments",
                    ));
                }
                units.extend(
                    cur[..2 * n]
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]])),
                );
                self.pos += 2 * n;
            } else {
                let n = cur.len().min(wanted);
                units.extend(cur[..n].iter().map(|&b| u16::from(b)));
                self.pos += n;
            }
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads a *XLUnicodeString* (16-bit count)
    pub fn read_xl_unicode_string(&mut self) -> Result<String, io::Error> {
        let cch = rdu16le(self)?;
        let flags = rdu8(self)?;
        self.read_unicode(cch.into(), flags & 0x01 != 0)
    }

    /// Reads a *ShortXLUnicodeString* (8-bit count)
    pub fn read_short_xl_unicode_string(&mut self) -> Result<String, io::Error> {
        let cch = rdu8(self)?;
        let flags = rdu8(self)?;
        self.read_unicode(cch.into(), flags & 0x01 != 0)
    }

    /// Reads a *XLUnicodeRichExtendedString*, dropping formatting runs and phonetic data
    pub fn read_rich_extended_string(&mut self) -> Result<String, io::Error> {
        let cch = rdu16le(self)?;
        let flags = rdu8(self)?;
        let high_byte = flags & 0x01 != 0;
        let c_run = if flags & 0x08 != 0 { rdu16le(self)? } else { 0 };
        let cb_ext_rst = if flags & 0x04 != 0 {
            usize::try_from(rdi32le(self)?).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "Negative cbExtRst")
            })?
        } else {
            0
        };
        let value = self.read_unicode(cch.into(), high_byte)?;
        self.skip(usize::from(c_run) * 4 + cb_ext_rst)?;
        Ok(value)
    }

    /// Reads `len` bytes of code page text
    pub fn read_byte_string(
        &mut self,
        len: usize,
        encoding: &'static Encoding,
    ) -> Result<String, io::Error> {
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        let (value, _, had_errors) = encoding.decode(&bytes);
        if had_errors {
            tracing::debug!("Invalid {} sequence in byte string", encoding.name());
        }
        Ok(value.into_owned())
    }
}

impl Read for Fragments<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        while self.current_remaining() == 0 {
            if !self.next_fragment() {
                return Ok(0);
            }
        }
        let cur = &self.parts[self.index][self.pos..];
        let n = cur.len().min(buf.len());
        buf[..n].copy_from_slice(&cur[..n]);
        self.pos += n;
        Ok(n)
    }
}
