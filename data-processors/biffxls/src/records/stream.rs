//! Forward scanning record cursor
use super::{Fragments, RecordType};
use crate::ExcelError;
use std::fmt;
use tracing::{debug, warn};

/// How a record whose declared length overruns the stream is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
    /// The overrun is a [`ExcelError::RecordStream`] error
    Strict,
    /// The payload is truncated to the available bytes
    #[default]
    Loose,
}

/// A physical BIFF record
///
/// The payload borrows from the underlying stream
#[derive(Clone, Copy)]
pub struct Record<'a> {
    /// The raw record id
    pub code: u16,
    /// The record type
    pub ty: RecordType,
    /// Offset of the record header within the stream
    pub offset: u64,
    /// The length found in the record header
    pub declared_len: u16,
    /// The payload
    pub data: &'a [u8],
}

impl Record<'_> {
    /// Offset of the first byte of the payload
    pub fn data_offset(&self) -> u64 {
        self.offset + 4
    }

    /// Offset of the next record header
    pub fn end(&self) -> u64 {
        self.data_offset() + self.data.len() as u64
    }

    /// Returns true if the payload was cut short by the end of the stream
    pub fn is_truncated(&self) -> bool {
        self.data.len() < usize::from(self.declared_len)
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("code", &format_args!("{:#06x}", self.code))
            .field("ty", &self.ty)
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Cursor over the records of a (plain text) workbook stream
///
/// Each read advances by `4 + len` bytes; [`Continue`](RecordType::Continue) records are
/// returned as regular records unless [`read_logical`](Self::read_logical) is used
pub struct RecordStream<'a> {
    buf: &'a [u8],
    pos: usize,
    policy: LengthPolicy,
}

impl fmt::Debug for RecordStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("pos", &self.pos)
            .field("len", &self.buf.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<'a> RecordStream<'a> {
    /// Creates a cursor positioned at the start of `buf`
    pub fn new(buf: &'a [u8], policy: LengthPolicy) -> Self {
        Self {
            buf,
            pos: 0,
            policy,
        }
    }

    /// Current offset
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Size of the underlying stream
    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Returns true if the underlying stream is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Moves the cursor to `offset`
    pub fn seek(&mut self, offset: u64) -> Result<(), ExcelError> {
        self.pos = usize::try_from(offset)
            .ok()
            .filter(|&pos| pos <= self.buf.len())
            .ok_or_else(|| ExcelError::RecordStream {
                offset,
                message: format!("seek past the end of the stream ({} bytes)", self.buf.len()),
            })?;
        Ok(())
    }

    /// Reads the next record
    ///
    /// Returns [None] at the end of data: fewer than 4 bytes left, or a zero record header
    /// (stream padding). The BIFF2 *Dimensions* record has id zero but is never empty
    pub fn read(&mut self) -> Result<Option<Record<'a>>, ExcelError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 4 {
            return Ok(None);
        }
        let code = u16::from_le_bytes([rest[0], rest[1]]);
        let declared_len = u16::from_le_bytes([rest[2], rest[3]]);
        if code == 0 && declared_len == 0 {
            debug!("End of records at offset 0x{:x}", self.pos);
            return Ok(None);
        }
        let offset = self.position();
        let len = usize::from(declared_len);
        let avail = rest.len() - 4;
        let data = if len <= avail {
            &rest[4..4 + len]
        } else {
            match self.policy {
                LengthPolicy::Strict => {
                    return Err(ExcelError::RecordStream {
                        offset,
                        message: format!(
                            "record {code:#06x} declares {len} bytes but only {avail} remain"
                        ),
                    })
                }
                LengthPolicy::Loose => {
                    warn!(
                        "Record {code:#06x} at 0x{offset:x} truncated from {len} to {avail} bytes"
                    );
                    &rest[4..]
                }
            }
        };
        self.pos += 4 + data.len();
        Ok(Some(Record {
            code,
            ty: RecordType::new(code),
            offset,
            declared_len,
            data,
        }))
    }

    /// Reads the record at `offset`
    pub fn read_at(&mut self, offset: u64) -> Result<Option<Record<'a>>, ExcelError> {
        self.seek(offset)?;
        self.read()
    }

    /// Returns the type of the next record without consuming it
    pub fn peek_type(&self) -> Option<RecordType> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 4 {
            return None;
        }
        match (
            u16::from_le_bytes([rest[0], rest[1]]),
            u16::from_le_bytes([rest[2], rest[3]]),
        ) {
            (0, 0) => None,
            (code, _) => Some(RecordType::new(code)),
        }
    }

    /// Consumes the [`Continue`](RecordType::Continue) records immediately following the
    /// current position and returns their payloads
    pub fn continuations(&mut self) -> Result<Vec<&'a [u8]>, ExcelError> {
        let mut parts = Vec::new();
        while self.peek_type() == Some(RecordType::Continue) {
            match self.read()? {
                Some(record) => parts.push(record.data),
                None => break,
            }
        }
        Ok(parts)
    }

    /// Reads the next record together with its continuation fragments
    pub fn read_logical(&mut self) -> Result<Option<(Record<'a>, Fragments<'a>)>, ExcelError> {
        let Some(record) = self.read()? else {
            return Ok(None);
        };
        let mut parts = vec![record.data];
        parts.extend(self.continuations()?);
        Ok(Some((record, Fragments::new(parts))))
    }

    /// Skips a nested substream whose BOF has just been read
    pub fn skip_substream(&mut self) -> Result<(), ExcelError> {
        let mut depth = 1usize;
        while depth > 0 {
            let Some(record) = self.read()? else {
                break;
            };
            match record.ty {
                ty if ty.is_bof() => depth += 1,
                RecordType::EOF => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}
