//! Win32 structs and fns
use std::fmt;

/// A Win32 GUID, as found in directory entries
#[derive(PartialEq, Eq, Clone, Copy, Default)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    /// Creates a GUID from 16 raw little endian bytes
    pub fn from_le_bytes(bytes: &[u8; 16]) -> Self {
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&bytes[8..16]);
        Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4,
        }
    }

    /// Checks whether the GUID is all zeroes
    pub fn is_null(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        for b in &self.data4[2..] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{self}}}")
    }
}

/// Translates a windows FILETIME to a [datetime](time::OffsetDateTime)
///
/// Returns None if the date is out of range
pub fn filetime_to_datetime(ftime: u64) -> Option<time::OffsetDateTime> {
    let ftime = i128::from(ftime).checked_sub(116_444_736_000_000_000)?;
    time::OffsetDateTime::from_unix_timestamp_nanos(ftime * 100).ok()
}
