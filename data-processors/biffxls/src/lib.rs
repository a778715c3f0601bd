//! # Legacy Excel workbook decoder (.xls)
//!
//! This crate decodes the cell values of *Excel Binary File Format* workbooks, as written by
//! Excel 5.0 up to Excel 2003 (BIFF5 and BIFF8). The single sheet files of Excel 2.x to 4.0
//! (BIFF2 to BIFF4) are read as one sheet workbooks
//!
//! Excel Binary files are *Compound File Binary Format* structures: check the [cfbole] crate for
//! details
//!
//! The main interface is the [`Xls`] struct:
//! ```no_run
//! use biffxls::{DecoderOptions, Xls};
//! use std::fs::File;
//!
//! let f = File::open("book.xls").unwrap();
//! let xls = Xls::open(f, &DecoderOptions::default()).unwrap();
//! for sheet in xls.workbook().worksheets() {
//!     for row in sheet.rows().unwrap() {
//!         let row = row.unwrap();
//!         println!("{}: {:?}", row.index, row.cells);
//!     }
//! }
//! ```
//!
//! Please refer to
//! [\[MS-XLS\]](https://docs.microsoft.com/en-us/openspecs/office_file_formats/ms-xls/cd03cb5f-ca02-4934-a391-bb674cb8aa06)
//! for the format documentation

#![warn(missing_docs)]

pub mod config;
pub mod decryption;
mod error;
pub mod numfmt;
pub mod records;
pub mod structures;
pub mod workbook;
pub mod worksheet;

pub use config::DecoderOptions;
pub use error::ExcelError;
pub use numfmt::{BuiltinNumberFormat, FormatTable, NumberFormat};
pub use structures::BiffVersion;
pub use workbook::{SheetInfo, Workbook};
pub use worksheet::{CellValue, Dimensions, ExcelDateTime, Row, Rows, Worksheet};

use cfbole::{crypto::OleCrypto, Ole, OleEntry};
use std::{
    fmt,
    io::{Cursor, Read, Seek},
};
use tracing::{debug, warn};

/// Workbook stream names, current first
const WORKBOOK_STREAMS: [&str; 2] = ["Workbook", "Book"];

/// Encryption details of a decoded workbook
#[derive(Debug, Clone, PartialEq)]
pub struct Encryption {
    /// The encryption scheme
    pub algorithm: String,
    /// Whether the default `VelvetSweatshop` password was used
    pub default_password: bool,
}

/// Interface to Xls structures
pub struct Xls<R> {
    workbook: Workbook,
    encryption: Option<Encryption>,
    reader: Option<R>,
}

impl<R> fmt::Debug for Xls<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xls")
            .field("workbook", &self.workbook)
            .field("encryption", &self.encryption)
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

fn find_workbook<R: Read + Seek>(ole: &Ole<R>) -> Option<Result<&OleEntry, ExcelError>> {
    WORKBOOK_STREAMS.iter().find_map(|name| {
        let entry = ole.get_entry_by_name(name).ok()?;
        if entry.is_stream() {
            Some(Ok(entry))
        } else {
            Some(Err(ExcelError::CompoundDocument(format!(
                "{name} entry is not a stream"
            ))))
        }
    })
}

impl<R: Read + Seek> Xls<R> {
    /// Opens a workbook
    ///
    /// The whole workbook stream is read into memory, decrypted when needed, and the globals
    /// are decoded. The reader is dropped right away unless
    /// [`leave_open`](DecoderOptions::leave_open) is set
    pub fn open(reader: R, options: &DecoderOptions) -> Result<Self, ExcelError> {
        let ole = Ole::new(reader)?;
        let (raw, package_encryption) = match find_workbook(&ole) {
            Some(entry) => (ole.read_stream(entry?)?, None),
            None if ole.get_entry_by_name("EncryptionInfo").is_ok() => {
                let (raw, encryption) = Self::open_package(&ole, options)?;
                (raw, Some(encryption))
            }
            None => {
                return Err(ExcelError::CompoundDocument(
                    "Workbook stream not found".to_string(),
                ))
            }
        };
        debug!("Workbook stream is {} bytes", raw.len());
        let reader = ole.into_inner();
        let reader = if options.leave_open {
            Some(reader)
        } else {
            drop(reader);
            None
        };

        let (data, encryption) = match decryption::probe(&raw)? {
            Some(info) => {
                let (key, default_password) =
                    decryption::derive_key(&info, options.password.as_deref())?;
                debug!("Decrypting {} workbook", info.algorithm());
                let data = decryption::decrypt(&key, &raw)?;
                let encryption = Encryption {
                    algorithm: info.algorithm(),
                    default_password,
                };
                (data, Some(encryption))
            }
            None => (raw, package_encryption),
        };
        let workbook = Workbook::new(data, options)?;
        Ok(Self {
            workbook,
            encryption,
            reader,
        })
    }

    /// Decrypts an *EncryptedPackage* and returns the workbook stream it holds
    fn open_package(
        ole: &Ole<R>,
        options: &DecoderOptions,
    ) -> Result<(Vec<u8>, Encryption), ExcelError> {
        let crypto = OleCrypto::new(ole)?;
        let (key, default_password) =
            decryption::derive_key(&crypto.encryption_info, options.password.as_deref())?;
        let package = crypto.decrypt(&key, ole)?;
        let encryption = Encryption {
            algorithm: crypto.encryption_info.algorithm(),
            default_password,
        };
        if package.starts_with(b"PK") {
            warn!("Encrypted package is an OOXML document");
            return Err(ExcelError::Unsupported(
                "encrypted OOXML workbooks".to_string(),
            ));
        }
        let inner = Ole::new(Cursor::new(package))?;
        let entry = find_workbook(&inner).ok_or_else(|| {
            ExcelError::CompoundDocument("Workbook stream not found in package".to_string())
        })??;
        Ok((inner.read_stream(entry)?, encryption))
    }
}

impl<R> Xls<R> {
    /// The *Workbook*
    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Mutable access to the *Workbook*, e.g. to replace the number format collaborator
    pub fn workbook_mut(&mut self) -> &mut Workbook {
        &mut self.workbook
    }

    /// Encryption details, if the workbook was protected
    pub fn encryption(&self) -> Option<&Encryption> {
        self.encryption.as_ref()
    }

    /// Hands back the reader, if kept open
    pub fn release(&mut self) -> Option<R> {
        self.reader.take()
    }
}
