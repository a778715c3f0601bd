//! Decoded BIFF records
//!
//! Record dispatch is a closed union: every record the decoder reacts to has its own
//! [`BiffRecord`] variant, and version specific layouts are selected through [`BiffVersion`]
use crate::records::{Fragments, Record, RecordType};
use crate::ExcelError;
use byteutils::io::*;
use encoding_rs::Encoding;
use std::fmt;
use std::io::Read;
use tracing::debug;

/// Version of the record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BiffVersion {
    /// Excel 2.x: single sheet, 3-byte cell attributes with a narrow XF index
    Biff2,
    /// Excel 3.0: single sheet, wide XF index
    Biff3,
    /// Excel 4.0: single sheet, wide XF index
    Biff4,
    /// Excel 5.0/95: byte strings, narrow row fields
    Biff5,
    /// Excel 97-2003: unicode strings, shared string table
    Biff8,
}

impl fmt::Display for BiffVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Biff2 => write!(f, "BIFF2"),
            Self::Biff3 => write!(f, "BIFF3"),
            Self::Biff4 => write!(f, "BIFF4"),
            Self::Biff5 => write!(f, "BIFF5"),
            Self::Biff8 => write!(f, "BIFF8"),
        }
    }
}

/// Decoding parameters shared by all records of a workbook
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    /// Record layout version
    pub version: BiffVersion,
    /// Encoding of byte strings
    pub encoding: &'static Encoding,
}

/// Type of BOF
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BofType {
    /// Workbook globals
    Workbook,
    /// Dialog or Worksheet. It depends on WsBool record in substream.
    Worksheet,
    /// Chartsheet
    Chart,
    /// Macrosheet
    MacroSheet,
    /// BIFF4 workbook bundling several sheets
    Workspace,
    /// Any other substream type
    Other(u16),
}

/// Beginning of a substream
#[derive(Debug, Clone, Copy)]
pub struct Bof {
    /// Raw version field
    pub vers: u16,
    /// Layout version, if recognized
    pub version: Option<BiffVersion>,
    /// Substream type
    pub dt: BofType,
}

/// Hidden state of a sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetVisibility {
    /// Visible
    Visible,
    /// Hidden, can be unhidden from the interface
    Hidden,
    /// Hidden, can only be unhidden programmatically
    VeryHidden,
    /// Fallback for invalid values
    Unknown(u8),
}

impl SheetVisibility {
    fn new(v: u8) -> Self {
        match v & 0x03 {
            0 => Self::Visible,
            1 => Self::Hidden,
            2 => Self::VeryHidden,
            other => Self::Unknown(other),
        }
    }

    /// Returns the visibility name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::VeryHidden => "veryHidden",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Type of sheet, as declared in the globals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetType {
    /// Dialog or Worksheet
    Worksheet,
    /// Macrosheet
    MacroSheet,
    /// Chartsheet
    Chart,
    /// VBA Module
    VbaModule,
    /// Fallback for invalid value
    Unknown(u8),
}

impl SheetType {
    fn new(v: u8) -> Self {
        match v {
            0x00 => Self::Worksheet,
            0x01 => Self::MacroSheet,
            0x02 => Self::Chart,
            0x06 => Self::VbaModule,
            other => Self::Unknown(other),
        }
    }
}

/// Sheet declaration (*BoundSheet8*)
#[derive(Debug, Clone)]
pub struct BoundSheet {
    /// Stream position of the sheet BOF
    pub offset: u32,
    /// Hidden state
    pub visibility: SheetVisibility,
    /// Sheet type
    pub sheet_type: SheetType,
    /// Sheet name
    pub name: String,
}

/// Number format declaration
#[derive(Debug, Clone)]
pub struct FormatRecord {
    /// Format id referenced by XF records; before BIFF5 formats are numbered in the order
    /// they appear
    pub id: Option<u16>,
    /// Format code
    pub code: String,
}

/// Cell style (the parts the decoder uses)
#[derive(Debug, Clone, Copy)]
pub struct Xf {
    /// Font index
    pub font: u16,
    /// Number format id
    pub format: u16,
}

/// Shared string table
#[derive(Debug, Clone, Default)]
pub struct Sst {
    /// Total number of string references in the workbook
    pub total: u32,
    /// Declared number of unique strings
    pub unique: u32,
    /// Decoded strings; fewer than `unique` if the table is damaged
    pub strings: Vec<String>,
}

/// Used range of a sheet; the last row and column are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionsRecord {
    /// First used row
    pub first_row: u32,
    /// One past the last used row
    pub last_row: u32,
    /// First used column
    pub first_col: u16,
    /// One past the last used column
    pub last_col: u16,
}

/// Row properties
#[derive(Debug, Clone, Copy)]
pub struct RowRecord {
    /// Zero-based row index
    pub index: u16,
    /// First defined column
    pub first_col: u16,
    /// One past the last defined column
    pub last_col: u16,
}

/// Row block index of a sheet
#[derive(Debug, Clone)]
pub struct IndexRecord {
    /// First row with a ROW record
    pub first_row: u32,
    /// One past the last row with a ROW record
    pub last_row: u32,
    /// Stream positions of the DBCell records
    pub dbcells: Vec<u32>,
}

/// Row block trailer
#[derive(Debug, Clone, Copy)]
pub struct DbCell {
    /// Distance from the DBCell back to the first ROW record of the block
    pub first_row_offset: u32,
}

/// Reference from a cell to its XF record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XfIndex {
    /// 6-bit index from the BIFF2 cell attributes; 63 defers to the preceding *IXFE* record
    Narrow(u8),
    /// 16-bit index (BIFF3 onwards)
    Wide(u16),
}

impl XfIndex {
    /// Narrow index telling that the actual one is in an *IXFE* record
    pub const EXTENDED: u8 = 63;

    /// Resolves the index, `ixfe` being the value of the last *IXFE* record
    pub fn resolve(self, ixfe: Option<u16>) -> u16 {
        match self {
            Self::Narrow(Self::EXTENDED) => ixfe.unwrap_or(Self::EXTENDED.into()),
            Self::Narrow(xf) => xf.into(),
            Self::Wide(xf) => xf,
        }
    }
}

/// Cell locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Zero-based row index
    pub row: u16,
    /// Zero-based column index
    pub col: u16,
    /// Style of the cell
    pub xf: XfIndex,
}

/// Cell error value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CellError {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    GettingData,
    Unknown(u8),
}

impl CellError {
    /// Maps a BErr code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Null,
            0x07 => Self::Div0,
            0x0F => Self::Value,
            0x17 => Self::Ref,
            0x1D => Self::Name,
            0x24 => Self::Num,
            0x2A => Self::NA,
            0x2B => Self::GettingData,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "#NULL!"),
            Self::Div0 => write!(f, "#DIV/0!"),
            Self::Value => write!(f, "#VALUE!"),
            Self::Ref => write!(f, "#REF!"),
            Self::Name => write!(f, "#NAME?"),
            Self::Num => write!(f, "#NUM!"),
            Self::NA => write!(f, "#N/A"),
            Self::GettingData => write!(f, "#GETTING_DATA"),
            Self::Unknown(code) => write!(f, "UNSUPPORTED_ERROR(0x{code:02x})"),
        }
    }
}

/// Boolean or error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoolErrValue {
    /// Boolean value
    Bool(bool),
    /// Error value
    Error(CellError),
}

/// Cached result of a formula
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormulaValue {
    /// Numeric result
    Number(f64),
    /// String result, stored in the following String record
    String,
    /// Boolean result
    Bool(bool),
    /// Error result
    Error(CellError),
    /// Empty string result
    Blank,
}

impl FormulaValue {
    fn new(bytes: [u8; 8]) -> Self {
        if bytes[6] != 0xff || bytes[7] != 0xff {
            return Self::Number(f64::from_le_bytes(bytes));
        }
        match bytes[0] {
            0x00 => Self::String,
            0x01 => Self::Bool(bytes[2] != 0),
            0x02 => Self::Error(CellError::from_code(bytes[2])),
            0x03 => Self::Blank,
            other => {
                debug!("Unknown formula result type {other:#x}");
                Self::Blank
            }
        }
    }
}

/// Run of RK numbers in a row
#[derive(Debug, Clone)]
pub struct MulRk {
    /// Zero-based row index
    pub row: u16,
    /// Column of the first value
    pub first_col: u16,
    /// XF index and value of each cell
    pub values: Vec<(u16, f64)>,
}

impl MulRk {
    /// Column of the last value
    pub fn last_col(&self) -> u16 {
        self.first_col
            .saturating_add(self.values.len().saturating_sub(1) as u16)
    }

    /// Value stored for `column`
    pub fn value_at(&self, column: u16) -> Option<(u16, f64)> {
        let index = usize::from(column.checked_sub(self.first_col)?);
        self.values.get(index).copied()
    }
}

/// Run of blank cells in a row
#[derive(Debug, Clone)]
pub struct MulBlank {
    /// Zero-based row index
    pub row: u16,
    /// Column of the first cell
    pub first_col: u16,
    /// XF index of each cell
    pub xfs: Vec<u16>,
}

/// Decodes an *RkNumber*
pub fn decode_rk(rk: u32) -> f64 {
    let value = if rk & 0x02 != 0 {
        // 30-bit signed integer
        f64::from((rk as i32) >> 2)
    } else {
        f64::from_bits(u64::from(rk >> 2) << 34)
    };
    if rk & 0x01 != 0 {
        value / 100.0
    } else {
        value
    }
}

/// A decoded BIFF record
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum BiffRecord {
    Bof(Bof),
    Eof,
    /// Encryption marker, with the encryption type (absent in BIFF5)
    FilePass(Option<u16>),
    BoundSheet(BoundSheet),
    CodePage(u16),
    Date1904(bool),
    Format(FormatRecord),
    Xf(Xf),
    Sst(Sst),
    WsBool { dialog: bool },
    Dimensions(DimensionsRecord),
    Row(RowRecord),
    Index(IndexRecord),
    DbCell(DbCell),
    Number { cell: Cell, value: f64 },
    Rk { cell: Cell, value: f64 },
    MulRk(MulRk),
    BoolErr { cell: Cell, value: BoolErrValue },
    LabelSst { cell: Cell, index: u32 },
    Label { cell: Cell, value: String },
    Blank(Cell),
    MulBlank(MulBlank),
    Formula { cell: Cell, value: FormulaValue },
    /// Value of the preceding string formula
    StringValue(String),
    /// Formula side records (Array, ShrFmla, Table, Uncalced)
    FormulaAux,
    /// Wide XF index of the next BIFF2 cell
    Ixfe(u16),
    Continue,
    Other(u16),
}

fn read_cell<R: Read>(r: &mut R, ctx: &ParseContext) -> Result<Cell, ExcelError> {
    let row = rdu16le(r)?;
    let col = rdu16le(r)?;
    let xf = match ctx.version {
        BiffVersion::Biff2 => {
            let [attr, _, _]: [u8; 3] = rdarray(r)?;
            XfIndex::Narrow(attr & 0x3f)
        }
        _ => XfIndex::Wide(rdu16le(r)?),
    };
    Ok(Cell { row, col, xf })
}

fn read_text(f: &mut Fragments, ctx: &ParseContext) -> Result<String, ExcelError> {
    Ok(match ctx.version {
        BiffVersion::Biff8 => f.read_xl_unicode_string()?,
        _ => {
            let cch = rdu16le(f)?;
            f.read_byte_string(cch.into(), ctx.encoding)?
        }
    })
}

/// Byte string with an 8-bit length
fn read_short_text(f: &mut Fragments, ctx: &ParseContext) -> Result<String, ExcelError> {
    let cch = rdu8(f)?;
    Ok(f.read_byte_string(cch.into(), ctx.encoding)?)
}

impl BiffRecord {
    /// Decodes `record`, whose payload (and continuations) `fragments` reads
    pub fn parse(
        record: &Record,
        fragments: &mut Fragments,
        ctx: &ParseContext,
    ) -> Result<Self, ExcelError> {
        Self::parse_payload(record, fragments, ctx).map_err(|e| match e {
            ExcelError::Format(message) => ExcelError::Format(format!(
                "{:?} record at 0x{:x}: {message}",
                record.ty, record.offset
            )),
            e => e,
        })
    }

    fn parse_payload(
        record: &Record,
        f: &mut Fragments,
        ctx: &ParseContext,
    ) -> Result<Self, ExcelError> {
        let len = record.data.len();
        if ctx.version != BiffVersion::Biff2 && record.ty.is_biff2_only() {
            return Ok(Self::Other(record.code));
        }
        Ok(match record.ty {
            ty if ty.is_bof() => {
                let vers = rdu16le(f)?;
                let dt = match rdu16le(f)? {
                    0x0005 => BofType::Workbook,
                    0x0010 => BofType::Worksheet,
                    0x0020 => BofType::Chart,
                    0x0040 => BofType::MacroSheet,
                    0x0100 => BofType::Workspace,
                    other => BofType::Other(other),
                };
                let version = match (ty, vers) {
                    (RecordType::Bof2, _) => Some(BiffVersion::Biff2),
                    (RecordType::Bof3, _) => Some(BiffVersion::Biff3),
                    (RecordType::Bof4, _) => Some(BiffVersion::Biff4),
                    (_, 0x0600) => Some(BiffVersion::Biff8),
                    (_, 0x0500) => Some(BiffVersion::Biff5),
                    _ => None,
                };
                Self::Bof(Bof { vers, version, dt })
            }
            RecordType::EOF => Self::Eof,
            RecordType::FilePass => match ctx.version {
                BiffVersion::Biff8 => Self::FilePass(Some(rdu16le(f)?)),
                _ => Self::FilePass(None),
            },
            RecordType::BoundSheet8 => {
                let offset = rdu32le(f)?;
                let visibility = SheetVisibility::new(rdu8(f)?);
                let sheet_type = SheetType::new(rdu8(f)?);
                let name = match ctx.version {
                    BiffVersion::Biff8 => f.read_short_xl_unicode_string()?,
                    _ => read_short_text(f, ctx)?,
                };
                Self::BoundSheet(BoundSheet {
                    offset,
                    visibility,
                    sheet_type,
                    name,
                })
            }
            RecordType::CodePage => Self::CodePage(rdu16le(f)?),
            RecordType::Date1904 => Self::Date1904(rdu16le(f)? != 0),
            RecordType::Format2 => Self::Format(FormatRecord {
                id: None,
                code: read_short_text(f, ctx)?,
            }),
            RecordType::Format => Self::Format(match ctx.version {
                BiffVersion::Biff8 => FormatRecord {
                    id: Some(rdu16le(f)?),
                    code: f.read_xl_unicode_string()?,
                },
                BiffVersion::Biff5 => FormatRecord {
                    id: Some(rdu16le(f)?),
                    code: read_short_text(f, ctx)?,
                },
                _ => {
                    let _unused = rdu16le(f)?;
                    FormatRecord {
                        id: None,
                        code: read_short_text(f, ctx)?,
                    }
                }
            }),
            RecordType::XF2 => {
                let [font, _, format]: [u8; 3] = rdarray(f)?;
                Self::Xf(Xf {
                    font: font.into(),
                    format: (format & 0x3f).into(),
                })
            }
            RecordType::XF3 | RecordType::XF4 => {
                let [font, format]: [u8; 2] = rdarray(f)?;
                Self::Xf(Xf {
                    font: font.into(),
                    format: format.into(),
                })
            }
            RecordType::XF => Self::Xf(Xf {
                font: rdu16le(f)?,
                format: rdu16le(f)?,
            }),
            RecordType::SST => {
                let total = rdu32le(f)?;
                let unique = rdu32le(f)?;
                let mut strings = Vec::new();
                for n in 0..unique {
                    if f.remaining() == 0 {
                        debug!("SST ended after {n} of {unique} strings");
                        break;
                    }
                    match f.read_rich_extended_string() {
                        Ok(s) => strings.push(s),
                        Err(e) => {
                            debug!("SST string {n} could not be decoded: {e}");
                            break;
                        }
                    }
                }
                Self::Sst(Sst {
                    total,
                    unique,
                    strings,
                })
            }
            RecordType::WsBool => Self::WsBool {
                dialog: rdu16le(f)? & 0x0010 != 0,
            },
            RecordType::Dimensions | RecordType::Dimensions2 => Self::Dimensions(match ctx.version {
                BiffVersion::Biff8 => DimensionsRecord {
                    first_row: rdu32le(f)?,
                    last_row: rdu32le(f)?,
                    first_col: rdu16le(f)?,
                    last_col: rdu16le(f)?,
                },
                _ => DimensionsRecord {
                    first_row: rdu16le(f)?.into(),
                    last_row: rdu16le(f)?.into(),
                    first_col: rdu16le(f)?,
                    last_col: rdu16le(f)?,
                },
            }),
            RecordType::Row | RecordType::Row2 => Self::Row(RowRecord {
                index: rdu16le(f)?,
                first_col: rdu16le(f)?,
                last_col: rdu16le(f)?,
            }),
            RecordType::Index => {
                let _reserved = rdu32le(f)?;
                let (first_row, last_row, header) = match ctx.version {
                    BiffVersion::Biff8 => (rdu32le(f)?, rdu32le(f)?, 16),
                    _ => (rdu16le(f)?.into(), rdu16le(f)?.into(), 12),
                };
                let _default_xf = rdu32le(f)?;
                let count = len.saturating_sub(header) / 4;
                let dbcells = (0..count)
                    .map(|_| rdu32le(f))
                    .collect::<Result<Vec<u32>, _>>()?;
                Self::Index(IndexRecord {
                    first_row,
                    last_row,
                    dbcells,
                })
            }
            RecordType::DBCell => Self::DbCell(DbCell {
                first_row_offset: rdu32le(f)?,
            }),
            RecordType::Number | RecordType::Number2 => Self::Number {
                cell: read_cell(f, ctx)?,
                value: rdf64le(f)?,
            },
            RecordType::Integer2 => Self::Number {
                cell: read_cell(f, ctx)?,
                value: rdu16le(f)?.into(),
            },
            RecordType::RK => Self::Rk {
                cell: read_cell(f, ctx)?,
                value: decode_rk(rdu32le(f)?),
            },
            RecordType::MulRk => {
                let row = rdu16le(f)?;
                let first_col = rdu16le(f)?;
                let count = len.saturating_sub(6) / 6;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let xf = rdu16le(f)?;
                    values.push((xf, decode_rk(rdu32le(f)?)));
                }
                let last_col = rdu16le(f)?;
                if last_col < first_col || usize::from(last_col - first_col) + 1 != count {
                    return Err(ExcelError::Format(format!(
                        "MulRk spans columns {first_col}..={last_col} but holds {count} values"
                    )));
                }
                Self::MulRk(MulRk {
                    row,
                    first_col,
                    values,
                })
            }
            RecordType::MulBlank => {
                let row = rdu16le(f)?;
                let first_col = rdu16le(f)?;
                let count = len.saturating_sub(6) / 2;
                let xfs = (0..count)
                    .map(|_| rdu16le(f))
                    .collect::<Result<Vec<u16>, _>>()?;
                let last_col = rdu16le(f)?;
                if last_col < first_col || usize::from(last_col - first_col) + 1 != count {
                    return Err(ExcelError::Format(format!(
                        "MulBlank spans columns {first_col}..={last_col} but holds {count} cells"
                    )));
                }
                Self::MulBlank(MulBlank {
                    row,
                    first_col,
                    xfs,
                })
            }
            RecordType::BoolErr | RecordType::BoolErr2 => {
                let cell = read_cell(f, ctx)?;
                let value = rdu8(f)?;
                let value = match rdu8(f)? {
                    0 => BoolErrValue::Bool(value != 0),
                    _ => BoolErrValue::Error(CellError::from_code(value)),
                };
                Self::BoolErr { cell, value }
            }
            RecordType::LabelSst => Self::LabelSst {
                cell: read_cell(f, ctx)?,
                index: rdu32le(f)?,
            },
            RecordType::Label | RecordType::RString => Self::Label {
                cell: read_cell(f, ctx)?,
                value: read_text(f, ctx)?,
            },
            RecordType::Label2 => Self::Label {
                cell: read_cell(f, ctx)?,
                value: read_short_text(f, ctx)?,
            },
            RecordType::Blank | RecordType::Blank2 => Self::Blank(read_cell(f, ctx)?),
            RecordType::Formula | RecordType::Formula3 | RecordType::Formula4 => Self::Formula {
                cell: read_cell(f, ctx)?,
                value: FormulaValue::new(rdarray(f)?),
            },
            RecordType::String => Self::StringValue(read_text(f, ctx)?),
            RecordType::String2 => Self::StringValue(read_short_text(f, ctx)?),
            RecordType::Ixfe => Self::Ixfe(rdu16le(f)?),
            RecordType::Array | RecordType::ShrFmla | RecordType::Table | RecordType::Uncalced => {
                Self::FormulaAux
            }
            RecordType::Continue => Self::Continue,
            _ => Self::Other(record.code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{LengthPolicy, RecordStream};

    const BIFF8: ParseContext = ParseContext {
        version: BiffVersion::Biff8,
        encoding: encoding_rs::WINDOWS_1252,
    };

    fn parse(code: u16, data: &[u8], ctx: &ParseContext) -> Result<BiffRecord, ExcelError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&code.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.extend_from_slice(data);
        let mut rs = RecordStream::new(&buf, LengthPolicy::Strict);
        let (record, mut fragments) = rs.read_logical()?.expect("no record");
        BiffRecord::parse(&record, &mut fragments, ctx)
    }

    #[test]
    fn rk_numbers() {
        assert_eq!(decode_rk(0x3ff0_0000), 1.0);
        assert_eq!(decode_rk((100 << 2) | 2), 100.0);
        assert_eq!(decode_rk((12345 << 2) | 3), 123.45);
        assert_eq!(decode_rk(((-5i32 << 2) | 2) as u32), -5.0);
        // Largest and smallest 30-bit integers
        assert_eq!(decode_rk((0x1fff_ffff << 2) | 2), 536_870_911.0);
        assert_eq!(decode_rk(0x8000_0002), -536_870_912.0);
        // Floats keep the 30 most significant bits
        let pi = std::f64::consts::PI;
        let rk = ((pi.to_bits() >> 32) as u32) & !3;
        assert!((decode_rk(rk) - pi).abs() < 1e-4);
        let rk = (((pi * 100.0).to_bits() >> 32) as u32 & !3) | 1;
        assert!((decode_rk(rk) - pi).abs() < 1e-4);
    }

    #[test]
    fn mulrk_spans_columns() -> Result<(), ExcelError> {
        let mut data = Vec::new();
        data.extend_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        for v in [10u32, 20, 30, 40] {
            data.extend_from_slice(&15u16.to_le_bytes());
            data.extend_from_slice(&((v << 2) | 2).to_le_bytes());
        }
        data.extend_from_slice(&5u16.to_le_bytes());
        let BiffRecord::MulRk(mulrk) = parse(0x00bd, &data, &BIFF8)? else {
            panic!("not a MulRk");
        };
        assert_eq!(mulrk.row, 7);
        assert_eq!(mulrk.values.len(), 4);
        assert_eq!(mulrk.last_col(), 5);
        assert_eq!(mulrk.value_at(2), Some((15, 10.0)));
        assert_eq!(mulrk.value_at(5), Some((15, 40.0)));
        assert_eq!(mulrk.value_at(1), None);
        assert_eq!(mulrk.value_at(6), None);

        // colLast disagreeing with the number of values
        let n = data.len();
        data[n - 2] = 9;
        assert!(matches!(
            parse(0x00bd, &data, &BIFF8),
            Err(ExcelError::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn formula_results() {
        let number = FormulaValue::new(2.5f64.to_le_bytes());
        assert_eq!(number, FormulaValue::Number(2.5));
        assert_eq!(
            FormulaValue::new([0, 0, 0, 0, 0, 0, 0xff, 0xff]),
            FormulaValue::String
        );
        assert_eq!(
            FormulaValue::new([1, 0, 1, 0, 0, 0, 0xff, 0xff]),
            FormulaValue::Bool(true)
        );
        assert_eq!(
            FormulaValue::new([2, 0, 0x07, 0, 0, 0, 0xff, 0xff]),
            FormulaValue::Error(CellError::Div0)
        );
        assert_eq!(
            FormulaValue::new([3, 0, 0, 0, 0, 0, 0xff, 0xff]),
            FormulaValue::Blank
        );
    }

    #[test]
    fn boolerr_and_errors() -> Result<(), ExcelError> {
        let cell = [1, 0, 2, 0, 15, 0];
        let mut data = cell.to_vec();
        data.extend_from_slice(&[0x2a, 1]);
        let BiffRecord::BoolErr { cell, value } = parse(0x0205, &data, &BIFF8)? else {
            panic!("not a BoolErr");
        };
        assert_eq!((cell.row, cell.col, cell.xf), (1, 2, XfIndex::Wide(15)));
        assert_eq!(value, BoolErrValue::Error(CellError::NA));
        assert_eq!(CellError::NA.to_string(), "#N/A");
        assert_eq!(CellError::from_code(0x99).to_string(), "UNSUPPORTED_ERROR(0x99)");
        Ok(())
    }

    #[test]
    fn version_specific_layouts() -> Result<(), ExcelError> {
        let biff5 = ParseContext {
            version: BiffVersion::Biff5,
            encoding: encoding_rs::WINDOWS_1251,
        };

        let dims = [1, 0, 10, 0, 0, 0, 4, 0];
        let BiffRecord::Dimensions(d) = parse(0x0200, &dims, &biff5)? else {
            panic!("not Dimensions");
        };
        assert_eq!((d.first_row, d.last_row, d.first_col, d.last_col), (1, 10, 0, 4));

        let mut sheet = vec![0x10, 0x02, 0, 0, 1, 0, 2];
        sheet.extend_from_slice(&[0xc0, 0xe1]);
        let BiffRecord::BoundSheet(bs) = parse(0x0085, &sheet, &biff5)? else {
            panic!("not BoundSheet");
        };
        assert_eq!(bs.offset, 0x210);
        assert_eq!(bs.visibility, SheetVisibility::Hidden);
        assert_eq!(bs.name, "Аб");

        let mut sheet = vec![0x10, 0x02, 0, 0, 0, 0, 3, 1];
        for c in "Σx1".encode_utf16() {
            sheet.extend_from_slice(&c.to_le_bytes());
        }
        let BiffRecord::BoundSheet(bs) = parse(0x0085, &sheet, &BIFF8)? else {
            panic!("not BoundSheet");
        };
        assert_eq!(bs.name, "Σx1");
        assert_eq!(bs.sheet_type, SheetType::Worksheet);
        Ok(())
    }

    #[test]
    fn narrow_style_indices() -> Result<(), ExcelError> {
        let biff2 = ParseContext {
            version: BiffVersion::Biff2,
            encoding: encoding_rs::WINDOWS_1252,
        };
        // INTEGER with XF 5 in the 3-byte cell attributes
        let data = [3, 0, 1, 0, 0xc5, 0x12, 0x34, 0x2a, 0x00];
        let BiffRecord::Number { cell, value } = parse(0x0002, &data, &biff2)? else {
            panic!("not a Number");
        };
        assert_eq!((cell.row, cell.col, cell.xf), (3, 1, XfIndex::Narrow(5)));
        assert_eq!(value, 42.0);
        assert_eq!(cell.xf.resolve(Some(99)), 5);
        assert_eq!(XfIndex::Narrow(63).resolve(Some(99)), 99);
        assert_eq!(XfIndex::Narrow(63).resolve(None), 63);
        assert_eq!(XfIndex::Wide(300).resolve(Some(99)), 300);

        let BiffRecord::Xf(xf) = parse(0x0043, &[2, 0, 0xc7, 0], &biff2)? else {
            panic!("not a XF");
        };
        assert_eq!((xf.font, xf.format), (2, 7));
        let BiffRecord::Format(f) = parse(0x001e, &[4, b'0', b'.', b'0', b'0'], &biff2)? else {
            panic!("not a Format");
        };
        assert_eq!((f.id, f.code.as_str()), (None, "0.00"));

        // The same ids mean nothing from BIFF3 on
        assert!(matches!(parse(0x0002, &data, &BIFF8)?, BiffRecord::Other(2)));
        Ok(())
    }

    #[test]
    fn bof_versions() -> Result<(), ExcelError> {
        let bof = |code: u16, vers: u16, dt: u16| {
            let mut data = vers.to_le_bytes().to_vec();
            data.extend_from_slice(&dt.to_le_bytes());
            match parse(code, &data, &BIFF8) {
                Ok(BiffRecord::Bof(bof)) => Ok((bof.version, bof.dt)),
                Ok(other) => panic!("not a BOF: {other:?}"),
                Err(e) => Err(e),
            }
        };
        assert_eq!(bof(0x0009, 2, 0x10)?, (Some(BiffVersion::Biff2), BofType::Worksheet));
        assert_eq!(bof(0x0209, 0, 0x10)?, (Some(BiffVersion::Biff3), BofType::Worksheet));
        assert_eq!(bof(0x0409, 0, 0x100)?, (Some(BiffVersion::Biff4), BofType::Workspace));
        assert_eq!(bof(0x0809, 0x0500, 5)?, (Some(BiffVersion::Biff5), BofType::Workbook));
        assert_eq!(bof(0x0809, 0x0600, 0x20)?, (Some(BiffVersion::Biff8), BofType::Chart));
        assert_eq!(bof(0x0809, 0x0400, 5)?, (None, BofType::Workbook));
        Ok(())
    }

    #[test]
    fn truncated_record() {
        assert!(matches!(
            parse(0x0203, &[0, 0, 0, 0], &BIFF8),
            Err(ExcelError::Format(m)) if m.contains("Number")
        ));
    }
}
