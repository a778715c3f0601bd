//! *BIFF record* framing
//!
//! Please refer to \[MS-XLS\] for documentation

pub mod continued;
pub mod stream;
use num_enum::FromPrimitive;

pub use continued::Fragments;
pub use stream::{LengthPolicy, Record, RecordStream};

/// Stores list of detected problems during parsing
pub type Anomalies = Vec<String>;

/// Type of BIFF record
///
/// Only the records the decoder acts upon are named, everything else maps to
/// [`RecordType::Unsupported`]
#[allow(clippy::upper_case_acronyms, missing_docs)]
#[repr(u16)]
#[derive(Debug, FromPrimitive, PartialEq, Eq, Clone, Copy)]
pub enum RecordType {
    Dimensions2 = 0x0000,
    Blank2 = 0x0001,
    Integer2 = 0x0002,
    Number2 = 0x0003,
    Label2 = 0x0004,
    BoolErr2 = 0x0005,
    Formula = 0x0006,
    String2 = 0x0007,
    Row2 = 0x0008,
    Bof2 = 0x0009,
    EOF = 0x000A,
    Format2 = 0x001E,
    Date1904 = 0x0022,
    FilePass = 0x002F,
    Continue = 0x003C,
    CodePage = 0x0042,
    XF2 = 0x0043,
    Ixfe = 0x0044,
    Uncalced = 0x005E,
    WsBool = 0x0081,
    BoundSheet8 = 0x0085,
    MulRk = 0x00BD,
    MulBlank = 0x00BE,
    RString = 0x00D6,
    DBCell = 0x00D7,
    XF = 0x00E0,
    InterfaceHdr = 0x00E1,
    SST = 0x00FC,
    LabelSst = 0x00FD,
    ExtSST = 0x00FF,
    RRDHead = 0x0138,
    UsrExcl = 0x0194,
    FileLock = 0x0195,
    RRDInfo = 0x0196,
    Dimensions = 0x0200,
    Blank = 0x0201,
    Number = 0x0203,
    Label = 0x0204,
    BoolErr = 0x0205,
    String = 0x0207,
    Formula3 = 0x0206,
    Row = 0x0208,
    Bof3 = 0x0209,
    Index = 0x020B,
    Array = 0x0221,
    Table = 0x0236,
    XF3 = 0x0243,
    RK = 0x027E,
    Formula4 = 0x0406,
    Bof4 = 0x0409,
    Format = 0x041E,
    XF4 = 0x0443,
    ShrFmla = 0x04BC,
    BOF = 0x0809,
    #[num_enum(default)]
    Unsupported,
}

impl RecordType {
    /// Maps a raw record id
    pub fn new(code: u16) -> Self {
        Self::from_primitive(code)
    }

    /// Beginning of a substream, in any BIFF version
    pub fn is_bof(self) -> bool {
        matches!(self, Self::BOF | Self::Bof2 | Self::Bof3 | Self::Bof4)
    }

    /// Row properties, in any BIFF version
    pub fn is_row(self) -> bool {
        matches!(self, Self::Row | Self::Row2)
    }

    /// Used range of a sheet, in any BIFF version
    pub fn is_dimensions(self) -> bool {
        matches!(self, Self::Dimensions | Self::Dimensions2)
    }

    /// Result of a string formula, in any BIFF version
    pub fn is_string(self) -> bool {
        matches!(self, Self::String | Self::String2)
    }

    /// Record ids reused or dropped after BIFF2
    pub fn is_biff2_only(self) -> bool {
        matches!(
            self,
            Self::Dimensions2
                | Self::Blank2
                | Self::Integer2
                | Self::Number2
                | Self::Label2
                | Self::BoolErr2
                | Self::String2
                | Self::Row2
                | Self::XF2
                | Self::Ixfe
        )
    }

    /// Records whose payload is never encrypted
    pub fn is_never_encrypted(self) -> bool {
        matches!(
            self,
            Self::BOF
                | Self::Bof2
                | Self::Bof3
                | Self::Bof4
                | Self::FilePass
                | Self::UsrExcl
                | Self::FileLock
                | Self::InterfaceHdr
                | Self::RRDInfo
                | Self::RRDHead
        )
    }

    /// Records carrying cell contents
    pub fn is_cell(self) -> bool {
        matches!(
            self,
            Self::Formula
                | Self::Formula3
                | Self::Formula4
                | Self::Blank2
                | Self::Integer2
                | Self::Number2
                | Self::Label2
                | Self::BoolErr2
                | Self::MulRk
                | Self::MulBlank
                | Self::RString
                | Self::LabelSst
                | Self::Blank
                | Self::Number
                | Self::Label
                | Self::BoolErr
                | Self::RK
        )
    }
}
