//! *Workbook* globals
use crate::{
    config::DecoderOptions,
    numfmt::{BuiltinNumberFormat, FormatTable, NumberFormat},
    records::{Anomalies, LengthPolicy, RecordStream, RecordType},
    structures::{BiffRecord, BiffVersion, BofType, ParseContext, SheetType, SheetVisibility},
    worksheet::Worksheet,
    ExcelError,
};
use encoding_rs::Encoding;
use std::fmt;
use tracing::{debug, warn};

/// Sheet locator
#[derive(Debug, Clone, PartialEq)]
pub struct SheetInfo {
    /// Name of this Sheet
    pub name: String,
    /// Sheet hidden state
    pub visibility: SheetVisibility,
    /// Sheet type
    pub sheet_type: SheetType,
    /// Position of the sheet in the workbook
    pub index: usize,
    pub(crate) offset: u64,
}

impl SheetInfo {
    /// Offset of the sheet BOF within the workbook stream
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// *Workbook*
///
/// Holds the plain text workbook stream and the globals built by a single linear scan
pub struct Workbook {
    pub(crate) data: Vec<u8>,
    pub(crate) policy: LengthPolicy,
    version: BiffVersion,
    sheets: Vec<SheetInfo>,
    shared_strings: Vec<String>,
    formats: FormatTable,
    xfs: Vec<u16>,
    codepage: Option<u16>,
    encoding: &'static Encoding,
    date1904: bool,
    number_format: Box<dyn NumberFormat>,
    anomalies: Anomalies,
}

impl fmt::Debug for Workbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workbook")
            .field("size", &self.data.len())
            .field("version", &self.version)
            .field("sheets", &self.sheets)
            .field("shared_strings", &self.shared_strings.len())
            .field("formats", &self.formats.len())
            .field("xfs", &self.xfs.len())
            .field("codepage", &self.codepage)
            .field("encoding", &self.encoding.name())
            .field("date1904", &self.date1904)
            .field("anomalies", &self.anomalies)
            .finish()
    }
}

/// Name given to the only sheet of a BIFF2-BIFF4 file
pub const SINGLE_SHEET_NAME: &str = "Sheet1";

/// Maps a *CodePage* record value to an encoding
pub fn encoding_for_codepage(codepage: u16) -> Option<&'static Encoding> {
    match codepage {
        1200 => Some(encoding_rs::UTF_16LE),
        // US-ASCII
        367 => Some(encoding_rs::WINDOWS_1252),
        // Mac Roman
        32768 => codepage::to_encoding(10000),
        // Windows-1252 (BIFF2-BIFF3 era)
        32769 => Some(encoding_rs::WINDOWS_1252),
        cp => codepage::to_encoding(cp),
    }
}

impl Workbook {
    /// Scans the globals substream of the plain text workbook stream `data`
    pub fn new(data: Vec<u8>, options: &DecoderOptions) -> Result<Self, ExcelError> {
        let policy = if options.strict {
            LengthPolicy::Strict
        } else {
            LengthPolicy::Loose
        };
        let fallback = options.fallback_encoding();
        let mut anomalies = Anomalies::new();
        let mut stream = RecordStream::new(&data, policy);

        let mut ctx = ParseContext {
            version: BiffVersion::Biff8,
            encoding: fallback,
        };
        let bof = match stream.read_logical()? {
            Some((record, mut fragments)) if record.ty.is_bof() => {
                match BiffRecord::parse(&record, &mut fragments, &ctx)? {
                    BiffRecord::Bof(bof) => bof,
                    other => return Err(ExcelError::Format(format!("Unexpected {other:?}"))),
                }
            }
            Some((record, _)) => {
                return Err(ExcelError::Format(format!(
                    "Workbook stream starts with {:?} (0x{:04x}) instead of BOF",
                    record.ty, record.code
                )))
            }
            None => return Err(ExcelError::Format("Empty workbook stream".to_string())),
        };
        ctx.version = bof.version.ok_or_else(|| {
            ExcelError::Unsupported(format!("BIFF version 0x{:04x}", bof.vers))
        })?;
        // Up to BIFF4 a file holds a single sheet, the globals are part of its substream
        let single_sheet = match (bof.dt, ctx.version) {
            (BofType::Workbook, BiffVersion::Biff5 | BiffVersion::Biff8) => false,
            (BofType::Worksheet, v) if v <= BiffVersion::Biff4 => true,
            (BofType::Workspace, _) => {
                return Err(ExcelError::Unsupported(format!(
                    "{} workspace with bundled sheets",
                    ctx.version
                )))
            }
            (dt, version) => {
                return Err(ExcelError::Format(format!(
                    "Unexpected {version} BOF type {dt:?}"
                )))
            }
        };
        debug!("{} workbook", ctx.version);

        let mut codepage = None;
        let mut date1904 = false;
        let mut shared_strings = Vec::new();
        let mut formats = FormatTable::new();
        let mut xfs = Vec::new();
        let mut boundsheets = Vec::new();
        let mut complete = false;
        let mut next_format = 0u16;
        while let Some((record, mut fragments)) = stream.read_logical()? {
            if single_sheet && (record.ty.is_cell() || record.ty.is_string()) {
                continue;
            }
            let parsed = match BiffRecord::parse(&record, &mut fragments, &ctx) {
                Ok(parsed) => parsed,
                Err(e) if e.is_data_error() => {
                    warn!("Skipping globals record: {e}");
                    anomalies.push(e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };
            match parsed {
                BiffRecord::Eof => {
                    complete = true;
                    break;
                }
                BiffRecord::Bof(_) if single_sheet => stream.skip_substream()?,
                BiffRecord::Bof(_) => break,
                BiffRecord::FilePass(_) => debug!("Workbook is encrypted"),
                BiffRecord::BoundSheet(bs) => boundsheets.push(bs),
                BiffRecord::CodePage(cp) => {
                    codepage = Some(cp);
                    ctx.encoding = match encoding_for_codepage(cp) {
                        Some(encoding) => encoding,
                        None => {
                            let msg = format!(
                                "Unsupported code page {cp}, falling back to {}",
                                fallback.name()
                            );
                            warn!("{msg}");
                            anomalies.push(msg);
                            fallback
                        }
                    };
                }
                BiffRecord::Date1904(v) => date1904 = v,
                BiffRecord::Format(f) => {
                    let id = f.id.unwrap_or(next_format);
                    next_format = next_format.saturating_add(1);
                    formats.insert(id, f.code);
                }
                BiffRecord::Xf(xf) => xfs.push(xf.format),
                BiffRecord::Sst(sst) => {
                    if sst.strings.len() != sst.unique as usize {
                        let msg = format!(
                            "SST declares {} unique strings but {} were decoded",
                            sst.unique,
                            sst.strings.len()
                        );
                        warn!("{msg}");
                        anomalies.push(msg);
                    }
                    shared_strings = sst.strings;
                }
                _ => {}
            }
        }
        if !complete {
            anomalies.push("Globals substream is not terminated by EOF".to_string());
        }

        let sheets = if single_sheet {
            vec![SheetInfo {
                name: SINGLE_SHEET_NAME.to_string(),
                visibility: SheetVisibility::Visible,
                sheet_type: SheetType::Worksheet,
                index: 0,
                offset: 0,
            }]
        } else {
            boundsheets
                .into_iter()
                .enumerate()
                .map(|(index, bs)| SheetInfo {
                    name: bs.name,
                    visibility: bs.visibility,
                    sheet_type: bs.sheet_type,
                    index,
                    offset: bs.offset.into(),
                })
                .collect::<Vec<_>>()
        };
        debug!(
            "{} sheets, {} shared strings, {} formats, {} XFs",
            sheets.len(),
            shared_strings.len(),
            formats.len(),
            xfs.len()
        );
        Ok(Self {
            data,
            policy,
            version: ctx.version,
            sheets,
            shared_strings,
            formats,
            xfs,
            codepage,
            encoding: ctx.encoding,
            date1904,
            number_format: Box::new(BuiltinNumberFormat),
            anomalies,
        })
    }

    /// All the sheets declared by the workbook, in order
    pub fn sheets(&self) -> &[SheetInfo] {
        &self.sheets
    }

    /// Return an iterator over document Worksheets
    ///
    /// Sheets whose substream cannot be located are skipped
    pub fn worksheets(&self) -> impl Iterator<Item = Worksheet<'_>> {
        self.sheets
            .iter()
            .filter(|info| info.sheet_type == SheetType::Worksheet)
            .filter_map(|info| match Worksheet::new(self, info) {
                Ok(ws) => Some(ws),
                Err(e) => {
                    warn!("Skipping sheet {:?}: {e}", info.name);
                    None
                }
            })
    }

    /// Opens the sheet at `index`
    pub fn worksheet(&self, index: usize) -> Result<Worksheet<'_>, ExcelError> {
        let info = self.sheets.get(index).ok_or_else(|| {
            ExcelError::Format(format!(
                "Sheet index {index} out of range ({} sheets)",
                self.sheets.len()
            ))
        })?;
        Worksheet::new(self, info)
    }

    /// Opens the sheet named `name` (case insensitive)
    pub fn worksheet_by_name(&self, name: &str) -> Result<Worksheet<'_>, ExcelError> {
        let lname = name.to_lowercase();
        let info = self
            .sheets
            .iter()
            .find(|info| info.name.to_lowercase() == lname)
            .ok_or_else(|| ExcelError::Format(format!("Sheet {name:?} not found")))?;
        Worksheet::new(self, info)
    }

    /// The shared string table
    pub fn shared_strings(&self) -> &[String] {
        &self.shared_strings
    }

    /// The number formats declared by the workbook
    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    /// The *CodePage* record value, if any
    pub fn codepage(&self) -> Option<u16> {
        self.codepage
    }

    /// The encoding in use for byte strings
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Whether dates use the 1904 system
    pub fn date1904(&self) -> bool {
        self.date1904
    }

    /// The record layout version
    pub fn version(&self) -> BiffVersion {
        self.version
    }

    /// Problems encountered while parsing
    pub fn anomalies(&self) -> &[String] {
        &self.anomalies
    }

    /// Replaces the number format collaborator
    pub fn set_number_format<N: NumberFormat + 'static>(&mut self, number_format: N) {
        self.number_format = Box::new(number_format);
    }

    /// Returns true if the style `xf` formats numbers as dates or times
    pub fn is_date(&self, xf: u16) -> bool {
        self.xfs
            .get(usize::from(xf))
            .is_some_and(|&format| self.number_format.is_date_time(format, &self.formats))
    }
}
