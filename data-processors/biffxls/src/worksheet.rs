//! *Worksheet* associated structures
use crate::{
    records::{Anomalies, Fragments, RecordStream, RecordType},
    structures::{
        BiffRecord, BiffVersion, BofType, BoolErrValue, Cell, CellError, DimensionsRecord,
        FormulaValue, IndexRecord, ParseContext, XfIndex,
    },
    workbook::{SheetInfo, Workbook},
    ExcelError,
};
use std::{cell::OnceCell, collections::BTreeMap, fmt};
use time::{Date, Duration, Month, PrimitiveDateTime, Time};
use tracing::{debug, warn};

/// Maximum number of rows in a BIFF8 sheet
const MAX_ROWS: u32 = 65536;
/// Maximum number of columns in a BIFF8 sheet
const MAX_COLUMNS: u16 = 256;

/// A spreadsheet date or time, as an Excel serial number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcelDateTime {
    /// Days since the epoch, with the time of day as fraction
    pub serial: f64,
    /// Whether the 1904 date system applies
    pub date1904: bool,
}

impl ExcelDateTime {
    /// Converts the serial into a calendar date and time, rounded to the millisecond
    ///
    /// In the 1900 system serial 60 is the nonexistent 1900-02-29 and maps to [None]
    pub fn to_datetime(&self) -> Option<PrimitiveDateTime> {
        if !self.serial.is_finite() || self.serial < 0.0 {
            return None;
        }
        let epoch = if self.date1904 {
            Date::from_calendar_date(1904, Month::January, 1).ok()?
        } else if self.serial >= 61.0 {
            Date::from_calendar_date(1899, Month::December, 30).ok()?
        } else if self.serial < 60.0 {
            Date::from_calendar_date(1899, Month::December, 31).ok()?
        } else {
            return None;
        };
        let ms = (self.serial * 86_400_000.0).round();
        if ms > i64::MAX as f64 {
            return None;
        }
        PrimitiveDateTime::new(epoch, Time::MIDNIGHT).checked_add(Duration::milliseconds(ms as i64))
    }
}

/// The value of a cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// No value
    #[default]
    Empty,
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// Number displayed as date or time
    DateTime(ExcelDateTime),
    /// Text
    String(String),
    /// Error
    Error(CellError),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(true) => write!(f, "TRUE"),
            Self::Bool(false) => write!(f, "FALSE"),
            Self::Number(n) => write!(f, "{n}"),
            Self::DateTime(dt) => match dt.to_datetime() {
                Some(v) => write!(f, "{v}"),
                None => write!(f, "{}", dt.serial),
            },
            Self::String(s) => write!(f, "{s}"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// A row of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Zero-based row index
    pub index: u32,
    /// One value per column
    pub cells: Vec<CellValue>,
}

/// Sheet extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Number of rows
    pub rows: u32,
    /// Number of columns
    pub columns: u16,
}

/// Row blocks as `(first record, DBCell)` offsets
type Blocks = Vec<(u64, u64)>;

#[derive(Debug)]
struct Layout {
    dimensions: Dimensions,
    blocks: Option<Blocks>,
    dialog: bool,
    anomalies: Anomalies,
}

/// *Worksheet*
pub struct Worksheet<'a> {
    workbook: &'a Workbook,
    /// *Worksheet* locator
    pub info: &'a SheetInfo,
    layout: OnceCell<Layout>,
}

impl fmt::Debug for Worksheet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worksheet")
            .field("info", &self.info)
            .field("layout", &self.layout.get())
            .finish()
    }
}

impl<'a> Worksheet<'a> {
    pub(crate) fn new(workbook: &'a Workbook, info: &'a SheetInfo) -> Result<Self, ExcelError> {
        if info.offset >= workbook.data.len() as u64 {
            return Err(ExcelError::Format(format!(
                "Sheet {:?} starts at 0x{:x}, past the end of the workbook stream ({} bytes)",
                info.name,
                info.offset,
                workbook.data.len()
            )));
        }
        let mut stream = RecordStream::new(&workbook.data, workbook.policy);
        let record = stream.read_at(info.offset)?;
        let dt = match record {
            Some(record) if record.ty.is_bof() => {
                let mut fragments = Fragments::single(record.data);
                match BiffRecord::parse(&record, &mut fragments, &ctx(workbook))? {
                    BiffRecord::Bof(bof) => Some(bof.dt),
                    _ => None,
                }
            }
            _ => None,
        };
        match dt {
            Some(BofType::Worksheet) => Ok(Self {
                workbook,
                info,
                layout: OnceCell::new(),
            }),
            Some(dt) => Err(ExcelError::Format(format!(
                "Sheet {:?} has BOF type {dt:?}",
                info.name
            ))),
            None => Err(ExcelError::Format(format!(
                "No BOF at 0x{:x} for sheet {:?}",
                info.offset, info.name
            ))),
        }
    }

    /// Sheet name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The number of rows and columns
    ///
    /// The *Dimensions* record is used when it encloses every cell, otherwise the observed
    /// extent applies
    pub fn dimensions(&self) -> Result<Dimensions, ExcelError> {
        Ok(self.layout()?.dimensions)
    }

    /// Returns true if the substream is a dialog sheet
    pub fn is_dialog(&self) -> Result<bool, ExcelError> {
        Ok(self.layout()?.dialog)
    }

    /// Returns true if the rows are located through the *Index* record
    pub fn is_indexed(&self) -> Result<bool, ExcelError> {
        Ok(self.layout()?.blocks.is_some())
    }

    /// Problems encountered while analyzing the sheet layout
    pub fn anomalies(&self) -> Result<&[String], ExcelError> {
        Ok(&self.layout()?.anomalies)
    }

    /// Returns a lazy iterator over the rows of the sheet
    ///
    /// Each call restarts from the beginning of the sheet
    pub fn rows(&self) -> Result<Rows<'_>, ExcelError> {
        let layout = self.layout()?;
        let mut stream = RecordStream::new(&self.workbook.data, self.workbook.policy);
        // Past the BOF
        stream.seek(self.info.offset)?;
        stream.read()?;
        Ok(Rows {
            workbook: self.workbook,
            ctx: ctx(self.workbook),
            stream,
            blocks: layout.blocks.as_deref(),
            next_block: 0,
            exhausted: false,
            pending: BTreeMap::new(),
            next_row: 0,
            dimensions: layout.dimensions,
            ixfe: None,
            anomalies: Anomalies::new(),
        })
    }

    fn layout(&self) -> Result<&Layout, ExcelError> {
        if let Some(layout) = self.layout.get() {
            return Ok(layout);
        }
        let layout = self.scan_layout()?;
        Ok(self.layout.get_or_init(|| layout))
    }

    fn scan_layout(&self) -> Result<Layout, ExcelError> {
        let ctx = ctx(self.workbook);
        let mut stream = RecordStream::new(&self.workbook.data, self.workbook.policy);
        stream.seek(self.info.offset)?;
        stream.read()?;
        let mut anomalies = Anomalies::new();
        let mut dimensions: Option<DimensionsRecord> = None;
        let mut index: Option<IndexRecord> = None;
        let mut dialog = false;
        let mut rows = 0u32;
        let mut columns = 0u16;
        let mut cells = 0usize;
        let mut observe = |row: u16, last_col: u16| {
            rows = rows.max(u32::from(row) + 1);
            columns = columns.max(last_col.saturating_add(1));
            cells += 1;
        };
        while let Some((record, mut fragments)) = stream.read_logical()? {
            match record.ty {
                RecordType::EOF => break,
                ty if ty.is_bof() => {
                    stream.skip_substream()?;
                    continue;
                }
                ty if !ty.is_cell()
                    && !ty.is_dimensions()
                    && !matches!(ty, RecordType::Index | RecordType::WsBool) =>
                {
                    continue
                }
                _ => {}
            }
            let parsed = match BiffRecord::parse(&record, &mut fragments, &ctx) {
                Ok(parsed) => parsed,
                Err(e) => {
                    anomalies.push(e.to_string());
                    continue;
                }
            };
            match parsed {
                BiffRecord::Dimensions(d) => {
                    dimensions.get_or_insert(d);
                }
                // Before BIFF5 there are no DBCell records to anchor the row blocks
                BiffRecord::Index(i) if ctx.version >= BiffVersion::Biff5 => {
                    index.get_or_insert(i);
                }
                BiffRecord::WsBool { dialog: true } => dialog = true,
                BiffRecord::Number { cell, .. }
                | BiffRecord::Rk { cell, .. }
                | BiffRecord::BoolErr { cell, .. }
                | BiffRecord::LabelSst { cell, .. }
                | BiffRecord::Label { cell, .. }
                | BiffRecord::Blank(cell)
                | BiffRecord::Formula { cell, .. } => observe(cell.row, cell.col),
                BiffRecord::MulRk(m) => observe(m.row, m.last_col()),
                BiffRecord::MulBlank(m) => observe(
                    m.row,
                    m.first_col
                        .saturating_add(m.xfs.len().saturating_sub(1) as u16),
                ),
                _ => {}
            }
        }
        if dialog {
            anomalies.push(format!("Sheet {:?} is a dialog sheet", self.info.name));
        }

        let dimensions = match dimensions {
            Some(d)
                if d.last_row >= rows
                    && d.last_col >= columns
                    && d.last_row <= MAX_ROWS
                    && d.last_col <= MAX_COLUMNS =>
            {
                Dimensions {
                    rows: d.last_row,
                    columns: d.last_col,
                }
            }
            Some(d) => {
                let msg = format!(
                    "Dimensions {}x{} do not enclose the observed {rows}x{columns} cells",
                    d.last_row, d.last_col
                );
                warn!("{msg}");
                anomalies.push(msg);
                Dimensions { rows, columns }
            }
            None => {
                anomalies.push("Missing Dimensions record".to_string());
                Dimensions { rows, columns }
            }
        };

        let blocks = match index {
            Some(index) => match self.validate_index(&index, cells) {
                Ok(blocks) => Some(blocks),
                Err(msg) => {
                    warn!("Index unusable, scanning rows: {msg}");
                    anomalies.push(msg);
                    None
                }
            },
            None => None,
        };
        debug!(
            "Sheet {:?}: {}x{}, {} cells, {}",
            self.info.name,
            dimensions.rows,
            dimensions.columns,
            cells,
            if blocks.is_some() { "indexed" } else { "scanned" }
        );
        Ok(Layout {
            dimensions,
            blocks,
            dialog,
            anomalies,
        })
    }

    fn validate_index(&self, index: &IndexRecord, cells: usize) -> Result<Blocks, String> {
        if index.dbcells.is_empty() && cells > 0 {
            return Err("Index lists no DBCell but the sheet holds cells".to_string());
        }
        let mut stream = RecordStream::new(&self.workbook.data, self.workbook.policy);
        let mut blocks = Blocks::new();
        let mut previous = self.info.offset;
        for &offset in &index.dbcells {
            let offset = u64::from(offset);
            let record = match stream.read_at(offset) {
                Ok(Some(record)) if record.ty == RecordType::DBCell => record,
                _ => return Err(format!("No DBCell at 0x{offset:x}")),
            };
            let mut fragments = Fragments::single(record.data);
            let BiffRecord::DbCell(dbcell) =
                BiffRecord::parse(&record, &mut fragments, &ctx(self.workbook))
                    .map_err(|e| e.to_string())?
            else {
                return Err(format!("No DBCell at 0x{offset:x}"));
            };
            let start = offset
                .checked_sub(dbcell.first_row_offset.into())
                .filter(|&start| start > self.info.offset && start >= previous)
                .ok_or_else(|| {
                    format!(
                        "DBCell at 0x{offset:x} points outside the sheet (dbRtrw {})",
                        dbcell.first_row_offset
                    )
                })?;
            blocks.push((start, offset));
            previous = offset;
        }
        Ok(blocks)
    }
}

fn ctx(workbook: &Workbook) -> ParseContext {
    ParseContext {
        version: workbook.version(),
        encoding: workbook.encoding(),
    }
}

/// Column `offset` cells to the right of `first`
fn column_at(first: u16, offset: usize) -> Option<u16> {
    u16::try_from(offset).ok().and_then(|o| first.checked_add(o))
}

/// Lazy, forward only iterator over the rows of a [`Worksheet`]
///
/// Rows are produced in order from the first row up to the sheet extent, gaps are filled with
/// empty rows
pub struct Rows<'a> {
    workbook: &'a Workbook,
    ctx: ParseContext,
    stream: RecordStream<'a>,
    blocks: Option<&'a [(u64, u64)]>,
    next_block: usize,
    exhausted: bool,
    pending: BTreeMap<u32, Vec<CellValue>>,
    next_row: u32,
    dimensions: Dimensions,
    /// Pending *IXFE* value for the next BIFF2 cell
    ixfe: Option<u16>,
    anomalies: Anomalies,
}

impl Rows<'_> {
    /// Problems encountered while reading the rows so far
    pub fn anomalies(&self) -> &[String] {
        &self.anomalies
    }

    fn empty_row(&self) -> Vec<CellValue> {
        vec![CellValue::Empty; usize::from(self.dimensions.columns)]
    }

    fn anomaly(&mut self, msg: String) {
        debug!("{msg}");
        self.anomalies.push(msg);
    }

    /// Accumulates the next block of cells into `pending`
    fn fill(&mut self) -> Result<(), ExcelError> {
        let end = match self.blocks {
            Some(blocks) => match blocks.get(self.next_block) {
                Some(&(start, end)) => {
                    self.next_block += 1;
                    self.stream.seek(start)?;
                    Some(end)
                }
                None => {
                    self.exhausted = true;
                    return Ok(());
                }
            },
            None => None,
        };
        let mut saw_cells = false;
        loop {
            if end.is_some_and(|end| self.stream.position() >= end) {
                break;
            }
            let position = self.stream.position();
            let Some((record, mut fragments)) = self.stream.read_logical()? else {
                self.exhausted = true;
                break;
            };
            match record.ty {
                RecordType::EOF => {
                    self.exhausted = true;
                    break;
                }
                ty if ty.is_bof() => {
                    self.stream.skip_substream()?;
                    continue;
                }
                RecordType::DBCell if saw_cells => break,
                ty if ty.is_row() && saw_cells && end.is_none() => {
                    self.stream.seek(position)?;
                    break;
                }
                ty if !ty.is_cell() && !ty.is_row() && ty != RecordType::Ixfe => continue,
                _ => {}
            }
            match BiffRecord::parse(&record, &mut fragments, &self.ctx) {
                Ok(parsed) => saw_cells |= self.apply(parsed)?,
                Err(e) => self.anomaly(e.to_string()),
            }
        }
        Ok(())
    }

    /// Stores a decoded record, returns true for cell records
    fn apply(&mut self, record: BiffRecord) -> Result<bool, ExcelError> {
        let ixfe = self.ixfe.take();
        match record {
            BiffRecord::Ixfe(xf) => {
                self.ixfe = Some(xf);
                return Ok(false);
            }
            BiffRecord::Row(row) => {
                let index = u32::from(row.index);
                if index >= self.next_row && index < self.dimensions.rows {
                    let columns = usize::from(self.dimensions.columns);
                    self.pending
                        .entry(index)
                        .or_insert_with(|| vec![CellValue::Empty; columns]);
                }
                return Ok(false);
            }
            BiffRecord::Number { cell, value } | BiffRecord::Rk { cell, value } => {
                let value = self.number(cell.xf.resolve(ixfe), value);
                self.set(cell, value);
            }
            BiffRecord::MulRk(mulrk) => {
                for (i, &(xf, value)) in mulrk.values.iter().enumerate() {
                    let Some(col) = column_at(mulrk.first_col, i) else {
                        self.anomaly(format!("MulRk on row {} runs past the last column", mulrk.row));
                        break;
                    };
                    let value = self.number(xf, value);
                    self.set(
                        Cell {
                            row: mulrk.row,
                            col,
                            xf: XfIndex::Wide(xf),
                        },
                        value,
                    );
                }
            }
            BiffRecord::BoolErr { cell, value } => {
                let value = match value {
                    BoolErrValue::Bool(b) => CellValue::Bool(b),
                    BoolErrValue::Error(e) => CellValue::Error(e),
                };
                self.set(cell, value);
            }
            BiffRecord::LabelSst { cell, index } => {
                let value = match self.workbook.shared_strings().get(index as usize) {
                    Some(s) => CellValue::String(s.clone()),
                    None => {
                        self.anomaly(format!(
                            "Shared string index {index} out of range at {}:{}",
                            cell.row, cell.col
                        ));
                        CellValue::Empty
                    }
                };
                self.set(cell, value);
            }
            BiffRecord::Label { cell, value } => self.set(cell, CellValue::String(value)),
            BiffRecord::Blank(cell) => self.set(cell, CellValue::Empty),
            BiffRecord::MulBlank(mulblank) => {
                for (i, &xf) in mulblank.xfs.iter().enumerate() {
                    let Some(col) = column_at(mulblank.first_col, i) else {
                        self.anomaly(format!(
                            "MulBlank on row {} runs past the last column",
                            mulblank.row
                        ));
                        break;
                    };
                    self.set(
                        Cell {
                            row: mulblank.row,
                            col,
                            xf: XfIndex::Wide(xf),
                        },
                        CellValue::Empty,
                    );
                }
            }
            BiffRecord::Formula { cell, value } => {
                let value = match value {
                    FormulaValue::Number(n) => self.number(cell.xf.resolve(ixfe), n),
                    FormulaValue::Bool(b) => CellValue::Bool(b),
                    FormulaValue::Error(e) => CellValue::Error(e),
                    FormulaValue::Blank => CellValue::String(String::new()),
                    FormulaValue::String => match self.formula_string()? {
                        Some(s) => CellValue::String(s),
                        None => {
                            self.anomaly(format!(
                                "String formula at {}:{} has no String record",
                                cell.row, cell.col
                            ));
                            CellValue::String(String::new())
                        }
                    },
                };
                self.set(cell, value);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Looks for the String record holding the result of the formula just read
    fn formula_string(&mut self) -> Result<Option<String>, ExcelError> {
        loop {
            let position = self.stream.position();
            let Some((record, mut fragments)) = self.stream.read_logical()? else {
                return Ok(None);
            };
            match record.ty {
                ty if ty.is_string() => {
                    return match BiffRecord::parse(&record, &mut fragments, &self.ctx) {
                        Ok(BiffRecord::StringValue(s)) => Ok(Some(s)),
                        Ok(_) => Ok(None),
                        Err(e) => {
                            self.anomaly(e.to_string());
                            Ok(None)
                        }
                    }
                }
                RecordType::Array
                | RecordType::ShrFmla
                | RecordType::Table
                | RecordType::Uncalced => continue,
                _ => {
                    self.stream.seek(position)?;
                    return Ok(None);
                }
            }
        }
    }

    fn number(&self, xf: u16, value: f64) -> CellValue {
        if self.workbook.is_date(xf) {
            CellValue::DateTime(ExcelDateTime {
                serial: value,
                date1904: self.workbook.date1904(),
            })
        } else {
            CellValue::Number(value)
        }
    }

    fn set(&mut self, cell: Cell, value: CellValue) {
        let row = u32::from(cell.row);
        if row < self.next_row {
            self.anomaly(format!(
                "Cell {}:{} arrives after its row, skipped",
                cell.row, cell.col
            ));
            return;
        }
        if row >= self.dimensions.rows || cell.col >= self.dimensions.columns {
            self.anomaly(format!("Cell {}:{} outside the sheet extent", cell.row, cell.col));
            return;
        }
        let columns = usize::from(self.dimensions.columns);
        let cells = self
            .pending
            .entry(row)
            .or_insert_with(|| vec![CellValue::Empty; columns]);
        cells[usize::from(cell.col)] = value;
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, ExcelError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_row < self.dimensions.rows {
            let index = self.next_row;
            if self.pending.is_empty() && !self.exhausted {
                if let Err(e) = self.fill() {
                    warn!("Row decoding aborted: {e}");
                    self.exhausted = true;
                    self.next_row = self.dimensions.rows;
                    return Some(Err(e));
                }
                continue;
            }
            self.next_row += 1;
            let cells = match self.pending.remove(&index) {
                Some(cells) => cells,
                None => self.empty_row(),
            };
            return Some(Ok(Row { index, cells }));
        }
        None
    }
}
