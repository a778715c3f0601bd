//! BIFF8 workbook stream builders for tests
#![allow(dead_code)]

#[path = "../../../../libs/cfbole/tests/common/mod.rs"]
pub mod cfb;

use cfbole::crypto::{BlockContext, XorKey};

pub const BOF: u16 = 0x0809;
pub const EOF: u16 = 0x000a;

/// A physical record
pub fn rec(code: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(data.len() + 4);
    v.extend_from_slice(&code.to_le_bytes());
    v.extend_from_slice(&(data.len() as u16).to_le_bytes());
    v.extend_from_slice(data);
    v
}

pub fn bof(dt: u16) -> Vec<u8> {
    let mut data = 0x0600u16.to_le_bytes().to_vec();
    data.extend_from_slice(&dt.to_le_bytes());
    data.extend_from_slice(&0x0dbbu16.to_le_bytes());
    data.extend_from_slice(&0x07ccu16.to_le_bytes());
    data.resize(16, 0);
    rec(BOF, &data)
}

pub fn eof() -> Vec<u8> {
    rec(EOF, &[])
}

pub fn codepage(cp: u16) -> Vec<u8> {
    rec(0x0042, &cp.to_le_bytes())
}

pub fn date1904() -> Vec<u8> {
    rec(0x0022, &1u16.to_le_bytes())
}

/// Cell XF pointing at number format `format`
pub fn xf(format: u16) -> Vec<u8> {
    let mut data = 0u16.to_le_bytes().to_vec();
    data.extend_from_slice(&format.to_le_bytes());
    data.resize(20, 0);
    rec(0x00e0, &data)
}

pub fn format(id: u16, code: &str) -> Vec<u8> {
    let mut data = id.to_le_bytes().to_vec();
    data.extend_from_slice(&(code.len() as u16).to_le_bytes());
    data.push(0);
    data.extend_from_slice(code.as_bytes());
    rec(0x041e, &data)
}

/// Shared string table of compressed strings
pub fn sst(strings: &[&str]) -> Vec<u8> {
    let mut data = (strings.len() as u32).to_le_bytes().to_vec();
    data.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in strings {
        data.extend_from_slice(&(s.len() as u16).to_le_bytes());
        data.push(0);
        data.extend_from_slice(s.as_bytes());
    }
    rec(0x00fc, &data)
}

/// XOR FilePass for `password`
pub fn filepass_xor(password: &str) -> Vec<u8> {
    let xo = cfbole::crypto::XorObfuscation::for_password(password).expect("empty password");
    let mut data = 0u16.to_le_bytes().to_vec();
    data.extend_from_slice(&xo.key.to_le_bytes());
    data.extend_from_slice(&xo.verifier.to_le_bytes());
    rec(0x002f, &data)
}

fn cell(row: u16, col: u16, xf: u16) -> Vec<u8> {
    let mut data = row.to_le_bytes().to_vec();
    data.extend_from_slice(&col.to_le_bytes());
    data.extend_from_slice(&xf.to_le_bytes());
    data
}

pub fn number(row: u16, col: u16, xf: u16, value: f64) -> Vec<u8> {
    let mut data = cell(row, col, xf);
    data.extend_from_slice(&value.to_le_bytes());
    rec(0x0203, &data)
}

/// RK integer
pub fn rk_int(value: i32) -> u32 {
    ((value << 2) | 2) as u32
}

pub fn rk(row: u16, col: u16, xf: u16, value: i32) -> Vec<u8> {
    let mut data = cell(row, col, xf);
    data.extend_from_slice(&rk_int(value).to_le_bytes());
    rec(0x027e, &data)
}

pub fn mulrk(row: u16, first_col: u16, values: &[i32]) -> Vec<u8> {
    let mut data = row.to_le_bytes().to_vec();
    data.extend_from_slice(&first_col.to_le_bytes());
    for v in values {
        data.extend_from_slice(&15u16.to_le_bytes());
        data.extend_from_slice(&rk_int(*v).to_le_bytes());
    }
    data.extend_from_slice(&(first_col + (values.len() as u16 - 1)).to_le_bytes());
    rec(0x00bd, &data)
}

pub fn mulblank(row: u16, first_col: u16, count: u16) -> Vec<u8> {
    let mut data = row.to_le_bytes().to_vec();
    data.extend_from_slice(&first_col.to_le_bytes());
    for _ in 0..count {
        data.extend_from_slice(&15u16.to_le_bytes());
    }
    data.extend_from_slice(&(first_col + (count - 1)).to_le_bytes());
    rec(0x00be, &data)
}

pub fn label_sst(row: u16, col: u16, index: u32) -> Vec<u8> {
    let mut data = cell(row, col, 15);
    data.extend_from_slice(&index.to_le_bytes());
    rec(0x00fd, &data)
}

pub fn boolerr(row: u16, col: u16, value: u8, is_error: bool) -> Vec<u8> {
    let mut data = cell(row, col, 15);
    data.push(value);
    data.push(u8::from(is_error));
    rec(0x0205, &data)
}

/// Formula with the cached result `result` and a dummy parsed expression
pub fn formula(row: u16, col: u16, xf: u16, result: [u8; 8]) -> Vec<u8> {
    let mut data = cell(row, col, xf);
    data.extend_from_slice(&result);
    data.extend_from_slice(&0u16.to_le_bytes()); // grbit
    data.extend_from_slice(&0u32.to_le_bytes()); // chn
    data.extend_from_slice(&3u16.to_le_bytes()); // cce
    data.extend_from_slice(&[0x1e, 0x01, 0x00]); // PtgInt 1
    rec(0x0006, &data)
}

/// Cached result marking a string formula
pub const FORMULA_STRING: [u8; 8] = [0, 0, 0, 0, 0, 0, 0xff, 0xff];

pub fn string(value: &str) -> Vec<u8> {
    let mut data = (value.len() as u16).to_le_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(value.as_bytes());
    rec(0x0207, &data)
}

pub fn row(index: u16, first_col: u16, last_col: u16) -> Vec<u8> {
    let mut data = index.to_le_bytes().to_vec();
    data.extend_from_slice(&first_col.to_le_bytes());
    data.extend_from_slice(&last_col.to_le_bytes());
    data.resize(16, 0);
    rec(0x0208, &data)
}

pub fn dimensions(rows: u32, cols: u16) -> Vec<u8> {
    let mut data = 0u32.to_le_bytes().to_vec();
    data.extend_from_slice(&rows.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&cols.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    rec(0x0200, &data)
}

/// How rows are laid out in a sheet substream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetLayout {
    /// Index, then blocks of ROW records, cells and DBCell
    Indexed,
    /// Blocks of ROW records and cells without Index
    Rows,
    /// Bare cell records
    Cells,
}

/// A sheet: the cell records of each row, plus the declared dimensions
#[derive(Debug, Clone)]
pub struct SheetDef {
    pub name: String,
    pub rows: Vec<(u16, Vec<Vec<u8>>)>,
    pub dimensions: Option<(u32, u16)>,
    pub layout: SheetLayout,
}

/// Builds a worksheet substream which starts at `offset` in the workbook stream
pub fn sheet(def: &SheetDef, offset: u64) -> Vec<u8> {
    let mut out = bof(0x0010);
    let nblocks = def.rows.len().div_ceil(32);
    let index_pos = out.len();
    if def.layout == SheetLayout::Indexed {
        out.extend(rec(0x020b, &vec![0u8; 16 + 4 * nblocks]));
    }
    if let Some((rows, cols)) = def.dimensions {
        out.extend(dimensions(rows, cols));
    }
    out.extend(rec(0x0081, &0x04c1u16.to_le_bytes()));
    let mut dbcells: Vec<u32> = Vec::new();
    for block in def.rows.chunks(32) {
        let first_row = out.len();
        if def.layout != SheetLayout::Cells {
            for (index, _) in block {
                out.extend(row(*index, 0, 0));
            }
        }
        for (_, cells) in block {
            for cell in cells {
                out.extend_from_slice(cell);
            }
        }
        if def.layout != SheetLayout::Cells {
            let here = out.len();
            dbcells.push((offset as usize + here) as u32);
            out.extend(rec(0x00d7, &((here - first_row) as u32).to_le_bytes()));
        }
    }
    out.extend(eof());
    if def.layout == SheetLayout::Indexed {
        let last_row = def.rows.last().map_or(0, |(r, _)| u32::from(*r) + 1);
        let data = index_pos + 4;
        out[data + 8..data + 12].copy_from_slice(&last_row.to_le_bytes());
        for (i, dbcell) in dbcells.iter().enumerate() {
            let at = data + 16 + 4 * i;
            out[at..at + 4].copy_from_slice(&dbcell.to_le_bytes());
        }
    }
    out
}

/// Assembles a workbook stream: globals (with `globals` after the BOF), then the sheets
///
/// BoundSheet8 records are generated with the right offsets
pub fn workbook(globals: &[Vec<u8>], sheets: &[SheetDef]) -> Vec<u8> {
    let mut out = bof(0x0005);
    for r in globals {
        out.extend_from_slice(r);
    }
    let mut boundsheets = Vec::new();
    for def in sheets {
        boundsheets.push(out.len() + 4);
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0, 0, def.name.len() as u8, 0]);
        data.extend_from_slice(def.name.as_bytes());
        out.extend(rec(0x0085, &data));
    }
    out.extend(eof());
    for (def, at) in sheets.iter().zip(boundsheets) {
        let offset = out.len() as u32;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        let body = sheet(def, offset.into());
        out.extend(body);
    }
    out
}

/// A 10x10 sheet valued 1..100 (row major)
pub fn grid(name: &str, layout: SheetLayout) -> SheetDef {
    let rows = (0..10u16)
        .map(|r| {
            let base = i32::from(r) * 10;
            let mut cells = vec![mulrk(r, 0, &[base + 1, base + 2, base + 3, base + 4])];
            cells.push(rk(r, 4, 15, base + 5));
            for c in 5..10u16 {
                cells.push(number(r, c, 15, f64::from(base + i32::from(c) + 1)));
            }
            (r, cells)
        })
        .collect();
    SheetDef {
        name: name.to_string(),
        rows,
        dimensions: Some((10, 10)),
        layout,
    }
}

/// Default cell XFs (all General) followed by `extra` XFs from index 16 on
pub fn default_xfs(extra: &[u16]) -> Vec<Vec<u8>> {
    let mut v: Vec<Vec<u8>> = (0..16).map(|_| xf(0)).collect();
    v.extend(extra.iter().map(|f| xf(*f)));
    v
}

/// Wraps a workbook stream into a compound file
pub fn xls(stream: &[u8]) -> Vec<u8> {
    cfb::build(&[("Workbook", stream)]).bytes
}

/// Applies XOR obfuscation to a plain workbook stream
pub fn xor_obfuscate(stream: &mut [u8], key: &XorKey) {
    for_each_encrypted(stream, |buf, ctx| key.obfuscate(buf, ctx));
}

/// Calls `f` on every byte range that is encrypted in a protected workbook
pub fn for_each_encrypted<F: FnMut(&mut [u8], BlockContext)>(stream: &mut [u8], mut f: F) {
    const PLAIN: [u16; 7] = [0x0809, 0x002f, 0x0194, 0x0195, 0x00e1, 0x0196, 0x0138];
    let mut pos = 0usize;
    while pos + 4 <= stream.len() {
        let code = u16::from_le_bytes([stream[pos], stream[pos + 1]]);
        let size = usize::from(u16::from_le_bytes([stream[pos + 2], stream[pos + 3]]));
        let mut start = pos + 4;
        let end = start + size;
        if code == 0x0085 {
            start += 4;
        }
        if !PLAIN.contains(&code) && start < end {
            f(
                &mut stream[start..end],
                BlockContext {
                    stream_position: start as u64,
                    record_size: size,
                },
            );
        }
        pos = end;
    }
}

/// BIFF2-BIFF4 BOF: `code` is 0x0009, 0x0209 or 0x0409
pub fn bof_old(code: u16, dt: u16) -> Vec<u8> {
    let mut data = 0u16.to_le_bytes().to_vec();
    data.extend_from_slice(&dt.to_le_bytes());
    rec(code, &data)
}

/// BIFF2 cell header with the XF index in the 3-byte attributes
pub fn cell2(row: u16, col: u16, xf: u8) -> Vec<u8> {
    let mut data = row.to_le_bytes().to_vec();
    data.extend_from_slice(&col.to_le_bytes());
    data.extend_from_slice(&[xf & 0x3f, 0, 0]);
    data
}

/// BIFF2 number format, numbered by position
pub fn format2(code: &str) -> Vec<u8> {
    let mut data = vec![code.len() as u8];
    data.extend_from_slice(code.as_bytes());
    rec(0x001e, &data)
}

/// BIFF2 XF pointing at number format `format`
pub fn xf2(format: u8) -> Vec<u8> {
    rec(0x0043, &[0, 0, format & 0x3f, 0])
}

/// 16-bit row DIMENSIONS as used before BIFF8, `code` is 0x0000 in BIFF2
pub fn dimensions_old(code: u16, rows: u16, cols: u16) -> Vec<u8> {
    let mut data = 0u16.to_le_bytes().to_vec();
    data.extend_from_slice(&rows.to_le_bytes());
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&cols.to_le_bytes());
    rec(code, &data)
}
