//! # A library to read Ole files
//!
//! Provides read access to objects stored in the *Compound File Binary Format*
//! ([\[MS-CFB\]](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/53989ce4-7b05-4f8d-829b-d08d6148375b))
//! together with the Office cipher suite found in the [crypto] module
//!
//! Minor divergences from the format are tolerated and collected as anomalies, while header
//! corruption and broken sector chains are reported as typed [`OleError`]s
//!
//! See [Ole] for the main interface documentation and code examples
//!

#![warn(missing_docs)]

pub mod crypto;
mod error;
pub use error::OleError;

use byteutils::cmp::count_matches;
use byteutils::io::*;
use byteutils::win32::{filetime_to_datetime, Guid};
use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{self, Read, Seek};
use time::OffsetDateTime;
use tracing::{debug, warn};

const DIFSECT: u32 = 0xfffffffc;
const FATSECT: u32 = 0xfffffffd;
const ENDOFCHAIN: u32 = 0xfffffffe;
const FREESECT: u32 = 0xffffffff;
const MAXREGSID: u32 = 0xfffffffa;
const NOSTREAM: u32 = 0xffffffff;
const SIGNATURE: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
const MINI_SECTOR_SIZE: usize = 64;
const DIR_ENTRY_SIZE: usize = 128;

/// The parser and stream reader for Ole objects
///
/// The whole directory is read once when the object is created and is immutable afterwards;
/// stream data is fetched on demand through [`read_stream`](Self::read_stream)
///
/// # Examples
/// ```no_run
/// use cfbole::Ole;
/// use std::fs::File;
/// use std::io::BufReader;
///
/// let f = File::open("MyWorkbook.xls").unwrap();
/// let ole = Ole::new(BufReader::new(f)).unwrap();
/// let entry = ole.find_stream("Workbook").unwrap();
/// let data = ole.read_stream(entry).unwrap();
/// assert_eq!(data.len() as u64, entry.size);
/// ```
pub struct Ole<R: Read + Seek> {
    f: RefCell<R>,
    major_version: u16,
    minor_version: u16,
    anomalies: Vec<String>,
    sector_size: u32,
    mini_cutoff: u64,
    fat: Vec<u32>,
    minifat: Vec<u32>,
    entries: Vec<OleEntry>,
    ministream: Result<Vec<u8>, String>,
}

/// The representation of a *Compound File Directory Entry*
///
/// In principle this can be one of: "Root Entry" (root directory), "Storage Object" (directory)
/// or a "Stream Object" (file)
///
/// Entries which cannot be decoded are reported as unallocated and carry the reason
/// in [`anomalies`](Self::anomalies)
#[derive(Debug, Clone)]
pub struct OleEntry {
    /// The `id` of the entry
    pub id: u32,
    /// The object type of the entry
    ///
    /// For the unallocated type (0) all the remaining fields are meaningless - see
    /// [`is_allocated`](Self::is_allocated)
    pub objtype: u8,
    /// The `name` of the entry
    pub name: String,
    /// The red/black tree value of the entry
    pub color: u8,
    left: u32,
    right: u32,
    child: u32,
    /// The entry CLSID
    pub clsid: Guid,
    /// The state of the entry (typically for storage objects)
    pub state: u32,
    /// The creation time of the entry
    pub ctime: Option<OffsetDateTime>,
    /// The last modification time of the entry
    pub mtime: Option<OffsetDateTime>,
    start_sector: u32,
    /// The size (in bytes) of the entry
    pub size: u64,
    /// A list of non fatal incongruences found in the entry
    pub anomalies: Vec<String>,
}

impl Default for OleEntry {
    fn default() -> Self {
        OleEntry {
            id: 0,
            name: String::new(),
            objtype: 0,
            color: 0,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: Guid::default(),
            state: 0,
            ctime: None,
            mtime: None,
            start_sector: ENDOFCHAIN,
            size: 0,
            anomalies: Vec::new(),
        }
    }
}

impl OleEntry {
    /// Returns [true] if the entry is allocated, [false] otherwise
    pub fn is_allocated(&self) -> bool {
        self.objtype > 0
    }

    /// Returns [true] if the entry is a Storage Object or [false] if it's a Stream Object
    pub fn is_storage(&self) -> bool {
        self.objtype == 1 || self.objtype == 5
    }

    /// Returns [true] if the entry is a Stream Object
    pub fn is_stream(&self) -> bool {
        self.objtype == 2
    }

    fn left(&self) -> Option<u32> {
        (self.is_allocated() && self.left <= MAXREGSID).then_some(self.left)
    }

    fn right(&self) -> Option<u32> {
        (self.is_allocated() && self.right <= MAXREGSID).then_some(self.right)
    }

    fn child(&self) -> Option<u32> {
        (self.is_storage() && self.child <= MAXREGSID).then_some(self.child)
    }

    fn parse(id: u32, buf: &[u8], major_version: u16) -> Result<Self, String> {
        let mut ret = OleEntry {
            id,
            objtype: buf[66],
            ..Default::default()
        };
        if ret.objtype == 5 && ret.id != 0 {
            ret.anomalies
                .push("Non Root Entry with a root type".to_string());
        }
        if ![0, 1, 2, 5].contains(&ret.objtype) {
            return Err(format!("Invalid object type {}", ret.objtype));
        }
        if ret.objtype == 0 {
            // Unallocated: the entry is garbage
            return Ok(ret);
        }

        let namelen = usize::from(u16_at(buf, 64).unwrap_or(0));
        if namelen == 0 || namelen > 64 || namelen & 1 != 0 {
            return Err(format!("name length {namelen} is invalid"));
        }
        let mut namebuf: Vec<u16> = buf[0..namelen]
            .chunks_exact(2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .collect();
        if namebuf.pop() != Some(0) {
            return Err("name is not null terminated".to_string());
        }
        ret.name = String::from_utf16(&namebuf).map_err(|_| "name is not valid UTF-16")?;
        const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '!'];
        if ret.name.contains(ILLEGAL_CHARS) {
            return Err(format!("name \"{}\" contains invalid characters", ret.name));
        }
        ret.color = buf[67];
        if ret.color > 1 {
            ret.anomalies
                .push(format!("Invalid entry color {}", ret.color));
        }

        let mut r = &buf[68..];
        let field_err = |e: io::Error| e.to_string();
        ret.left = rdu32le(&mut r).map_err(field_err)?;
        ret.right = rdu32le(&mut r).map_err(field_err)?;
        ret.child = rdu32le(&mut r).map_err(field_err)?;
        if !ret.is_storage() && ret.child != NOSTREAM {
            ret.anomalies.push("Stream entry with a child".to_string());
        }
        ret.clsid = Guid::from_le_bytes(&rdarray(&mut r).map_err(field_err)?);
        ret.state = rdu32le(&mut r).map_err(field_err)?;
        ret.ctime = filetime_to_datetime(rdu64le(&mut r).map_err(field_err)?);
        ret.mtime = filetime_to_datetime(rdu64le(&mut r).map_err(field_err)?);
        ret.start_sector = rdu32le(&mut r).map_err(field_err)?;
        ret.size = rdu64le(&mut r).map_err(field_err)?;
        if major_version == 3 {
            ret.size &= 0xffffffff;
        }
        if ret.objtype == 1 && ret.size > 0 {
            ret.anomalies.push("Storage object with data".to_string());
        }
        Ok(ret)
    }
}

/// How a chain walk terminated
#[derive(Debug, PartialEq)]
enum ChainEnd {
    /// The requested number of sectors was collected
    Wanted,
    /// A special sector value was found
    Marker(u32),
    /// The sector has no slot in the allocation table
    OutOfTable(u32),
}

/// Walks a sector chain in `table` starting at `first`
///
/// The walk stops after `wanted` sectors (if given) or at the first special value.
/// A revisited sector is a fatal error
fn walk_chain(
    table: &[u32],
    first: u32,
    wanted: Option<usize>,
) -> Result<(Vec<u32>, ChainEnd), OleError> {
    let mut visited = vec![false; table.len()];
    let mut sectors = Vec::new();
    let mut cur = first;
    loop {
        if wanted.is_some_and(|w| sectors.len() >= w) {
            return Ok((sectors, ChainEnd::Wanted));
        }
        if cur > MAXREGSID {
            return Ok((sectors, ChainEnd::Marker(cur)));
        }
        let Some(seen) = usize::try_from(cur).ok().and_then(|i| visited.get_mut(i)) else {
            return Ok((sectors, ChainEnd::OutOfTable(cur)));
        };
        if *seen {
            return Err(OleError::CompoundDocument(format!(
                "cyclic sector chain: sector {cur} revisited after {} steps (chain start: {first})",
                sectors.len()
            )));
        }
        *seen = true;
        sectors.push(cur);
        cur = table[cur as usize]; // Safe: bound checked above
    }
}

/// Groups consecutive sectors into `(first, count)` runs
fn contiguous_runs(sectors: &[u32]) -> Vec<(u32, usize)> {
    let mut runs: Vec<(u32, usize)> = Vec::new();
    for &sector in sectors {
        match runs.last_mut() {
            Some((first, count)) if u64::from(*first) + *count as u64 == u64::from(sector) => {
                *count += 1
            }
            _ => runs.push((sector, 1)),
        }
    }
    runs
}

struct HeaderInfo {
    dir_sectors: u32,
    fat_sectors: u32,
    first_dir_sector: u32,
    first_minifat_sector: u32,
    minifat_sectors: u32,
    first_difat_sector: u32,
    difat_sectors: u32,
}

impl<R: Read + Seek> Ole<R> {
    const ORIGTS: i64 = -11644473600;

    /// Parses an Ole object and collects the relevant characteristics
    pub fn new(reader: R) -> Result<Self, OleError> {
        let mut ret = Self {
            f: RefCell::new(reader),
            major_version: 0,
            minor_version: 0,
            anomalies: Vec::new(),
            sector_size: 512,
            mini_cutoff: 0x1000,
            fat: Vec::new(),
            minifat: Vec::new(),
            entries: Vec::new(),
            ministream: Ok(Vec::new()),
        };
        let mut header = [0u8; 512];
        {
            let f = ret.f.get_mut();
            f.seek(io::SeekFrom::Start(0))?;
            f.read_exact(&mut header).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    OleError::Header("file is too short to contain a header".to_string())
                }
                _ => OleError::Io(e),
            })?;
        }
        let (info, difat) = ret.parse_header(&header)?;
        let difat = ret.read_difat(&info, difat)?;
        ret.read_fat(&difat)?;
        ret.read_directory(&info)?;
        ret.read_minifat(info.first_minifat_sector, info.minifat_sectors)?;
        ret.ministream = ret.read_ministream();
        if let Err(e) = &ret.ministream {
            ret.anomalies.push(format!("Mini stream is unreadable: {e}"));
        }
        debug!(
            "Ole v{}.{}: {} entries, {} FAT slots, {} MiniFAT slots",
            ret.major_version,
            ret.minor_version,
            ret.entries.len(),
            ret.fat.len(),
            ret.minifat.len()
        );
        Ok(ret)
    }

    fn parse_header(&mut self, header: &[u8; 512]) -> Result<(HeaderInfo, Vec<u8>), OleError> {
        let mut f = &header[..];
        let signature: [u8; 8] = rdarray(&mut f)?;
        if signature != SIGNATURE {
            return Err(OleError::Header("Not an ole file".to_string()));
        }

        let clsid = Guid::from_le_bytes(&rdarray(&mut f)?);
        if !clsid.is_null() {
            self.anomalies.push("CLSID is not NULL".to_string());
        }
        self.minor_version = rdu16le(&mut f)?;
        self.major_version = rdu16le(&mut f)?;
        if self.minor_version != 0x003e {
            self.anomalies.push(format!(
                "Minor version set to {:04x} instead of {:04x}",
                self.minor_version, 0x003e
            ));
        }
        if self.major_version < 3 || self.major_version > 4 {
            self.anomalies.push(format!(
                "Major version set to {} (expected 3 or 4)",
                self.major_version
            ));
        }
        let byte_order = rdu16le(&mut f)?;
        if byte_order != 0xfffe {
            return Err(OleError::Header(format!(
                "Byte order set to {byte_order:04x} instead of fffe"
            )));
        }
        let sector_shift = rdu16le(&mut f)?;
        self.sector_size = match sector_shift {
            0x9 => {
                if self.major_version == 4 {
                    self.anomalies.push(
                        "Major version 4 should have sector size of 4096 bytes instead of 512"
                            .to_string(),
                    );
                }
                512
            }
            0xc => {
                if self.major_version == 3 {
                    self.anomalies.push(
                        "Major version 3 should have sector size of 512 bytes instead of 4096"
                            .to_string(),
                    );
                }
                4096
            }
            _ => {
                return Err(OleError::Header(format!(
                    "Invalid sector shift {sector_shift}"
                )));
            }
        };

        let mini_shift = rdu16le(&mut f)?;
        if mini_shift != 6 {
            self.anomalies.push(format!(
                "Mini sector shift should be set to 6 but is set to {mini_shift}"
            ));
        }

        let reserved: [u8; 6] = rdarray(&mut f)?;
        if reserved != [0u8; 6] {
            self.anomalies
                .push("Reserved area is not zeroed".to_string());
        }

        let mut dir_sectors = rdu32le(&mut f)?;
        if self.major_version == 3 && dir_sectors != 0 {
            self.anomalies.push(format!(
                "Number of directory sectors should be 0 for major version 3 but is {dir_sectors}"
            ));
            dir_sectors = 0;
        }
        let fat_sectors = rdu32le(&mut f)?;
        let first_dir_sector = rdu32le(&mut f)?;
        let _have_transactions = rdu32le(&mut f)? != 0;
        let mini_cutoff = rdu32le(&mut f)?;
        if mini_cutoff != 0x1000 {
            self.anomalies.push(format!(
                "Mini Stream Cutoff Size should be {:x} but is {:x}",
                0x1000, mini_cutoff
            ));
        }
        if mini_cutoff != 0 {
            self.mini_cutoff = u64::from(mini_cutoff);
        }
        let info = HeaderInfo {
            dir_sectors,
            fat_sectors,
            first_dir_sector,
            first_minifat_sector: rdu32le(&mut f)?,
            minifat_sectors: rdu32le(&mut f)?,
            first_difat_sector: rdu32le(&mut f)?,
            difat_sectors: rdu32le(&mut f)?,
        };
        // The first 109 difats are inlined in the header
        Ok((info, f[0..109 * 4].to_vec()))
    }

    /// Appends the FAT sector numbers found in `buf` to `difat`
    ///
    /// Returns true once a free slot terminates the list
    fn add_difats_from_buf(buf: &[u8], difat: &mut Vec<u32>) -> Result<bool, OleError> {
        for v in buf.chunks_exact(4) {
            let v = u32::from_le_bytes([v[0], v[1], v[2], v[3]]);
            match v {
                DIFSECT | FATSECT | ENDOFCHAIN => {
                    return Err(OleError::CompoundDocument(format!(
                        "Found DIFAT sector with special offset 0x{v:x}"
                    )));
                }
                FREESECT => return Ok(true),
                _ => difat.push(v),
            }
        }
        Ok(false)
    }

    fn read_difat(&mut self, info: &HeaderInfo, inline: Vec<u8>) -> Result<Vec<u32>, OleError> {
        let mut difat: Vec<u32> = Vec::new();
        let mut complete = Self::add_difats_from_buf(&inline, &mut difat)?;
        let mut difat_sector = info.first_difat_sector;
        let mut seen: HashSet<u32> = HashSet::new();
        let mut difat_sectors_read = 0u32;
        while !complete && difat_sector <= MAXREGSID {
            if !seen.insert(difat_sector) {
                return Err(OleError::CompoundDocument(format!(
                    "cyclic DIFAT chain: sector {difat_sector} revisited"
                )));
            }
            let buf = self.read_sector(difat_sector)?;
            let (entries, next) = buf.split_at(buf.len() - 4);
            complete = Self::add_difats_from_buf(entries, &mut difat)?;
            difat_sector = u32_at(next, 0).unwrap_or(ENDOFCHAIN);
            difat_sectors_read += 1;
        }
        if difat_sectors_read != info.difat_sectors {
            self.anomalies.push(format!(
                "Number of DIFAT sectors mismatch (header: {}, actual: {})",
                info.difat_sectors, difat_sectors_read
            ));
        }
        if !count_matches(info.fat_sectors, difat.len()) {
            self.anomalies.push(format!(
                "Number of FAT sectors mismatch (header: {}, actual: {})",
                info.fat_sectors,
                difat.len()
            ));
        }
        if difat.is_empty() {
            return Err(OleError::CompoundDocument(
                "The DIFAT lists no FAT sectors".to_string(),
            ));
        }
        Ok(difat)
    }

    fn read_fat(&mut self, difat: &[u32]) -> Result<(), OleError> {
        let mut seen: HashSet<u32> = HashSet::new();
        for &fat_sector in difat {
            if !seen.insert(fat_sector) {
                return Err(OleError::CompoundDocument(format!(
                    "FAT sector {fat_sector} is listed more than once"
                )));
            }
            let buf = self.read_sector(fat_sector)?;
            self.fat.extend(
                buf.chunks_exact(4)
                    .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]])),
            );
        }
        if difat
            .iter()
            .any(|&sector| self.fat.get(sector as usize) != Some(&FATSECT))
        {
            self.anomalies
                .push("One or more FAT sectors are not marked as FATSECT".to_string());
        }
        Ok(())
    }

    fn read_directory(&mut self, info: &HeaderInfo) -> Result<(), OleError> {
        let (sectors, end) = walk_chain(&self.fat, info.first_dir_sector, None)?;
        match end {
            ChainEnd::Marker(ENDOFCHAIN) => {}
            ChainEnd::Marker(v) => self.anomalies.push(format!(
                "Directory chain terminated by special value 0x{v:x}"
            )),
            ChainEnd::OutOfTable(v) => self.anomalies.push(format!(
                "Directory chain references sector {v} which is outside of the FAT"
            )),
            ChainEnd::Wanted => {}
        }
        if info.dir_sectors != 0 && !count_matches(info.dir_sectors, sectors.len()) {
            self.anomalies.push(format!(
                "Number of directory sectors mismatch (header: {}, actual: {})",
                info.dir_sectors,
                sectors.len()
            ));
        }
        if sectors.is_empty() {
            return Err(OleError::CompoundDocument(
                "The directory is empty".to_string(),
            ));
        }
        let mut buf: Vec<u8> = Vec::with_capacity(sectors.len() * self.sector_size as usize);
        for (first, count) in contiguous_runs(&sectors) {
            let mut run = vec![0u8; count * self.sector_size as usize];
            self.read_at(first, &mut run)?;
            buf.extend_from_slice(&run);
        }
        for (id, raw) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
            let id = id as u32;
            let entry = match OleEntry::parse(id, raw, self.major_version) {
                Ok(entry) => entry,
                Err(e) => {
                    self.anomalies
                        .push(format!("Invalid directory entry {id}: {e}"));
                    OleEntry {
                        id,
                        ..Default::default()
                    }
                }
            };
            self.entries.push(entry);
        }

        let root = &self.entries[0];
        if root.objtype != 5 {
            return Err(OleError::CompoundDocument(format!(
                "Invalid Root Entry: type is {} instead of 5",
                root.objtype
            )));
        }
        let mut root_anomalies: Vec<String> = Vec::new();
        if root.name != "Root Entry" {
            root_anomalies.push(format!("Root Entry has unexpected name \"{}\"", root.name));
        }
        if root.color != 1 {
            root_anomalies.push("Root Entry is not black".to_string());
        }
        if root
            .ctime
            .is_some_and(|t| t.unix_timestamp() != Self::ORIGTS)
        {
            root_anomalies.push("Root Entry has a creation time".to_string());
        }
        self.anomalies.extend(root_anomalies);
        Ok(())
    }

    fn read_minifat(&mut self, first: u32, count: u32) -> Result<(), OleError> {
        if first > MAXREGSID {
            if count != 0 {
                self.anomalies.push(format!(
                    "MiniFAT is absent but {count} MiniFAT sectors are declared"
                ));
            }
            return Ok(());
        }
        let (sectors, end) = walk_chain(&self.fat, first, None)?;
        if end != ChainEnd::Marker(ENDOFCHAIN) {
            self.anomalies
                .push(format!("MiniFAT chain terminated abnormally ({end:?})"));
        }
        if !count_matches(count, sectors.len()) {
            self.anomalies.push(format!(
                "Number of MiniFAT sectors mismatch (header: {count}, actual: {})",
                sectors.len()
            ));
        }
        for (first, count) in contiguous_runs(&sectors) {
            let mut run = vec![0u8; count * self.sector_size as usize];
            self.read_at(first, &mut run)?;
            self.minifat.extend(
                run.chunks_exact(4)
                    .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]])),
            );
        }
        Ok(())
    }

    fn read_ministream(&self) -> Result<Vec<u8>, String> {
        let root = &self.entries[0];
        if root.size == 0 {
            return Ok(Vec::new());
        }
        self.read_regular(root).map_err(|e| e.to_string())
    }

    /// Reads a whole sector
    fn read_sector(&self, sector: u32) -> Result<Vec<u8>, OleError> {
        let mut buf = vec![0u8; self.sector_size as usize];
        self.read_at(sector, &mut buf)?;
        Ok(buf)
    }

    /// Fills `buf` with the data starting at `sector`
    fn read_at(&self, sector: u32, buf: &mut [u8]) -> Result<(), OleError> {
        let offset = (u64::from(sector) + 1) * u64::from(self.sector_size);
        let mut f = self.f.borrow_mut();
        f.seek(io::SeekFrom::Start(offset))?;
        f.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => OleError::CompoundDocument(format!(
                "sector {sector} lies beyond the end of the file"
            )),
            _ => OleError::Io(e),
        })
    }

    fn read_regular(&self, entry: &OleEntry) -> Result<Vec<u8>, OleError> {
        let sector_size = self.sector_size as usize;
        let size = usize::try_from(entry.size)
            .map_err(|_| OleError::CompoundDocument(format!("stream {} is too large", entry.name)))?;
        let wanted = size.div_ceil(sector_size);
        if wanted > self.fat.len() {
            return Err(OleError::CompoundDocument(format!(
                "stream \"{}\" claims {} bytes which exceeds the container capacity",
                entry.name, entry.size
            )));
        }
        let (sectors, end) = walk_chain(&self.fat, entry.start_sector, Some(wanted))?;
        if end != ChainEnd::Wanted {
            return Err(OleError::CompoundDocument(format!(
                "chain of stream \"{}\" ends after {} of {} sectors ({end:?})",
                entry.name,
                sectors.len(),
                wanted
            )));
        }
        let mut data = vec![0u8; size];
        let mut done = 0usize;
        for (first, count) in contiguous_runs(&sectors) {
            let len = (count * sector_size).min(size - done);
            self.read_at(first, &mut data[done..(done + len)])?;
            done += len;
        }
        Ok(data)
    }

    fn read_mini(&self, entry: &OleEntry) -> Result<Vec<u8>, OleError> {
        let ministream = self.ministream.as_ref().map_err(|e| {
            OleError::CompoundDocument(format!(
                "stream \"{}\" lives in an unreadable mini stream: {e}",
                entry.name
            ))
        })?;
        // Safe cast: mini streams are below the cutoff
        let size = entry.size as usize;
        let wanted = size.div_ceil(MINI_SECTOR_SIZE);
        let (sectors, end) = walk_chain(&self.minifat, entry.start_sector, Some(wanted))?;
        if end != ChainEnd::Wanted {
            return Err(OleError::CompoundDocument(format!(
                "mini chain of stream \"{}\" ends after {} of {} sectors ({end:?})",
                entry.name,
                sectors.len(),
                wanted
            )));
        }
        let mut data = Vec::with_capacity(size);
        for sector in sectors {
            let start = sector as usize * MINI_SECTOR_SIZE;
            let len = MINI_SECTOR_SIZE.min(size - data.len());
            let chunk = ministream.get(start..(start + len)).ok_or_else(|| {
                OleError::CompoundDocument(format!(
                    "mini sector {sector} lies beyond the end of the mini stream"
                ))
            })?;
            data.extend_from_slice(chunk);
        }
        Ok(data)
    }

    fn is_mini(&self, entry: &OleEntry) -> bool {
        entry.id > 0 && entry.size < self.mini_cutoff
    }

    /// Returns the full content of a stream entry
    ///
    /// Exactly [`size`](OleEntry::size) bytes are returned; broken or cyclic chains
    /// produce [`OleError::CompoundDocument`]
    pub fn read_stream(&self, entry: &OleEntry) -> Result<Vec<u8>, OleError> {
        if !entry.is_allocated() {
            return Err(OleError::NotFound(format!("entry {} is unallocated", entry.id)));
        }
        if entry.size == 0 {
            return Ok(Vec::new());
        }
        if self.is_mini(entry) {
            self.read_mini(entry)
        } else {
            self.read_regular(entry)
        }
    }

    /// Returns a tuple with the major and minor versions of the Ole file
    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    /// Returns the number of slots in the directory
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Returns the directory arena, indexed by entry id
    ///
    /// Unallocated slots are included
    pub fn entries(&self) -> &[OleEntry] {
        &self.entries
    }

    /// Returns a list of format divergences found in the header and directory
    pub fn anomalies(&self) -> &[String] {
        &self.anomalies
    }

    /// Returns the entry with the given `id`
    pub fn get_entry_by_id(&self, id: u32) -> Result<&OleEntry, OleError> {
        self.entries
            .get(id as usize)
            .filter(|e| e.is_allocated())
            .ok_or_else(|| OleError::NotFound(format!("entry {id}")))
    }

    /// Looks up an entry by its full path (e.g. `"Storage/Stream"`)
    ///
    /// The comparison is case insensitive. When the directory tree is malformed a linear
    /// scan is attempted for single component paths
    pub fn get_entry_by_name(&self, path: &str) -> Result<&OleEntry, OleError> {
        match self.tree_lookup(path) {
            Lookup::Found(id) => Ok(&self.entries[id as usize]),
            Lookup::Missing => Err(OleError::NotFound(path.to_string())),
            Lookup::Malformed(e) => {
                warn!("Directory tree is malformed ({e}), falling back to a linear scan");
                let name = path.to_uppercase();
                if name.contains('/') {
                    return Err(OleError::NotFound(path.to_string()));
                }
                self.entries
                    .iter()
                    .skip(1)
                    .find(|e| e.is_allocated() && e.name.to_uppercase() == name)
                    .ok_or_else(|| OleError::NotFound(path.to_string()))
            }
        }
    }

    /// Looks up a stream entry by path
    ///
    /// Fails with [`OleError::CompoundDocument`] if the entry exists but is a storage
    pub fn find_stream(&self, path: &str) -> Result<&OleEntry, OleError> {
        let entry = self.get_entry_by_name(path)?;
        if entry.is_stream() {
            Ok(entry)
        } else {
            Err(OleError::CompoundDocument(format!("\"{path}\" is not a stream")))
        }
    }

    fn tree_lookup(&self, path: &str) -> Lookup {
        let mut cur = 0u32;
        let mut steps = 0usize;
        for part in path.to_uppercase().split('/') {
            let part_len = part.encode_utf16().count();
            let Some(mut nextid) = self.entries[cur as usize].child() else {
                return Lookup::Missing;
            };
            loop {
                if steps >= self.entries.len() {
                    return Lookup::Malformed(format!(
                        "search aborted after {steps} steps: probable loop in the tree"
                    ));
                }
                steps += 1;
                let Some(entry) = self.entries.get(nextid as usize) else {
                    return Lookup::Malformed(format!("dangling link to entry {nextid}"));
                };
                if !entry.is_allocated() {
                    return Lookup::Malformed(format!("link to unallocated entry {nextid}"));
                }
                let cname = entry.name.to_uppercase();
                let cname_len = cname.encode_utf16().count();
                let next = match part_len
                    .cmp(&cname_len)
                    .then_with(|| part.cmp(cname.as_str()))
                {
                    std::cmp::Ordering::Less => entry.left(),
                    std::cmp::Ordering::Greater => entry.right(),
                    std::cmp::Ordering::Equal => {
                        cur = nextid;
                        break;
                    }
                };
                match next {
                    Some(id) => nextid = id,
                    None => return Lookup::Missing,
                }
            }
        }
        Lookup::Found(cur)
    }

    /// Returns a walker over all the entries reachable from the root
    ///
    /// The walker yields pairs of the full path and the entry
    pub fn ftw(&self) -> OleEntryIterator<'_, R> {
        OleEntryIterator {
            ole: self,
            stack: self.entries[0]
                .child()
                .map(|id| vec![(id, String::new())])
                .unwrap_or_default(),
            seen: HashSet::new(),
        }
    }

    /// Consumes the parser returning the underlying reader
    pub fn into_inner(self) -> R {
        self.f.into_inner()
    }
}

enum Lookup {
    Found(u32),
    Missing,
    Malformed(String),
}

/// Depth first iterator over the directory tree, see [`Ole::ftw`]
pub struct OleEntryIterator<'a, R: Read + Seek> {
    ole: &'a Ole<R>,
    stack: Vec<(u32, String)>,
    seen: HashSet<u32>,
}

impl<'a, R: Read + Seek> Iterator for OleEntryIterator<'a, R> {
    type Item = (String, &'a OleEntry);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((id, parent)) = self.stack.pop() {
            if !self.seen.insert(id) {
                warn!("Directory entry {id} is referenced more than once");
                continue;
            }
            let Some(entry) = self.ole.entries.get(id as usize) else {
                continue;
            };
            if !entry.is_allocated() {
                continue;
            }
            if let Some(right) = entry.right() {
                self.stack.push((right, parent.clone()));
            }
            if let Some(left) = entry.left() {
                self.stack.push((left, parent.clone()));
            }
            let path = if parent.is_empty() {
                entry.name.clone()
            } else {
                format!("{parent}/{}", entry.name)
            };
            if let Some(child) = entry.child() {
                self.stack.push((child, path.clone()));
            }
            return Some((path, entry));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_walk() {
        let table = [1, 2, ENDOFCHAIN, 3, 0];
        let (sectors, end) = walk_chain(&table, 0, None).unwrap();
        assert_eq!(sectors, [0, 1, 2]);
        assert_eq!(end, ChainEnd::Marker(ENDOFCHAIN));

        let (sectors, end) = walk_chain(&table, 0, Some(2)).unwrap();
        assert_eq!(sectors, [0, 1]);
        assert_eq!(end, ChainEnd::Wanted);

        let (sectors, end) = walk_chain(&table, 4, Some(5)).unwrap();
        assert_eq!(sectors, [4, 0, 1, 2]);
        assert_eq!(end, ChainEnd::Marker(ENDOFCHAIN));

        let (_, end) = walk_chain(&[7], 0, None).unwrap();
        assert_eq!(end, ChainEnd::OutOfTable(7));

        assert!(matches!(
            walk_chain(&[0], 0, None),
            Err(OleError::CompoundDocument(_))
        ));
        assert!(matches!(
            walk_chain(&table, 3, Some(100)),
            Err(OleError::CompoundDocument(_))
        ));
    }

    #[test]
    fn runs() {
        assert_eq!(
            contiguous_runs(&[3, 4, 5, 9, 10, 2]),
            [(3, 3), (9, 2), (2, 1)]
        );
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn entry_parse() {
        let mut raw = [0u8; 128];
        for (i, c) in "Workbook".encode_utf16().enumerate() {
            raw[i * 2..i * 2 + 2].copy_from_slice(&c.to_le_bytes());
        }
        raw[64] = 18;
        raw[66] = 2;
        raw[67] = 1;
        raw[68..80].copy_from_slice(&[0xff; 12]);
        raw[116..120].copy_from_slice(&7u32.to_le_bytes());
        raw[120..128].copy_from_slice(&0x1_0000_1000u64.to_le_bytes());
        let entry = OleEntry::parse(1, &raw, 3).unwrap();
        assert_eq!(entry.name, "Workbook");
        assert!(entry.is_stream());
        assert_eq!(entry.size, 0x1000);
        assert_eq!(entry.start_sector, 7);
        assert!(entry.anomalies.is_empty());
        let entry = OleEntry::parse(1, &raw, 4).unwrap();
        assert_eq!(entry.size, 0x1_0000_1000);

        raw[64] = 17;
        assert!(OleEntry::parse(1, &raw, 3).is_err());
        raw[64] = 18;
        raw[66] = 3;
        assert!(OleEntry::parse(1, &raw, 3).is_err());
    }
}
