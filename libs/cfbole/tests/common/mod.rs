//! Byte accurate compound file builder for tests
//!
//! Produces version 3 files (512 byte sectors) with a flat directory where every
//! stream hangs off the root entry
#![allow(dead_code)]

use std::collections::HashMap;

pub const SECTOR: usize = 512;
pub const MINI_SECTOR: usize = 64;
pub const MINI_CUTOFF: usize = 4096;
pub const ENDOFCHAIN: u32 = 0xfffffffe;
pub const FREESECT: u32 = 0xffffffff;
pub const FATSECT: u32 = 0xfffffffd;
pub const DIFSECT: u32 = 0xfffffffc;
pub const NOSTREAM: u32 = 0xffffffff;

/// A built compound file
pub struct Image {
    pub bytes: Vec<u8>,
    /// Start sector (regular or mini) of each stream
    pub starts: HashMap<String, u32>,
    /// First directory sector
    pub dir_start: u32,
    /// Number of FAT sectors
    pub fat_sectors: usize,
    /// Number of DIFAT sectors
    pub difat_sectors: usize,
}

impl Image {
    /// File offset of the FAT slot describing `sector`
    pub fn fat_entry_offset(&self, sector: u32) -> usize {
        let sector = sector as usize;
        // FAT sectors are laid out first, so FAT sector n is file sector n
        (sector / 128 + 1) * SECTOR + (sector % 128) * 4
    }

    /// Overwrites the FAT slot describing `sector`
    pub fn set_fat(&mut self, sector: u32, value: u32) {
        let off = self.fat_entry_offset(sector);
        self.bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// File offset of the directory entry `id`
    pub fn dir_entry_offset(&self, id: usize) -> usize {
        // Directory sectors are contiguous
        (self.dir_start as usize + 1) * SECTOR + id * 128
    }
}

fn sectors_for(len: usize, size: usize) -> usize {
    len.div_ceil(size)
}

fn sort_key(name: &str) -> (usize, String) {
    (name.encode_utf16().count(), name.to_uppercase())
}

fn dir_entry(
    name: &str,
    objtype: u8,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    size: u64,
) -> [u8; 128] {
    let mut e = [0u8; 128];
    let units: Vec<u16> = name.encode_utf16().collect();
    assert!(units.len() < 32, "name too long");
    for (i, c) in units.iter().enumerate() {
        e[i * 2..i * 2 + 2].copy_from_slice(&c.to_le_bytes());
    }
    e[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    e[66] = objtype;
    e[67] = 1;
    e[68..72].copy_from_slice(&left.to_le_bytes());
    e[72..76].copy_from_slice(&right.to_le_bytes());
    e[76..80].copy_from_slice(&child.to_le_bytes());
    e[116..120].copy_from_slice(&start.to_le_bytes());
    e[120..128].copy_from_slice(&size.to_le_bytes());
    e
}

/// Builds a compound file containing `streams` in the root storage
pub fn build(streams: &[(&str, &[u8])]) -> Image {
    build_with(streams, 1)
}

/// Like [build], but reserves at least `min_fat_sectors` FAT sectors
///
/// More than 109 FAT sectors force the use of DIFAT sectors
pub fn build_with(streams: &[(&str, &[u8])], min_fat_sectors: usize) -> Image {
    let mut streams: Vec<(&str, &[u8])> = streams.to_vec();
    streams.sort_by_key(|(name, _)| sort_key(name));

    let is_mini = |data: &[u8]| !data.is_empty() && data.len() < MINI_CUTOFF;

    // Mini stream allocation
    let mut ministream: Vec<u8> = Vec::new();
    let mut minifat: Vec<u32> = Vec::new();
    let mut mini_starts: HashMap<String, u32> = HashMap::new();
    for (name, data) in streams.iter().filter(|(_, d)| is_mini(d)) {
        let first = minifat.len() as u32;
        let count = sectors_for(data.len(), MINI_SECTOR);
        for i in 0..count {
            let sector = first + i as u32;
            minifat.push(if i + 1 == count {
                ENDOFCHAIN
            } else {
                sector + 1
            });
        }
        mini_starts.insert(name.to_string(), first);
        ministream.extend_from_slice(data);
        ministream.resize(minifat.len() * MINI_SECTOR, 0);
    }

    let dir_count = sectors_for(streams.len() + 1, SECTOR / 128);
    let minifat_count = sectors_for(minifat.len() * 4, SECTOR);
    let ministream_count = sectors_for(ministream.len(), SECTOR);
    let big_counts: Vec<usize> = streams
        .iter()
        .map(|(_, d)| {
            if is_mini(d) {
                0
            } else {
                sectors_for(d.len(), SECTOR)
            }
        })
        .collect();
    let data_sectors = dir_count + minifat_count + ministream_count + big_counts.iter().sum::<usize>();

    // Size the FAT so it can describe itself, the DIFAT and the data
    let mut fat_count = min_fat_sectors.max(1);
    let difat_count = loop {
        let difat_count = sectors_for(fat_count.saturating_sub(109), 127);
        if fat_count * 128 >= fat_count + difat_count + data_sectors {
            break difat_count;
        }
        fat_count += 1;
    };

    let mut fat: Vec<u32> = vec![FREESECT; fat_count * 128];
    let mut next = 0usize;
    for _ in 0..fat_count {
        fat[next] = FATSECT;
        next += 1;
    }
    let difat_start = next;
    for _ in 0..difat_count {
        fat[next] = DIFSECT;
        next += 1;
    }
    let mut alloc_chain = |count: usize, next: &mut usize| -> u32 {
        if count == 0 {
            return ENDOFCHAIN;
        }
        let first = *next;
        for i in 0..count {
            fat[first + i] = if i + 1 == count {
                ENDOFCHAIN
            } else {
                (first + i + 1) as u32
            };
        }
        *next += count;
        first as u32
    };
    let dir_start = alloc_chain(dir_count, &mut next);
    let minifat_start = alloc_chain(minifat_count, &mut next);
    let ministream_start = alloc_chain(ministream_count, &mut next);
    let mut starts: HashMap<String, u32> = HashMap::new();
    let mut big_starts: Vec<u32> = Vec::new();
    for ((name, data), count) in streams.iter().zip(&big_counts) {
        let start = alloc_chain(*count, &mut next);
        big_starts.push(start);
        if is_mini(data) {
            starts.insert(name.to_string(), mini_starts[*name]);
        } else {
            starts.insert(name.to_string(), start);
        }
    }
    let total_sectors = next;

    // Header
    let mut bytes = vec![0u8; (total_sectors + 1) * SECTOR];
    {
        let h = &mut bytes[0..SECTOR];
        h[0..8].copy_from_slice(&[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1]);
        h[24..26].copy_from_slice(&0x3eu16.to_le_bytes());
        h[26..28].copy_from_slice(&3u16.to_le_bytes());
        h[28..30].copy_from_slice(&0xfffeu16.to_le_bytes());
        h[30..32].copy_from_slice(&9u16.to_le_bytes());
        h[32..34].copy_from_slice(&6u16.to_le_bytes());
        h[44..48].copy_from_slice(&(fat_count as u32).to_le_bytes());
        h[48..52].copy_from_slice(&dir_start.to_le_bytes());
        h[56..60].copy_from_slice(&(MINI_CUTOFF as u32).to_le_bytes());
        h[60..64].copy_from_slice(&minifat_start.to_le_bytes());
        h[64..68].copy_from_slice(&(minifat_count as u32).to_le_bytes());
        let first_difat = if difat_count > 0 {
            difat_start as u32
        } else {
            ENDOFCHAIN
        };
        h[68..72].copy_from_slice(&first_difat.to_le_bytes());
        h[72..76].copy_from_slice(&(difat_count as u32).to_le_bytes());
        for i in 0..109 {
            let v = if i < fat_count { i as u32 } else { FREESECT };
            h[76 + i * 4..80 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
    }
    // FAT
    for (i, v) in fat.iter().enumerate() {
        let off = SECTOR + i * 4;
        bytes[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    // DIFAT
    let mut remaining: Vec<u32> = (109..fat_count).map(|s| s as u32).collect();
    for d in 0..difat_count {
        let off = (difat_start + d + 1) * SECTOR;
        let sec = &mut bytes[off..off + SECTOR];
        let take: Vec<u32> = remaining.drain(0..remaining.len().min(127)).collect();
        for i in 0..127 {
            let v = take.get(i).copied().unwrap_or(FREESECT);
            sec[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        let next_difat = if d + 1 == difat_count {
            ENDOFCHAIN
        } else {
            (difat_start + d + 1) as u32
        };
        sec[508..512].copy_from_slice(&next_difat.to_le_bytes());
    }

    // Directory
    let mut dir: Vec<u8> = Vec::with_capacity(dir_count * SECTOR);
    dir.extend_from_slice(&dir_entry(
        "Root Entry",
        5,
        NOSTREAM,
        NOSTREAM,
        if streams.is_empty() { NOSTREAM } else { 1 },
        if ministream.is_empty() {
            ENDOFCHAIN
        } else {
            ministream_start
        },
        ministream.len() as u64,
    ));
    for (i, (name, data)) in streams.iter().enumerate() {
        let id = i as u32 + 1;
        let right = if i + 1 == streams.len() {
            NOSTREAM
        } else {
            id + 1
        };
        let start = if data.is_empty() {
            ENDOFCHAIN
        } else {
            starts[*name]
        };
        dir.extend_from_slice(&dir_entry(
            name,
            2,
            NOSTREAM,
            right,
            NOSTREAM,
            start,
            data.len() as u64,
        ));
    }
    dir.resize(dir_count * SECTOR, 0);
    let off = (dir_start as usize + 1) * SECTOR;
    bytes[off..off + dir.len()].copy_from_slice(&dir);

    // MiniFAT
    if minifat_count > 0 {
        let off = (minifat_start as usize + 1) * SECTOR;
        for (i, v) in minifat.iter().enumerate() {
            bytes[off + i * 4..off + i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        for i in minifat.len()..minifat_count * 128 {
            bytes[off + i * 4..off + i * 4 + 4].copy_from_slice(&FREESECT.to_le_bytes());
        }
    }

    // Mini stream container
    if ministream_count > 0 {
        let off = (ministream_start as usize + 1) * SECTOR;
        bytes[off..off + ministream.len()].copy_from_slice(&ministream);
    }

    // Regular streams
    for ((_, data), start) in streams.iter().zip(&big_starts) {
        if is_mini(data) || data.is_empty() {
            continue;
        }
        let off = (*start as usize + 1) * SECTOR;
        bytes[off..off + data.len()].copy_from_slice(data);
    }

    Image {
        bytes,
        starts,
        dir_start,
        fat_sectors: fat_count,
        difat_sectors: difat_count,
    }
}
