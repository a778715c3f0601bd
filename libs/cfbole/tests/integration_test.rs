mod common;

use cfbole::{Ole, OleError};
use std::io::{Cursor, Write};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn regular_and_mini_streams() -> Result<(), OleError> {
    let big = pattern(10_000, 1);
    let small = pattern(100, 2);
    let edge = pattern(4096, 3);
    let image = common::build(&[
        ("Workbook", &big),
        ("Small", &small),
        ("Edge", &edge),
        ("Empty", &[]),
    ]);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    assert_eq!(ole.version(), (3, 0x3e));
    assert!(ole.anomalies().is_empty(), "{:?}", ole.anomalies());

    for (name, data) in [("Workbook", &big), ("Small", &small), ("Edge", &edge)] {
        let entry = ole.find_stream(name)?;
        assert_eq!(entry.size, data.len() as u64, "size of {name}");
        let read = ole.read_stream(entry)?;
        assert_eq!(read.len(), data.len(), "length of {name}");
        assert_eq!(&read, data, "content of {name}");
    }
    let empty = ole.find_stream("Empty")?;
    assert!(ole.read_stream(empty)?.is_empty());
    Ok(())
}

#[test]
fn difat_extended() -> Result<(), OleError> {
    let data = pattern(20_000, 9);
    let image = common::build_with(&[("Workbook", &data)], 120);
    assert!(image.difat_sectors > 0);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    assert!(ole.anomalies().is_empty(), "{:?}", ole.anomalies());
    let entry = ole.find_stream("Workbook")?;
    assert_eq!(ole.read_stream(entry)?, data);
    Ok(())
}

#[test]
fn lookup_is_case_insensitive() -> Result<(), OleError> {
    let image = common::build(&[("Workbook", b"abc"), ("Book", b"defg")]);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    assert_eq!(ole.find_stream("WORKBOOK")?.name, "Workbook");
    assert_eq!(ole.find_stream("book")?.size, 4);
    assert!(matches!(ole.find_stream("Missing"), Err(OleError::NotFound(_))));
    assert!(matches!(
        ole.find_stream("Root Entry"),
        Err(OleError::NotFound(_))
    ));
    assert_eq!(ole.get_entry_by_id(0)?.name, "Root Entry");
    Ok(())
}

#[test]
fn tree_walk() -> Result<(), OleError> {
    let image = common::build(&[("B", b"1"), ("A", b"22"), ("CC", b"333")]);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    let mut names: Vec<String> = ole.ftw().map(|(path, _)| path).collect();
    names.sort();
    assert_eq!(names, ["A", "B", "CC"]);
    Ok(())
}

#[test]
fn malformed_tree_falls_back_to_scan() -> Result<(), OleError> {
    let mut image = common::build(&[("A", b"1"), ("B", b"22"), ("Workbook", b"333")]);
    // Make entry 2 ("B") point back to entry 1 ("A")
    let off = image.dir_entry_offset(2) + 72;
    image.bytes[off..off + 4].copy_from_slice(&1u32.to_le_bytes());
    let ole = Ole::new(Cursor::new(image.bytes))?;
    let entry = ole.find_stream("Workbook")?;
    assert_eq!(ole.read_stream(entry)?, b"333");
    assert_eq!(ole.ftw().count(), 2);
    Ok(())
}

#[test]
fn self_referencing_chain() -> Result<(), OleError> {
    let data = pattern(5000, 4);
    let mut image = common::build(&[("Workbook", &data)]);
    let start = image.starts["Workbook"];
    image.set_fat(start, start);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    let entry = ole.find_stream("Workbook")?;
    assert!(matches!(
        ole.read_stream(entry),
        Err(OleError::CompoundDocument(_))
    ));
    Ok(())
}

#[test]
fn truncated_chain() -> Result<(), OleError> {
    let data = pattern(5000, 4);
    let mut image = common::build(&[("Workbook", &data)]);
    let start = image.starts["Workbook"];
    image.set_fat(start, common::ENDOFCHAIN);
    let ole = Ole::new(Cursor::new(image.bytes))?;
    let entry = ole.find_stream("Workbook")?;
    assert!(matches!(
        ole.read_stream(entry),
        Err(OleError::CompoundDocument(_))
    ));
    Ok(())
}

#[test]
fn cyclic_directory_chain() {
    let mut image = common::build(&[("Workbook", b"abc")]);
    let dir_start = image.dir_start;
    image.set_fat(dir_start, dir_start);
    assert!(matches!(
        Ole::new(Cursor::new(image.bytes)),
        Err(OleError::CompoundDocument(_))
    ));
}

#[test]
fn header_errors() {
    let image = common::build(&[("Workbook", b"abc")]);

    let mut bad_magic = image.bytes.clone();
    bad_magic[0] = 0;
    assert!(matches!(
        Ole::new(Cursor::new(bad_magic)),
        Err(OleError::Header(_))
    ));

    let mut bad_order = image.bytes.clone();
    bad_order[28] = 0xff;
    assert!(matches!(
        Ole::new(Cursor::new(bad_order)),
        Err(OleError::Header(_))
    ));

    let mut bad_shift = image.bytes.clone();
    bad_shift[30] = 10;
    assert!(matches!(
        Ole::new(Cursor::new(bad_shift)),
        Err(OleError::Header(_))
    ));

    assert!(matches!(
        Ole::new(Cursor::new(vec![0u8; 100])),
        Err(OleError::Header(_))
    ));
}

#[test]
fn minor_divergences_are_anomalies() -> Result<(), OleError> {
    let mut image = common::build(&[("Workbook", b"abc")]);
    image.bytes[24] = 0x3b; // minor version
    image.bytes[34] = 1; // reserved
    let ole = Ole::new(Cursor::new(image.bytes))?;
    assert_eq!(ole.anomalies().len(), 2, "{:?}", ole.anomalies());
    Ok(())
}

#[test]
fn on_disk() -> Result<(), Box<dyn std::error::Error>> {
    let data = pattern(7000, 5);
    let image = common::build(&[("Workbook", &data)]);
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&image.bytes)?;
    let ole = Ole::new(std::io::BufReader::new(file.reopen()?))?;
    let entry = ole.find_stream("Workbook")?;
    assert_eq!(ole.read_stream(entry)?, data);
    let _reader = ole.into_inner();
    Ok(())
}
