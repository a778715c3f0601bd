//! Number format classification
//!
//! Only the date/time nature of a format matters to the decoder: numbers whose cell style
//! refers to a date/time format are reported as [`CellValue::DateTime`](crate::CellValue)
use std::collections::BTreeMap;

/// Number format codes declared by *Format* records, by id
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    formats: BTreeMap<u16, String>,
}

impl FormatTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `code` under `id`, replacing any previous declaration
    pub fn insert(&mut self, id: u16, code: String) {
        self.formats.insert(id, code);
    }

    /// Returns the format code declared for `id`
    pub fn get(&self, id: u16) -> Option<&str> {
        self.formats.get(&id).map(String::as_str)
    }

    /// Number of declared formats
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Returns true if no format is declared
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Iterates over the declared formats in id order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.formats.iter().map(|(id, code)| (*id, code.as_str()))
    }
}

/// Number format collaborator
pub trait NumberFormat {
    /// Returns true if the format `id` renders numbers as dates or times
    fn is_date_time(&self, id: u16, formats: &FormatTable) -> bool;
}

/// Built-in classification: a token scan of the declared codes, then the known date ids
///
/// Codes are looked up first since BIFF2-BIFF4 number every format, built-in ones included,
/// in the order of the FORMAT records
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinNumberFormat;

impl BuiltinNumberFormat {
    /// Built-in format ids which are dates or times
    pub fn is_builtin_date(id: u16) -> bool {
        matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58)
    }
}

impl NumberFormat for BuiltinNumberFormat {
    fn is_date_time(&self, id: u16, formats: &FormatTable) -> bool {
        match formats.get(id) {
            Some(code) => is_date_format_code(code),
            None => Self::is_builtin_date(id),
        }
    }
}

/// Scans a format code for date/time tokens
///
/// Quoted literals, escaped characters, fill and padding characters and bracketed
/// sections are ignored, except for the elapsed time sections `[h]`, `[m]` and `[s]`
pub fn is_date_format_code(code: &str) -> bool {
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                }
            }
            '\\' | '_' | '*' => {
                chars.next();
            }
            '[' => {
                let mut section = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    section.push(c);
                }
                let section = section.to_ascii_lowercase();
                if !section.is_empty()
                    && (section.chars().all(|c| c == 'h')
                        || section.chars().all(|c| c == 'm')
                        || section.chars().all(|c| c == 's'))
                {
                    return true;
                }
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}
