//! Miscellaneous byte-level helpers shared by the container and the record decoder
#![warn(missing_docs)]

pub mod cmp;
pub mod io;
pub mod win32;
