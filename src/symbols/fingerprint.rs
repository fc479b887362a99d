//! Fingerprint terms.
//!
//! ASLR slides a library by whole pages, so the low 12 bits of every symbol
//! address survive across runs of the same build. A term pairs the symbol
//! name with those bits: `"{name}@{offset:03x}"`.
//!
//! The mask width and the text format are shared by every index ever built.
//! Changing either one silently breaks matching against existing indexes.

use crate::symbols::table::SymbolTable;
use std::fmt;

/// Low 12 bits: the offset within a 4 KiB page
pub const PAGE_OFFSET_MASK: u64 = 0xfff;

/// A `(name, page offset)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintTerm {
    pub name: String,
    pub masked_offset: u16,
}

impl FingerprintTerm {
    pub fn new(name: &str, address: u64) -> Self {
        Self {
            name: name.to_string(),
            masked_offset: (address & PAGE_OFFSET_MASK) as u16,
        }
    }
}

impl fmt::Display for FingerprintTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:03x}", self.name, self.masked_offset)
    }
}

/// Encode one symbol into its index term
#[inline]
pub fn encode(name: &str, address: u64) -> String {
    FingerprintTerm::new(name, address).to_string()
}

/// Encode every line of a table, space-joined, in artifact order
pub fn encode_all(table: &SymbolTable) -> String {
    let mut out = String::with_capacity(table.len() * 24);
    for (name, address) in table.iter() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&encode(name, address));
    }
    out
}
