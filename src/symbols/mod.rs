//! Per-build symbol tables and the ASLR-tolerant terms derived from them.
//!
//! - [`table`] - `<name> <hexAddress>` artifact parsing
//! - [`fingerprint`] - `name@xxx` term encoding shared by indexer and matcher

pub mod fingerprint;
pub mod table;

pub use fingerprint::{encode, encode_all, FingerprintTerm, PAGE_OFFSET_MASK};
pub use table::{ParseError, ParseErrorKind, SymbolTable, SYMBOLS_EXTENSION};
