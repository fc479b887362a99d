//! Symbol table artifacts.
//!
//! Each build in the corpus ships a companion `<id>.symbols` file holding one
//! `<name> <hexAddress>` pair per line. All addresses in one file share the
//! same (unknown) load base.

use ahash::AHashMap;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of the companion symbols artifact
pub const SYMBOLS_EXTENSION: &str = "symbols";

/// What was wrong with a malformed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The line did not split into exactly two whitespace-separated tokens
    TokenCount(usize),
    /// The address token is not valid hex
    InvalidAddress(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::TokenCount(n) => write!(f, "expected 2 tokens, found {}", n),
            ParseErrorKind::InvalidAddress(addr) => write!(f, "invalid hex address {:?}", addr),
        }
    }
}

/// A malformed line in a symbols artifact
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    pub kind: ParseErrorKind,
}

/// Mapping from symbol name to absolute address for one build.
///
/// Every line of the artifact is kept in order, so a name exported at two
/// addresses (versioned exports) yields both pairs from [`SymbolTable::iter`].
/// Lookups by name see the last address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<(String, u64)>,
    by_name: AHashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the textual artifact. Blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut table = Self::new();

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [name, addr] = tokens.as_slice() else {
                return Err(ParseError {
                    line: idx + 1,
                    kind: ParseErrorKind::TokenCount(tokens.len()),
                });
            };

            let address = parse_hex_address(addr).ok_or_else(|| ParseError {
                line: idx + 1,
                kind: ParseErrorKind::InvalidAddress(addr.to_string()),
            })?;

            table.insert(name, address);
        }

        Ok(table)
    }

    /// Read and parse a symbols artifact from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let table = Self::parse(&text)
            .with_context(|| format!("Malformed symbols file {}", path.display()))?;
        Ok(table)
    }

    /// Load the companion artifact of `id` from a corpus directory
    pub fn load_for(dir: &Path, id: &str) -> Result<Self> {
        Self::load(&Self::path_for(dir, id))
    }

    /// Location of the companion artifact of `id`
    pub fn path_for(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.{}", id, SYMBOLS_EXTENSION))
    }

    pub fn insert(&mut self, name: &str, address: u64) {
        self.by_name.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), address));
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|&pos| self.entries[pos].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of `(name, address)` lines, repeats included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate every `(name, address)` line in artifact order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

/// Parse a hex address, with or without a `0x` prefix
pub fn parse_hex_address(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
