//! Index-free matching on the distance between two symbols.
//!
//! Two addresses from the same table share one load base, so
//! `table[a] - table[b]` is the same for every run of a build, whatever
//! the base. Scanning the raw `.symbols` files for a known delta needs no
//! index at all.

use crate::symbols::{SymbolTable, SYMBOLS_EXTENSION};
use anyhow::{bail, Context, Result};
use log::warn;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A build whose two symbols are exactly `delta` apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaMatch {
    pub id: String,
    pub path: PathBuf,
    pub delta: i128,
}

/// Why an artifact was left out of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingSymbol(String),
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingSymbol(name) => write!(f, "no symbol {}", name),
            SkipReason::Unreadable(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSkip {
    pub id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub matches: Vec<DeltaMatch>,
    pub skipped: Vec<DeltaSkip>,
    pub scanned: usize,
}

impl DeltaReport {
    pub fn ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.id.as_str()).collect()
    }
}

/// Parse a delta given as hex: optional `-`, optional `0x`
pub fn parse_delta(s: &str) -> Result<i128> {
    let s = s.trim();
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let digits = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Invalid hex delta: {:?}", s);
    }
    let magnitude = u64::from_str_radix(digits, 16)
        .with_context(|| format!("Delta out of range: {:?}", s))?;
    let value = magnitude as i128;
    Ok(if negative { -value } else { value })
}

/// Render a signed delta the way it is entered: `0x230`, `-0x10`
pub fn format_delta(delta: i128) -> String {
    if delta < 0 {
        format!("-{:#x}", delta.unsigned_abs())
    } else {
        format!("{:#x}", delta)
    }
}

/// `table[a] - table[b]`, or the first name the table lacks
pub fn symbol_delta(table: &SymbolTable, name_a: &str, name_b: &str) -> Result<i128, String> {
    let a = table.get(name_a).ok_or_else(|| name_a.to_string())?;
    let b = table.get(name_b).ok_or_else(|| name_b.to_string())?;
    Ok(a as i128 - b as i128)
}

/// Every `*.symbols` artifact directly inside `dir`, sorted
pub fn symbol_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(SYMBOLS_EXTENSION) && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Scan all symbol artifacts in `dir` for builds where
/// `name_a - name_b == target`. Artifacts lacking either name, or that
/// cannot be parsed, are skipped and reported.
pub fn find_by_delta(dir: &Path, name_a: &str, name_b: &str, target: i128) -> Result<DeltaReport> {
    let mut report = DeltaReport::default();

    for path in symbol_artifacts(dir)? {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        report.scanned += 1;

        let table = match SymbolTable::load(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!("{}: skipped: {:#}", path.display(), e);
                report.skipped.push(DeltaSkip {
                    id,
                    reason: SkipReason::Unreadable(format!("{:#}", e)),
                });
                continue;
            }
        };

        match symbol_delta(&table, name_a, name_b) {
            Ok(delta) if delta == target => report.matches.push(DeltaMatch { id, path, delta }),
            Ok(_) => {}
            Err(missing) => {
                warn!("{}: no symbol {}, skipped", path.display(), missing);
                report.skipped.push(DeltaSkip {
                    id,
                    reason: SkipReason::MissingSymbol(missing),
                });
            }
        }
    }

    Ok(report)
}
