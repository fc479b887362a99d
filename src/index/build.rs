use crate::index::buildid::{extractor_for, BuildIdExtractor};
use crate::index::digest::compute_digests;
use crate::index::disk::DiskStore;
use crate::index::store::BuildStore;
use crate::index::types::{unix_now, BuildRecord};
use crate::symbols::{encode_all, SymbolTable};
use crate::utils::progress::build_bar;
use crate::utils::{get_index_dir, AppConfig};
use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one pass over a corpus directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

/// What happened to a single candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Indexed,
    AlreadyPresent,
}

/// Inserts one record per candidate binary into a [`BuildStore`]
pub struct Indexer<'a> {
    store: &'a dyn BuildStore,
    extractor: &'a dyn BuildIdExtractor,
    binaries: GlobMatcher,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a dyn BuildStore,
        extractor: &'a dyn BuildIdExtractor,
        binary_glob: &str,
    ) -> Result<Self> {
        let binaries = Glob::new(binary_glob)
            .with_context(|| format!("Invalid binary glob {:?}", binary_glob))?
            .compile_matcher();
        Ok(Self {
            store,
            extractor,
            binaries,
        })
    }

    /// Candidate binaries directly inside `dir`, sorted by file name
    pub fn candidates(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .map(|name| self.binaries.is_match(Path::new(name)))
                .unwrap_or(false);
            if matches && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Index every candidate in `dir`. A bad build is logged and skipped;
    /// only failure to list the directory aborts the run.
    pub fn index_directory(&self, dir: &Path, silent: bool) -> Result<IndexReport> {
        let candidates = self.candidates(dir)?;
        let mut report = IndexReport::default();
        let bar = build_bar(candidates.len() as u64, silent);

        for path in &candidates {
            let Some(id) = build_id_for(path) else {
                warn!("{}: cannot derive a build id, skipping", path.display());
                report.failed += 1;
                continue;
            };

            if let Some(ref bar) = bar {
                bar.set_message(id.clone());
            }

            match self.index_one(dir, path, &id) {
                Ok(Outcome::Indexed) => {
                    info!("{}: indexed", id);
                    report.indexed += 1;
                }
                Ok(Outcome::AlreadyPresent) => {
                    info!("{}: already exists", id);
                    report.skipped_existing += 1;
                }
                Err(e) => {
                    warn!("{}: indexing failed: {:#}", id, e);
                    report.failed += 1;
                }
            }

            if let Some(ref bar) = bar {
                bar.inc(1);
            }
        }

        if let Some(bar) = bar {
            bar.finish_with_message(format!(
                "{} indexed, {} existing, {} failed",
                report.indexed, report.skipped_existing, report.failed
            ));
        }

        Ok(report)
    }

    fn index_one(&self, dir: &Path, path: &Path, id: &str) -> Result<Outcome> {
        if self.store.contains(id)? {
            return Ok(Outcome::AlreadyPresent);
        }

        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let digests = compute_digests(&bytes);
        let buildid = self.extractor.extract(path, &bytes);
        let table = SymbolTable::load_for(dir, id)?;

        let record = BuildRecord {
            id: id.to_string(),
            digests,
            buildid,
            symbols: encode_all(&table),
            timestamp: unix_now(),
        };

        if self.store.insert_if_absent(record)? {
            Ok(Outcome::Indexed)
        } else {
            Ok(Outcome::AlreadyPresent)
        }
    }
}

/// Build id of a binary: its file name without the last extension
pub fn build_id_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Index `dir` into the named on-disk index
pub fn build_index(
    config: &AppConfig,
    dir: &Path,
    index_name: &str,
    fresh: bool,
    silent: bool,
) -> Result<IndexReport> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Invalid corpus directory {}", dir.display()))?;
    let index_dir = get_index_dir(index_name)?;

    let store = if fresh {
        DiskStore::create_fresh(&index_dir, index_name)?
    } else {
        DiskStore::open(&index_dir, index_name)?
    };

    if !silent {
        println!("Indexing: {}", dir.display());
    }

    let extractor = extractor_for(config.build_id_source);
    let indexer = Indexer::new(&store, extractor.as_ref(), &config.binary_glob)?;
    let report = indexer.index_directory(&dir, silent)?;

    store.commit()?;

    if !silent {
        println!("Index stored at: {}", store.dir().display());
        if report.failed > 0 {
            eprintln!("({} builds could not be indexed)", report.failed);
        }
    }

    Ok(report)
}
