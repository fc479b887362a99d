//! Persistent build store.
//!
//! Layout of an index directory:
//!
//! - `meta.json` - [`IndexMeta`]
//! - `docs.jsonl` - one [`BuildRecord`] per line, append-only
//! - `terms.dict` / `terms.postings` - postings snapshot written by
//!   [`DiskStore::commit`]
//!
//! Records are appended and flushed as they are inserted, so an interrupted
//! indexing run keeps everything inserted so far. The snapshot only saves
//! re-tokenizing on open; when its doc count disagrees with `docs.jsonl` the
//! postings are rebuilt from the records.

use crate::index::store::BuildStore;
use crate::index::terms::{Postings, TermIndex};
use crate::index::types::{unix_now, BuildRecord, Field, IndexMeta, Predicate, INDEX_VERSION};
use crate::utils::{
    decode_doc_ids, encode_doc_ids, read_str, read_u32_le, read_u64_le, write_str, write_u32_le,
    write_u64_le,
};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const META_FILE: &str = "meta.json";
const DOCS_FILE: &str = "docs.jsonl";
const DICT_FILE: &str = "terms.dict";
const POSTINGS_FILE: &str = "terms.postings";
const DICT_MAGIC: &[u8; 4] = b"LCSI";

/// Dictionary tag of fingerprint terms; fields use [`Field::tag`]
const TERM_TAG: u8 = 0;

struct DiskState {
    index: TermIndex,
    meta: IndexMeta,
    docs: File,
    dirty: bool,
}

/// [`BuildStore`] persisted in an index directory
pub struct DiskStore {
    dir: PathBuf,
    state: RwLock<DiskState>,
}

impl DiskStore {
    /// Open the index in `dir`, creating an empty one if none exists
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory {}", dir.display()))?;

        let meta_path = dir.join(META_FILE);
        let meta = if meta_path.exists() {
            read_meta(&meta_path)?
        } else {
            let meta = IndexMeta::new(name, unix_now());
            write_meta(&meta_path, &meta)?;
            info!("Created index {} at {}", name, dir.display());
            meta
        };

        let docs_path = dir.join(DOCS_FILE);
        let records = read_records(&docs_path)?;
        let docs = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&docs_path)
            .with_context(|| format!("Failed to open {}", docs_path.display()))?;

        let index = match read_snapshot(dir, records.len() as u32) {
            Ok(Some(postings)) => {
                debug!("Loaded postings snapshot for {} builds", records.len());
                TermIndex::from_parts(records, postings)
            }
            Ok(None) => TermIndex::from_records(records),
            Err(e) => {
                warn!("Ignoring unreadable postings snapshot in {}: {:#}", dir.display(), e);
                TermIndex::from_records(records)
            }
        };

        let mut meta = meta;
        let dirty = meta.doc_count as usize != index.len();
        meta.doc_count = index.len() as u32;

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(DiskState {
                index,
                meta,
                docs,
                dirty,
            }),
        })
    }

    /// Open an index that must already exist
    pub fn open_existing(dir: &Path, name: &str) -> Result<Self> {
        if !dir.join(META_FILE).is_file() {
            bail!(
                "Index '{}' not found at {}; build it with `libcsearch index`",
                name,
                dir.display()
            );
        }
        Self::open(dir, name)
    }

    /// Drop whatever is in `dir` and start an empty index
    pub fn create_fresh(dir: &Path, name: &str) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
            info!("Removed existing index {}", name);
        }
        Self::open(dir, name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> Result<IndexMeta> {
        Ok(self.read()?.meta.clone())
    }

    /// Run `f` against the loaded term index under the read lock
    pub fn with_index<R>(&self, f: impl FnOnce(&TermIndex) -> R) -> Result<R> {
        Ok(f(&self.read()?.index))
    }

    /// Write meta.json and the postings snapshot if anything changed
    pub fn commit(&self) -> Result<()> {
        let mut state = self.write()?;
        if !state.dirty {
            return Ok(());
        }
        state.meta.updated_at = unix_now();
        state.meta.doc_count = state.index.len() as u32;

        write_snapshot(&self.dir, state.index.postings(), state.meta.doc_count)?;
        write_meta(&self.dir.join(META_FILE), &state.meta)?;
        state.dirty = false;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DiskState>> {
        self.state.read().map_err(|_| anyhow!("Index state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DiskState>> {
        self.state.write().map_err(|_| anyhow!("Index state lock poisoned"))
    }
}

impl BuildStore for DiskStore {
    fn insert_if_absent(&self, record: BuildRecord) -> Result<bool> {
        let mut state = self.write()?;
        if state.index.contains(&record.id) {
            return Ok(false);
        }

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        append_line(&mut state.docs, &line)
            .with_context(|| format!("Failed to append record {}", record.id))?;

        state.index.insert(record);
        state.meta.doc_count = state.index.len() as u32;
        state.dirty = true;
        Ok(true)
    }

    fn query_conjunction(&self, predicates: &[Predicate]) -> Result<Vec<BuildRecord>> {
        self.read()?.index.query(predicates)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<BuildRecord>> {
        Ok(self.read()?.index.get(id).cloned())
    }

    fn len(&self) -> usize {
        self.state.read().map(|s| s.index.len()).unwrap_or(0)
    }
}

/// Append-only record log that can be cut back to a previous length
trait RecordLog: Write {
    fn end(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl RecordLog for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole line or nothing. A partial write is cut off again so the
/// next append does not land behind a broken line.
fn append_line<L: RecordLog>(log: &mut L, line: &[u8]) -> io::Result<()> {
    let end = log.end()?;
    if let Err(e) = log.write_all(line).and_then(|_| log.flush()) {
        if let Err(cut) = log.truncate(end) {
            warn!("Failed to roll back partial record: {}", cut);
        }
        return Err(e);
    }
    Ok(())
}

fn read_meta(path: &Path) -> Result<IndexMeta> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let meta: IndexMeta = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if meta.version != INDEX_VERSION {
        bail!(
            "Index format version {} is not supported (expected {}); rebuild with --fresh",
            meta.version,
            INDEX_VERSION
        );
    }
    Ok(meta)
}

fn write_meta(path: &Path, meta: &IndexMeta) -> Result<()> {
    let content = serde_json::to_string_pretty(meta)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Load every record of `docs.jsonl`. A torn final line left by an
/// interrupted run is cut off; a malformed line anywhere else is an error.
fn read_records(path: &Path) -> Result<Vec<BuildRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        if line.trim().is_empty() {
            offset += read as u64;
            continue;
        }

        match serde_json::from_str::<BuildRecord>(&line) {
            Ok(record) => records.push(record),
            Err(_) if !line.ends_with('\n') => {
                warn!("Discarding torn record at end of {}", path.display());
                OpenOptions::new().write(true).open(path)?.set_len(offset)?;
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("{}:{}: corrupt record", path.display(), line_no));
            }
        }
        offset += read as u64;
    }

    Ok(records)
}

fn write_snapshot(dir: &Path, postings: &Postings, doc_count: u32) -> Result<()> {
    let mut entries: Vec<(u8, &str, &roaring::RoaringBitmap)> = postings
        .fields
        .iter()
        .map(|((field, value), docs)| (field.tag(), value.as_str(), docs))
        .chain(
            postings
                .terms
                .iter()
                .map(|(term, docs)| (TERM_TAG, term.as_str(), docs)),
        )
        .collect();
    entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut dict = BufWriter::new(File::create(dir.join(DICT_FILE))?);
    let mut postings_out = BufWriter::new(File::create(dir.join(POSTINGS_FILE))?);

    dict.write_all(DICT_MAGIC)?;
    write_u32_le(&mut dict, INDEX_VERSION)?;
    write_u32_le(&mut dict, doc_count)?;
    write_u32_le(&mut dict, entries.len() as u32)?;

    let mut offset = 0u64;
    let mut buf = Vec::new();
    for (tag, key, docs) in entries {
        buf.clear();
        encode_doc_ids(docs, &mut buf);
        postings_out.write_all(&buf)?;

        dict.write_all(&[tag])?;
        write_str(&mut dict, key)?;
        write_u64_le(&mut dict, offset)?;
        write_u32_le(&mut dict, buf.len() as u32)?;
        offset += buf.len() as u64;
    }

    dict.flush()?;
    postings_out.flush()?;
    Ok(())
}

/// Load the snapshot if present and consistent with `expected_docs`
fn read_snapshot(dir: &Path, expected_docs: u32) -> Result<Option<Postings>> {
    let dict_path = dir.join(DICT_FILE);
    let postings_path = dir.join(POSTINGS_FILE);
    if !dict_path.is_file() || !postings_path.is_file() {
        return Ok(None);
    }

    let mut dict = BufReader::new(File::open(&dict_path)?);
    let mut magic = [0u8; 4];
    dict.read_exact(&mut magic)?;
    if &magic != DICT_MAGIC {
        bail!("bad magic in {}", dict_path.display());
    }
    if read_u32_le(&mut dict)? != INDEX_VERSION {
        return Ok(None);
    }
    let doc_count = read_u32_le(&mut dict)?;
    if doc_count != expected_docs {
        debug!(
            "Postings snapshot covers {} builds, index has {}; rebuilding",
            doc_count, expected_docs
        );
        return Ok(None);
    }
    let entry_count = read_u32_le(&mut dict)?;

    let file = File::open(&postings_path)?;
    let mmap = if file.metadata()?.len() > 0 {
        Some(unsafe { Mmap::map(&file)? })
    } else {
        None
    };
    let data: &[u8] = mmap.as_deref().unwrap_or(&[]);

    let mut postings = Postings::default();
    for _ in 0..entry_count {
        let mut tag = [0u8; 1];
        dict.read_exact(&mut tag)?;
        let key = read_str(&mut dict)?;
        let start = read_u64_le(&mut dict)?;
        let len = read_u32_le(&mut dict)?;
        let end = start
            .checked_add(len as u64)
            .ok_or_else(|| anyhow!("postings range for {:?} overflows", key))?;
        let (start, end) = (usize::try_from(start)?, usize::try_from(end)?);

        let slice = data
            .get(start..end)
            .ok_or_else(|| anyhow!("postings for {:?} out of bounds", key))?;
        let docs = decode_doc_ids(slice).ok_or_else(|| anyhow!("corrupt postings for {:?}", key))?;

        if tag[0] == TERM_TAG {
            postings.terms.insert(key, docs);
        } else {
            let field = Field::from_tag(tag[0]).ok_or_else(|| anyhow!("unknown field tag {}", tag[0]))?;
            postings.fields.insert((field, key), docs);
        }
    }

    Ok(Some(postings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::terms::tests::record;

    fn term(t: &str) -> Vec<Predicate> {
        vec![Predicate::Term(t.to_string())]
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        {
            let store = DiskStore::open(&path, "idx").unwrap();
            assert!(store.insert_if_absent(record("A", "s1", Some("b1"), "system@410")).unwrap());
            assert!(store.insert_if_absent(record("B", "s2", None, "system@7a0")).unwrap());
            assert!(!store.insert_if_absent(record("A", "zz", None, "")).unwrap());
            // no commit: the snapshot is missing and postings get rebuilt
        }

        let store = DiskStore::open_existing(&path, "idx").unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_by_id("A").unwrap().unwrap().buildid.as_deref(), Some("b1"));
        let hits = store.query_conjunction(&term("system@7a0")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "B");
    }

    #[test]
    fn test_snapshot_used_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        {
            let store = DiskStore::open(&path, "idx").unwrap();
            store.insert_if_absent(record("A", "s1", Some("b1"), "system@410 puts@9c0")).unwrap();
            store.insert_if_absent(record("B", "s2", None, "system@410")).unwrap();
            store.commit().unwrap();
            assert_eq!(store.meta().unwrap().doc_count, 2);
        }
        assert!(path.join(DICT_FILE).exists());

        let postings = read_snapshot(&path, 2).unwrap().unwrap();
        assert_eq!(postings.terms["system@410"].len(), 2);
        assert!(read_snapshot(&path, 3).unwrap().is_none());

        let store = DiskStore::open(&path, "idx").unwrap();
        let hits = store
            .query_conjunction(&[
                Predicate::Term("system@410".into()),
                Predicate::equals(Field::BuildId, "b1"),
            ])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "A");
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        {
            let store = DiskStore::open(&path, "idx").unwrap();
            store.insert_if_absent(record("A", "s1", None, "x@001")).unwrap();
        }
        let mut docs = OpenOptions::new().append(true).open(path.join(DOCS_FILE)).unwrap();
        docs.write_all(b"{\"id\": \"B\", \"md5").unwrap();
        drop(docs);

        let store = DiskStore::open(&path, "idx").unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.insert_if_absent(record("B", "s2", None, "x@002")).unwrap());
        drop(store);

        let store = DiskStore::open(&path, "idx").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_fresh_drops_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        {
            let store = DiskStore::open(&path, "idx").unwrap();
            store.insert_if_absent(record("A", "s1", None, "x@001")).unwrap();
            store.commit().unwrap();
        }
        let store = DiskStore::create_fresh(&path, "idx").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_existing_requires_meta() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DiskStore::open_existing(&dir.path().join("nope"), "nope").is_err());
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        /// Accepts `budget` more bytes, then fails mid-write
        struct FlakyLog {
            data: Vec<u8>,
            budget: usize,
        }

        impl Write for FlakyLog {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.budget == 0 {
                    return Err(io::Error::other("disk full"));
                }
                let n = buf.len().min(self.budget);
                self.data.extend_from_slice(&buf[..n]);
                self.budget -= n;
                Ok(n)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        impl RecordLog for FlakyLog {
            fn end(&self) -> io::Result<u64> {
                Ok(self.data.len() as u64)
            }

            fn truncate(&mut self, len: u64) -> io::Result<()> {
                self.data.truncate(len as usize);
                Ok(())
            }
        }

        let mut log = FlakyLog {
            data: Vec::new(),
            budget: 8,
        };
        append_line(&mut log, b"{\"a\"}\n").unwrap();
        assert!(append_line(&mut log, b"{\"bbbbbbbb\"}\n").is_err());
        assert_eq!(log.data, b"{\"a\"}\n");

        log.budget = usize::MAX;
        append_line(&mut log, b"{\"c\"}\n").unwrap();
        assert_eq!(log.data, b"{\"a\"}\n{\"c\"}\n");
    }

    #[test]
    fn test_overflowing_snapshot_offsets_fall_back_to_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx");
        {
            let store = DiskStore::open(&path, "idx").unwrap();
            store.insert_if_absent(record("A", "s1", None, "system@410")).unwrap();
            store.commit().unwrap();
        }

        let mut dict = Vec::new();
        dict.extend_from_slice(DICT_MAGIC);
        write_u32_le(&mut dict, INDEX_VERSION).unwrap();
        write_u32_le(&mut dict, 1).unwrap();
        write_u32_le(&mut dict, 1).unwrap();
        dict.push(TERM_TAG);
        write_str(&mut dict, "system@410").unwrap();
        write_u64_le(&mut dict, u64::MAX).unwrap();
        write_u32_le(&mut dict, 16).unwrap();
        fs::write(path.join(DICT_FILE), dict).unwrap();

        assert!(read_snapshot(&path, 1).is_err());

        let store = DiskStore::open_existing(&path, "idx").unwrap();
        let hits = store.query_conjunction(&term("system@410")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "A");
    }
}
