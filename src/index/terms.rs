//! In-memory term index over build records.
//!
//! Every exact-match field value and every fingerprint term maps to a
//! `RoaringBitmap` of doc ids. A conjunction is the intersection of the
//! bitmaps, smallest first.

use crate::index::store::BuildStore;
use crate::index::types::{BuildRecord, DocId, Field, Predicate};
use ahash::AHashMap;
use anyhow::{bail, Result};
use roaring::RoaringBitmap;
use std::sync::RwLock;

/// Postings keyed by what a predicate can ask for
#[derive(Debug, Default, Clone)]
pub struct Postings {
    pub fields: AHashMap<(Field, String), RoaringBitmap>,
    pub terms: AHashMap<String, RoaringBitmap>,
}

impl Postings {
    fn add(&mut self, doc_id: DocId, record: &BuildRecord) {
        for field in Field::ALL {
            if let Some(value) = record.field(field) {
                self.fields
                    .entry((field, value.to_string()))
                    .or_default()
                    .insert(doc_id);
            }
        }
        for term in record.terms() {
            self.terms.entry(term.to_string()).or_default().insert(doc_id);
        }
    }

    fn lookup(&self, predicate: &Predicate) -> Option<&RoaringBitmap> {
        match predicate {
            Predicate::Equals { field, value } => self.fields.get(&(*field, value.clone())),
            Predicate::Term(term) => self.terms.get(term),
        }
    }
}

/// Records plus their postings. Not synchronized; see [`MemoryStore`].
#[derive(Debug, Default)]
pub struct TermIndex {
    records: Vec<BuildRecord>,
    by_id: AHashMap<String, DocId>,
    postings: Postings,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild postings from a list of records
    pub fn from_records(records: Vec<BuildRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Reassemble an index from records and previously computed postings
    pub fn from_parts(records: Vec<BuildRecord>, postings: Postings) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i as DocId))
            .collect();
        Self {
            records,
            by_id,
            postings,
        }
    }

    /// Insert a record if its id is new. Returns the assigned doc id.
    pub fn insert(&mut self, record: BuildRecord) -> Option<DocId> {
        if self.by_id.contains_key(&record.id) {
            return None;
        }
        let doc_id = self.records.len() as DocId;
        self.postings.add(doc_id, &record);
        self.by_id.insert(record.id.clone(), doc_id);
        self.records.push(record);
        Some(doc_id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&BuildRecord> {
        self.by_id.get(id).map(|&doc| &self.records[doc as usize])
    }

    /// Doc ids matching every predicate
    pub fn matching_docs(&self, predicates: &[Predicate]) -> Result<RoaringBitmap> {
        if predicates.is_empty() {
            bail!("Refusing to run a conjunction with no predicates");
        }

        let mut bitmaps = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match self.postings.lookup(predicate) {
                Some(bitmap) => bitmaps.push(bitmap),
                None => return Ok(RoaringBitmap::new()),
            }
        }
        bitmaps.sort_by_key(|b| b.len());

        let mut result = bitmaps[0].clone();
        for bitmap in &bitmaps[1..] {
            if result.is_empty() {
                break;
            }
            result &= *bitmap;
        }
        Ok(result)
    }

    pub fn query(&self, predicates: &[Predicate]) -> Result<Vec<BuildRecord>> {
        let docs = self.matching_docs(predicates)?;
        Ok(docs
            .iter()
            .map(|doc| self.records[doc as usize].clone())
            .collect())
    }

    pub fn records(&self) -> &[BuildRecord] {
        &self.records
    }

    pub fn postings(&self) -> &Postings {
        &self.postings
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Non-persistent [`BuildStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<TermIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildStore for MemoryStore {
    fn insert_if_absent(&self, record: BuildRecord) -> Result<bool> {
        let mut index = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Term index lock poisoned"))?;
        Ok(index.insert(record).is_some())
    }

    fn query_conjunction(&self, predicates: &[Predicate]) -> Result<Vec<BuildRecord>> {
        let index = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Term index lock poisoned"))?;
        index.query(predicates)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<BuildRecord>> {
        let index = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Term index lock poisoned"))?;
        Ok(index.get(id).cloned())
    }

    fn len(&self) -> usize {
        self.inner.read().map(|index| index.len()).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::types::Digests;

    pub(crate) fn record(id: &str, sha1: &str, buildid: Option<&str>, symbols: &str) -> BuildRecord {
        BuildRecord {
            id: id.to_string(),
            digests: Digests {
                md5: format!("md5-{}", id),
                sha1: sha1.to_string(),
                sha256: format!("sha256-{}", id),
            },
            buildid: buildid.map(str::to_string),
            symbols: symbols.to_string(),
            timestamp: 0,
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_if_absent(record("A", "s1", Some("b1"), "system@410 puts@9c0"))
            .unwrap();
        store
            .insert_if_absent(record("B", "s2", Some("b2"), "system@410 puts@a00"))
            .unwrap();
        store
            .insert_if_absent(record("C", "s3", None, "system@7a0"))
            .unwrap();
        store
    }

    fn ids(records: Vec<BuildRecord>) -> Vec<String> {
        records.into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_insert_once() {
        let store = store();
        assert_eq!(store.len(), 3);
        let dup = record("A", "other", None, "x@000");
        assert!(!store.insert_if_absent(dup).unwrap());
        assert_eq!(store.len(), 3);
        assert_eq!(store.get_by_id("A").unwrap().unwrap().digests.sha1, "s1");
    }

    #[test]
    fn test_term_query() {
        let store = store();
        let hits = store
            .query_conjunction(&[Predicate::Term("system@410".into())])
            .unwrap();
        assert_eq!(ids(hits), vec!["A", "B"]);
    }

    #[test]
    fn test_conjunction() {
        let store = store();
        let hits = store
            .query_conjunction(&[
                Predicate::Term("system@410".into()),
                Predicate::Term("puts@a00".into()),
            ])
            .unwrap();
        assert_eq!(ids(hits), vec!["B"]);

        // hash of A with build id of B
        let hits = store
            .query_conjunction(&[
                Predicate::equals(Field::Sha1, "s1"),
                Predicate::equals(Field::BuildId, "b2"),
            ])
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_unknown_term_matches_nothing() {
        let store = store();
        let hits = store
            .query_conjunction(&[
                Predicate::Term("system@410".into()),
                Predicate::Term("nope@000".into()),
            ])
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_empty_conjunction_rejected() {
        assert!(store().query_conjunction(&[]).is_err());
    }

    #[test]
    fn test_from_parts_matches_rebuild() {
        let store = store();
        let index = store.inner.read().unwrap();
        let rebuilt = TermIndex::from_parts(index.records().to_vec(), index.postings().clone());
        assert_eq!(rebuilt.get("C").unwrap().id, "C");
        let hits = rebuilt.query(&[Predicate::Term("system@7a0".into())]).unwrap();
        assert_eq!(ids(hits), vec!["C"]);
    }
}
