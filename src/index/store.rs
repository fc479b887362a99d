//! Storage capability the indexer and matcher are written against.
//!
//! Only exact-match and conjunction semantics are required. Any store that
//! can insert a record once per id, AND together exact predicates and fetch
//! by id will do.

use crate::index::types::{BuildRecord, Predicate};
use anyhow::Result;

pub trait BuildStore: Send + Sync {
    /// Insert `record` unless a record with the same id exists.
    /// Returns `true` if the record was inserted.
    fn insert_if_absent(&self, record: BuildRecord) -> Result<bool>;

    /// Records satisfying every predicate, in store order.
    /// An empty predicate list is an error, never "match all".
    fn query_conjunction(&self, predicates: &[Predicate]) -> Result<Vec<BuildRecord>>;

    fn get_by_id(&self, id: &str) -> Result<Option<BuildRecord>>;

    fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get_by_id(id)?.is_some())
    }

    /// Number of stored records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
