//! Query side: turning partial knowledge about a build into store
//! predicates and resolving symbols for every hit.
//!
//! - [`request`] - wire shapes, [`Query`] construction, [`QueryError`]
//! - [`cache`] - bounded LRU of loaded symbol tables
//! - [`matcher`] - `find` / `dump`

pub mod cache;
pub mod matcher;
pub mod request;

pub use cache::SymbolCache;
pub use matcher::Matcher;
pub use request::{FindRequest, MatchResult, Query, QueryError};
