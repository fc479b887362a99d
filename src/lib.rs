//! # libcsearch - shared library build identification
//!
//! Given partial knowledge about a library build (content hashes, an ELF
//! build identifier, or a handful of leaked runtime addresses of named
//! symbols), find the exact builds it can be and report where their other
//! symbols live.
//!
//! Runtime addresses are randomized by the load base, but the base is page
//! aligned, so the low 12 bits of every symbol address survive. Each build
//! is indexed as a bag of `name@offset` terms over those bits and a leak
//! matches by term equality.
//!
//! ## Architecture
//!
//! - [`symbols`] - `.symbols` artifact parsing and fingerprint terms
//! - [`index`] - build indexing and the [`index::BuildStore`] backends
//! - [`query`] - find / dump over a store with an LRU of symbol tables
//! - [`delta`] - index-free scan for a known distance between two symbols
//! - [`server`] - daemon keeping a matcher warm behind a Unix socket
//! - [`output`] - terminal formatting
//! - [`utils`] - configuration, data directories, encoding helpers
//!
//! ## Quick Start
//!
//! ```ignore
//! use libcsearch::index::{MemoryStore, Indexer};
//! use libcsearch::index::buildid::ObjectBuildId;
//! use libcsearch::query::{FindRequest, Matcher};
//! use libcsearch::utils::AppConfig;
//! use std::sync::Arc;
//!
//! let config = AppConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! Indexer::new(&*store, &ObjectBuildId, "*.so")?
//!     .index_directory(&config.db_dir, true)?;
//!
//! let mut request = FindRequest::default();
//! request.symbols.insert("system".into(), "0x7f3c2a6457a0".into());
//! for result in Matcher::new(store, &config).find(&request)? {
//!     println!("{} {}", result.id, result.download_url);
//! }
//! ```

pub mod delta;
pub mod index;
pub mod output;
pub mod query;
pub mod server;
pub mod symbols;
pub mod utils;
