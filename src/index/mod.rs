//! Build records and the stores that hold them.
//!
//! - [`build`] - walks a corpus directory and inserts one record per build
//! - [`store`] - the [`BuildStore`] capability
//! - [`terms`] - in-memory postings, [`MemoryStore`]
//! - [`disk`] - persistent [`DiskStore`]

pub mod build;
pub mod buildid;
pub mod digest;
pub mod disk;
pub mod stats;
pub mod store;
pub mod terms;
pub mod types;

pub use build::{build_index, IndexReport, Indexer};
pub use disk::DiskStore;
pub use store::BuildStore;
pub use terms::MemoryStore;
pub use types::*;
