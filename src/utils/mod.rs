//! Shared helpers.
//!
//! - [`app_data`] - configuration and per-user data directories
//! - [`encoding`] - varint codecs for the postings snapshot
//! - [`progress`] - progress bars, no-ops without the `progress` feature

pub mod app_data;
pub mod encoding;
pub mod progress;

pub use app_data::*;
pub use encoding::*;
