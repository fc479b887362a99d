//! Protocol messages for client-server communication
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::query::{FindRequest, MatchResult, QueryError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest message either side will accept
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Match builds against hashes and/or leaked symbol addresses
    Find(FindRequest),

    /// Fetch one build by id
    Dump {
        id: String,
        #[serde(default)]
        symbols: Vec<String>,
    },

    /// Check server health and get stats
    Status,

    /// Reopen the on-disk index after an indexing run
    Reload,

    /// Graceful shutdown request
    Shutdown,

    /// Ping for connection testing
    Ping,
}

/// Response from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Results of a find
    Matches { results: Vec<MatchResult> },

    /// Result of a dump
    Match { result: MatchResult },

    /// Server status
    Status(StatusResponse),

    /// Index reopened
    Reloaded { builds: usize },

    /// The request failed
    Problem(Problem),

    /// Shutdown acknowledged
    ShuttingDown,

    /// Pong response
    Pong,
}

/// Structured failure: status code, short title, explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub status: u16,
    pub title: String,
    pub detail: String,
}

impl Problem {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: 400,
            title: "Bad request".to_string(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: 500,
            title: "Internal error".to_string(),
            detail: detail.into(),
        }
    }
}

impl From<&QueryError> for Problem {
    fn from(err: &QueryError) -> Self {
        Self {
            status: err.status(),
            title: err.title().to_string(),
            detail: err.to_string(),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.status, self.detail)
    }
}

/// Server status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Name of the index being served
    pub index_name: String,
    /// Builds in the index
    pub builds_indexed: usize,
    /// Total queries served
    pub queries_served: u64,
    /// Symbol table cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f32,
    /// Symbol tables currently cached
    pub cached_tables: usize,
}

/// Write a message to a stream with length prefix
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })?;

    if json.len() > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    serde_json::from_slice(&buf).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })
}
