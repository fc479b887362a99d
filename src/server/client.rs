//! Client for connecting to the index server daemon

use crate::query::{FindRequest, MatchResult};
use crate::server::get_socket_path;
use crate::server::protocol::{
    read_message, write_message, Problem, Request, Response, StatusResponse,
};
use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Index server is not running")]
    NotRunning,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The server answered with a structured failure
    #[error("{0}")]
    Problem(Problem),
    #[error("Invalid response from server")]
    InvalidResponse,
}

/// Client for the index server
pub struct IndexClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
}

impl IndexClient {
    /// Try to connect to the running daemon.
    /// Returns None if it is not running, so callers can fall back to
    /// opening the index directly.
    pub fn connect() -> Option<Self> {
        Self::connect_to(&get_socket_path())
    }

    /// Connect to a server listening on `socket_path`
    pub fn connect_to(socket_path: &Path) -> Option<Self> {
        if !socket_path.exists() {
            return None;
        }

        let stream = UnixStream::connect(socket_path).ok()?;
        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let reader = BufReader::new(stream.try_clone().ok()?);
        let writer = BufWriter::new(stream);

        Some(Self { reader, writer })
    }

    /// Connect or return an error (for when daemon is required)
    pub fn connect_required() -> ClientResult<Self> {
        Self::connect().ok_or(ClientError::NotRunning)
    }

    fn call(&mut self, request: &Request) -> ClientResult<Response> {
        write_message(&mut self.writer, request)?;
        match read_message(&mut self.reader)? {
            Response::Problem(problem) => Err(ClientError::Problem(problem)),
            response => Ok(response),
        }
    }

    /// Match builds on the server
    pub fn find(&mut self, request: &FindRequest) -> ClientResult<Vec<MatchResult>> {
        match self.call(&Request::Find(request.clone()))? {
            Response::Matches { results } => Ok(results),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Fetch one build by id
    pub fn dump(&mut self, id: &str, symbols: &[String]) -> ClientResult<MatchResult> {
        let request = Request::Dump {
            id: id.to_string(),
            symbols: symbols.to_vec(),
        };
        match self.call(&request)? {
            Response::Match { result } => Ok(result),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Get server status
    pub fn status(&mut self) -> ClientResult<StatusResponse> {
        match self.call(&Request::Status)? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ask the server to reopen its index; returns the build count
    pub fn reload(&mut self) -> ClientResult<usize> {
        match self.call(&Request::Reload)? {
            Response::Reloaded { builds } => Ok(builds),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Request graceful shutdown
    pub fn shutdown(&mut self) -> ClientResult<()> {
        match self.call(&Request::Shutdown)? {
            Response::ShuttingDown => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }

    /// Ping the server
    pub fn ping(&mut self) -> ClientResult<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            _ => Err(ClientError::InvalidResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_to_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IndexClient::connect_to(&dir.path().join("absent.sock")).is_none());
    }

    #[test]
    fn test_problem_error_message() {
        let err = ClientError::Problem(Problem::bad_request("must provide at least one filter"));
        assert_eq!(
            err.to_string(),
            "Bad request (400): must provide at least one filter"
        );
    }
}
