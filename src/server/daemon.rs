//! Unix index server daemon
//!
//! Keeps one index and its symbol cache loaded and serves find / dump
//! requests over a Unix socket. A `Reload` request swaps in a freshly
//! opened copy of the on-disk index after an indexing run.

use crate::index::DiskStore;
use crate::query::{Matcher, QueryError};
use crate::server::protocol::{
    read_message, write_message, Problem, Request, Response, StatusResponse,
};
use crate::server::{get_pid_path, get_socket_path};
use crate::utils::{get_index_dir, AppConfig};
use anyhow::{Context, Result};
use log::{debug, error, info};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    queries_served: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
        }
    }
}

/// The index server daemon
pub struct IndexServer {
    matcher: RwLock<Arc<Matcher>>,
    /// On-disk location reopened by `Reload`; `None` for in-memory stores
    index_dir: Option<PathBuf>,
    index_name: String,
    stats: ServerStats,
    shutdown: AtomicBool,
}

impl IndexServer {
    /// Serve an already constructed matcher
    pub fn new(matcher: Matcher, index_name: &str) -> Arc<Self> {
        Self::build(matcher, None, index_name)
    }

    fn build(matcher: Matcher, index_dir: Option<PathBuf>, index_name: &str) -> Arc<Self> {
        Arc::new(Self {
            matcher: RwLock::new(Arc::new(matcher)),
            index_dir,
            index_name: index_name.to_string(),
            stats: ServerStats::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Load the named on-disk index with the configured symbol directory
    pub fn open(config: &AppConfig, index_name: &str) -> Result<Arc<Self>> {
        Self::open_dir(config, &get_index_dir(index_name)?, index_name)
    }

    /// Load the index stored in `index_dir`
    pub fn open_dir(config: &AppConfig, index_dir: &Path, index_name: &str) -> Result<Arc<Self>> {
        let matcher = load_matcher(config, index_dir, index_name)?;
        Ok(Self::build(matcher, Some(index_dir.to_path_buf()), index_name))
    }

    /// The matcher currently serving requests
    fn matcher(&self) -> Arc<Matcher> {
        match self.matcher.read() {
            Ok(matcher) => Arc::clone(&*matcher),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Start the server on the per-user socket (blocking)
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let socket_path = get_socket_path();
        let pid_path = get_pid_path();

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        fs::write(&pid_path, format!("{}", std::process::id()))?;

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind to {}", socket_path.display()))?;

        // Set socket permissions (user only)
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o600))?;
        }

        let result = self.serve(listener, &socket_path);

        let _ = fs::remove_file(&socket_path);
        let _ = fs::remove_file(&pid_path);

        result
    }

    /// Accept connections on `listener` until a shutdown request arrives
    pub fn serve(self: &Arc<Self>, listener: UnixListener, socket_path: &Path) -> Result<()> {
        info!("listening on {}", socket_path.display());

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    let wake_path = socket_path.to_path_buf();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream, &wake_path) {
                            error!("connection error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }

        info!("shutting down");
        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: UnixStream, socket_path: &Path) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    let resp = Response::Problem(Problem::bad_request(format!(
                        "Invalid request: {}",
                        e
                    )));
                    write_message(&mut writer, &resp)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let response = self.handle_request(request);
            write_message(&mut writer, &response)?;

            if matches!(response, Response::ShuttingDown) {
                // Unblock the accept loop so it can see the flag
                let _ = UnixStream::connect(socket_path);
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    pub(crate) fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Find(find) => {
                self.stats.queries_served.fetch_add(1, Ordering::Relaxed);
                match self.matcher().find(&find) {
                    Ok(results) => Response::Matches { results },
                    Err(e) => self.problem(e),
                }
            }

            Request::Dump { id, symbols } => {
                self.stats.queries_served.fetch_add(1, Ordering::Relaxed);
                match self.matcher().dump(&id, &symbols) {
                    Ok(result) => Response::Match { result },
                    Err(e) => self.problem(e),
                }
            }

            Request::Status => self.handle_status(),

            Request::Reload => self.handle_reload(),

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::ShuttingDown
            }

            Request::Ping => Response::Pong,
        }
    }

    fn problem(&self, err: QueryError) -> Response {
        if err.is_client_error() {
            debug!("rejected request: {}", err);
        } else {
            error!("request failed: {:#}", err);
        }
        Response::Problem(Problem::from(&err))
    }

    /// Reopen the index and swap it in. In-flight requests finish on the
    /// matcher they started with.
    fn handle_reload(&self) -> Response {
        let Some(index_dir) = &self.index_dir else {
            return Response::Problem(Problem::bad_request("index is not backed by disk"));
        };

        let config = self.matcher().config().clone();
        match load_matcher(&config, index_dir, &self.index_name) {
            Ok(matcher) => {
                let builds = matcher.store().len();
                let matcher = Arc::new(matcher);
                match self.matcher.write() {
                    Ok(mut current) => *current = matcher,
                    Err(poisoned) => *poisoned.into_inner() = matcher,
                }
                info!("reloaded index {} ({} builds)", self.index_name, builds);
                Response::Reloaded { builds }
            }
            Err(e) => {
                error!("reload of {} failed: {:#}", self.index_name, e);
                Response::Problem(Problem::internal(format!("Failed to reload: {:#}", e)))
            }
        }
    }

    fn handle_status(&self) -> Response {
        let matcher = self.matcher();
        let cache = matcher.cache();
        Response::Status(StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            index_name: self.index_name.clone(),
            builds_indexed: matcher.store().len(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            cache_hit_rate: cache.hit_rate(),
            cached_tables: cache.len(),
        })
    }
}

fn load_matcher(config: &AppConfig, index_dir: &Path, index_name: &str) -> Result<Matcher> {
    let store = DiskStore::open_existing(index_dir, index_name)?;
    info!("loaded index {} ({} builds)", index_name, store.meta()?.doc_count);
    Ok(Matcher::new(Arc::new(store), config))
}

/// Daemonize the current process and serve `index_name`.
///
/// The index is loaded before forking so a missing index is reported to
/// the caller instead of vanishing with the daemon's closed stderr.
pub fn daemonize(config: &AppConfig, index_name: &str) -> Result<()> {
    let server = IndexServer::open(config, index_name)?;

    // Double fork so the daemon never reacquires a controlling terminal
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("First fork failed"),
        0 => {
            // From here on this is the child: never return into the CLI
            if unsafe { libc::setsid() } == -1 {
                child_exit_with_error(&format!("setsid failed: {}", std::io::Error::last_os_error()));
            }

            match unsafe { libc::fork() } {
                -1 => child_exit_with_error(&format!(
                    "Second fork failed: {}",
                    std::io::Error::last_os_error()
                )),
                0 => {
                    unsafe {
                        libc::close(0);
                        libc::close(1);
                        libc::close(2);

                        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
                        if null != -1 {
                            libc::dup2(null, 0);
                            libc::dup2(null, 1);
                            libc::dup2(null, 2);
                            if null > 2 {
                                libc::close(null);
                            }
                        }
                    }

                    // Avoid holding mounts
                    let _ = std::env::set_current_dir("/");

                    if let Err(e) = server.run() {
                        child_exit_with_error(&format!("{:#}", e));
                    }
                    std::process::exit(0);
                }
                _ => std::process::exit(0),
            }
        }
        _ => {
            // Parent waits for the first child, then returns
            unsafe {
                let mut status: libc::c_int = 0;
                libc::wait(&mut status);
            }
            Ok(())
        }
    }
}

/// Where a forked daemon records why it died
pub fn daemon_error_log_path() -> PathBuf {
    std::env::temp_dir().join("libcsearch-daemon-error.log")
}

fn child_exit_with_error(message: &str) -> ! {
    exit_with_error(&daemon_error_log_path(), message)
}

fn exit_with_error(log_path: &Path, message: &str) -> ! {
    let _ = fs::write(log_path, message);
    std::process::exit(1);
}

/// Start the daemon in foreground (for debugging)
pub fn run_foreground(config: &AppConfig, index_name: &str) -> Result<()> {
    let server = IndexServer::open(config, index_name)?;
    server.run()
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<bool> {
    let pid_path = get_pid_path();

    if !pid_path.exists() {
        return Ok(false);
    }

    let pid_str = fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str
        .trim()
        .parse()
        .with_context(|| format!("Corrupt PID file {}", pid_path.display()))?;

    unsafe {
        if libc::kill(pid, libc::SIGTERM) == 0 {
            thread::sleep(Duration::from_millis(500));

            // Still alive: give it a second, then SIGKILL
            if libc::kill(pid, 0) == 0 {
                thread::sleep(Duration::from_secs(1));
                if libc::kill(pid, 0) == 0 {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }
    }

    let _ = fs::remove_file(get_socket_path());
    let _ = fs::remove_file(&pid_path);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::{BuildRecord, Digests};
    use crate::index::{BuildStore, MemoryStore};
    use crate::query::FindRequest;
    use crate::server::IndexClient;
    use crate::symbols::{encode_all, SymbolTable};

    fn record(dir: &Path, id: &str, symbols: &str) -> BuildRecord {
        fs::write(dir.join(format!("{}.symbols", id)), symbols).unwrap();
        BuildRecord {
            id: id.into(),
            digests: Digests {
                md5: "m".into(),
                sha1: id.to_lowercase(),
                sha256: "h".into(),
            },
            buildid: None,
            symbols: encode_all(&SymbolTable::parse(symbols).unwrap()),
            timestamp: 0,
        }
    }

    fn config(dir: &Path) -> AppConfig {
        AppConfig {
            db_dir: dir.to_path_buf(),
            default_symbols: vec!["system".into()],
            ..AppConfig::default()
        }
    }

    fn server(dir: &Path) -> Arc<IndexServer> {
        let store = MemoryStore::new();
        store
            .insert_if_absent(record(dir, "libc-A", "system 000000000004f440\nputs 00000000000809c0\n"))
            .unwrap();
        IndexServer::new(Matcher::new(Arc::new(store), &config(dir)), "test")
    }

    fn found_ids(server: &IndexServer, id: &str) -> Vec<String> {
        let find = FindRequest {
            sha1: Some(id.into()),
            ..FindRequest::default()
        };
        match server.handle_request(Request::Find(find)) {
            Response::Matches { results } => results.into_iter().map(|r| r.id).collect(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_handle_find_and_problem() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let mut find = FindRequest::default();
        find.symbols.insert("puts".into(), "0x7fabcd0809c0".into());
        match server.handle_request(Request::Find(find)) {
            Response::Matches { results } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].symbols["puts"], "0x809c0");
            }
            other => panic!("unexpected {:?}", other),
        }

        match server.handle_request(Request::Find(FindRequest::default())) {
            Response::Problem(p) => assert_eq!(p.status, 400),
            other => panic!("unexpected {:?}", other),
        }

        match server.handle_request(Request::Dump {
            id: "nope".into(),
            symbols: vec![],
        }) {
            Response::Problem(p) => assert_eq!(p.status, 404),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_counts_queries() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        server.handle_request(Request::Dump {
            id: "libc-A".into(),
            symbols: vec![],
        });
        match server.handle_request(Request::Status) {
            Response::Status(status) => {
                assert_eq!(status.index_name, "test");
                assert_eq!(status.builds_indexed, 1);
                assert_eq!(status.queries_served, 1);
                assert_eq!(status.cached_tables, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_serve_over_socket_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let server = server(dir.path());

        let handle = {
            let server = Arc::clone(&server);
            let socket_path = socket_path.clone();
            thread::spawn(move || server.serve(listener, &socket_path))
        };

        let mut client = IndexClient::connect_to(&socket_path).unwrap();
        client.ping().unwrap();
        let result = client.dump("libc-A", &["puts".to_string()]).unwrap();
        assert_eq!(result.symbols["puts"], "0x809c0");
        assert_eq!(result.symbols["system"], "0x4f440");
        client.shutdown().unwrap();

        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_reload_picks_up_later_indexing() {
        let corpus = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let index_dir = data.path().join("default");
        {
            let store = DiskStore::open(&index_dir, "default").unwrap();
            store.insert_if_absent(record(corpus.path(), "libc-A", "system 4f440\n")).unwrap();
            store.commit().unwrap();
        }

        let server = IndexServer::open_dir(&config(corpus.path()), &index_dir, "default").unwrap();
        assert!(found_ids(&server, "libc-B").is_empty());

        // A separate indexing run appends a build
        {
            let store = DiskStore::open_existing(&index_dir, "default").unwrap();
            store.insert_if_absent(record(corpus.path(), "libc-B", "system 457a0\n")).unwrap();
            store.commit().unwrap();
        }
        assert!(found_ids(&server, "libc-B").is_empty());

        match server.handle_request(Request::Reload) {
            Response::Reloaded { builds } => assert_eq!(builds, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(found_ids(&server, "libc-B"), vec!["libc-B"]);

        // A fresh rebuild drops builds the daemon still had
        {
            let store = DiskStore::create_fresh(&index_dir, "default").unwrap();
            store.insert_if_absent(record(corpus.path(), "libc-C", "system 1a0\n")).unwrap();
            store.commit().unwrap();
        }
        match server.handle_request(Request::Reload) {
            Response::Reloaded { builds } => assert_eq!(builds, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(found_ids(&server, "libc-A").is_empty());
        assert_eq!(found_ids(&server, "libc-C"), vec!["libc-C"]);
        match server.handle_request(Request::Status) {
            Response::Status(status) => assert_eq!(status.builds_indexed, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reload_without_disk_index() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        match server.handle_request(Request::Reload) {
            Response::Problem(p) => assert_eq!(p.status, 400),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_forked_child_exits_instead_of_returning() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("daemon-error.log");

        match unsafe { libc::fork() } {
            -1 => panic!("fork failed"),
            0 => exit_with_error(&log_path, "setsid failed"),
            pid => {
                let mut status: libc::c_int = 0;
                assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
                assert!(libc::WIFEXITED(status));
                assert_eq!(libc::WEXITSTATUS(status), 1);
            }
        }
        assert_eq!(fs::read_to_string(&log_path).unwrap(), "setsid failed");
    }
}
