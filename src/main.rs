use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use libcsearch::delta::{find_by_delta, parse_delta};
use libcsearch::index::{build_index, stats, DiskStore};
use libcsearch::output;
use libcsearch::query::{FindRequest, MatchResult, Matcher};
use libcsearch::server::{self, get_socket_path, is_daemon_running, ClientError, IndexClient};
use libcsearch::utils::{get_config_path, get_index_dir, AppConfig};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "libcsearch")]
#[command(about = "Identify shared library builds from leaked symbol addresses or hashes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Corpus directory of <id>.so / <id>.symbols pairs
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Index name
    #[arg(long, global = true)]
    index: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every build in a corpus directory
    Index {
        /// Corpus directory (defaults to the configured db dir)
        dir: Option<PathBuf>,

        /// Drop the existing index first
        #[arg(long)]
        fresh: bool,

        /// No progress output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Find builds matching hashes and/or leaked symbol addresses
    Find {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        md5: Option<String>,
        #[arg(long)]
        sha1: Option<String>,
        #[arg(long)]
        sha256: Option<String>,
        #[arg(long)]
        buildid: Option<String>,

        /// Leaked address, as name=addr (hex)
        #[arg(short, long = "symbol", value_name = "NAME=ADDR", value_parser = parse_symbol_pair)]
        symbols: Vec<(String, String)>,

        /// Extra symbol to resolve in the results
        #[arg(long, value_name = "NAME")]
        show: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one build and resolve symbols in it
    Dump {
        id: String,

        /// Symbols to resolve besides the defaults
        names: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan symbol files for builds where a - b equals a given delta
    Delta {
        a: String,
        b: String,

        /// Hex delta, e.g. 0x230 or -0x10
        #[arg(allow_hyphen_values = true)]
        delta: String,
    },
    /// Show index statistics
    Stats,
    /// List all indexes
    List,
    /// Show the configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
    /// Manage the matcher daemon (keeps the index and symbol cache warm)
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Reopen the index in the running daemon
    Reload,
    /// Run daemon in foreground (for debugging)
    Foreground,
}

fn parse_symbol_pair(s: &str) -> Result<(String, String), String> {
    let (name, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=ADDR, got {:?}", s))?;
    if name.is_empty() || addr.is_empty() {
        return Err(format!("expected NAME=ADDR, got {:?}", s));
    }
    Ok((name.to_string(), addr.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let mut config = AppConfig::load()?;
    // The daemon serves the configured index only
    let overridden = cli.db.is_some() || cli.index.is_some();
    if let Some(db) = cli.db {
        config.db_dir = db;
    }
    if let Some(index) = cli.index {
        config.index_name = index;
    }
    let color = !cli.no_color;

    match cli.command {
        Commands::Index { dir, fresh, quiet } => {
            let dir = dir.unwrap_or_else(|| config.db_dir.clone());
            let report = build_index(&config, &dir, &config.index_name, fresh, quiet)?;
            if !quiet {
                println!(
                    "{} indexed, {} already present, {} failed",
                    report.indexed, report.skipped_existing, report.failed
                );
            }
            reload_daemon_serving(&config.index_name);
        }
        Commands::Find {
            id,
            md5,
            sha1,
            sha256,
            buildid,
            symbols,
            show,
            json,
        } => {
            let request = FindRequest {
                id,
                md5,
                sha1,
                sha256,
                buildid,
                symbols: symbols.into_iter().collect(),
                extra_symbols: show,
            };
            let results = run_find(&config, &request, !overridden)?;
            if json {
                output::print_json(&results)?;
            } else if results.is_empty() {
                eprintln!("No matching builds");
            } else {
                output::print_matches(&results, color)?;
            }
        }
        Commands::Dump { id, names, json } => {
            let result = run_dump(&config, &id, &names, !overridden)?;
            if json {
                output::print_json(&result)?;
            } else {
                output::print_matches(std::slice::from_ref(&result), color)?;
            }
        }
        Commands::Delta { a, b, delta } => {
            let target = parse_delta(&delta)?;
            let report = find_by_delta(&config.db_dir, &a, &b, target)?;
            output::print_delta(&a, &b, target, &report, color)?;
            if !report.skipped.is_empty() {
                eprintln!(
                    "({} of {} symbol files skipped)",
                    report.skipped.len(),
                    report.scanned
                );
            }
        }
        Commands::Stats => {
            stats::show_stats(&config.index_name)?;
        }
        Commands::List => {
            stats::print_indexes()?;
        }
        Commands::Config { init } => {
            if init {
                config.save()?;
                println!("Wrote {}", get_config_path()?.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Daemon { action } => {
            handle_daemon_command(action, &config)?;
        }
    }

    Ok(())
}

/// Matcher over the configured on-disk index
fn local_matcher(config: &AppConfig) -> Result<Matcher> {
    let index_dir = get_index_dir(&config.index_name)?;
    let store = DiskStore::open_existing(&index_dir, &config.index_name)?;
    Ok(Matcher::new(Arc::new(store), config))
}

fn daemon_client(use_daemon: bool) -> Option<IndexClient> {
    if !use_daemon || !is_daemon_running() {
        return None;
    }
    let client = IndexClient::connect();
    if client.is_none() {
        warn!("daemon is running but not accepting connections; opening index directly");
    }
    client
}

fn run_find(config: &AppConfig, request: &FindRequest, use_daemon: bool) -> Result<Vec<MatchResult>> {
    if let Some(mut client) = daemon_client(use_daemon) {
        debug!("find via daemon");
        return client.find(request).context("Daemon find failed");
    }
    Ok(local_matcher(config)?.find(request)?)
}

fn run_dump(config: &AppConfig, id: &str, names: &[String], use_daemon: bool) -> Result<MatchResult> {
    if let Some(mut client) = daemon_client(use_daemon) {
        debug!("dump via daemon");
        return client.dump(id, names).context("Daemon dump failed");
    }
    Ok(local_matcher(config)?.dump(id, names)?)
}

/// A daemon serving `index_name` still holds the index as it was when
/// started; have it reopen after an indexing run.
fn reload_daemon_serving(index_name: &str) {
    let Some(mut client) = daemon_client(true) else {
        return;
    };
    match client.status() {
        Ok(status) if status.index_name == index_name => match client.reload() {
            Ok(builds) => info!("daemon reloaded {} ({} builds)", index_name, builds),
            Err(e) => warn!("daemon did not reload {}: {}", index_name, e),
        },
        Ok(_) => {}
        Err(e) => warn!("could not query daemon status: {}", e),
    }
}

fn handle_daemon_command(action: DaemonAction, config: &AppConfig) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if is_daemon_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            println!("Starting libcsearch daemon for index {}...", config.index_name);
            server::daemon::daemonize(config, &config.index_name)?;

            // Wait a moment for daemon to start
            std::thread::sleep(std::time::Duration::from_millis(500));

            if is_daemon_running() {
                println!("Daemon started (socket: {})", get_socket_path().display());
            } else {
                bail!(
                    "Daemon may have failed to start. Check {}",
                    server::daemon::daemon_error_log_path().display()
                );
            }
        }

        DaemonAction::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");

            // Try graceful shutdown via client first
            if let Some(mut client) = IndexClient::connect() {
                let _ = client.shutdown();
                std::thread::sleep(std::time::Duration::from_millis(500));
            }

            if is_daemon_running() {
                server::daemon::stop_daemon()?;
            }

            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            match IndexClient::connect_required().and_then(|mut client| client.status()) {
                Ok(status) => {
                    println!("libcsearch daemon status:");
                    println!("  Index: {}", status.index_name);
                    println!("  Uptime: {}s", status.uptime_secs);
                    println!("  Builds indexed: {}", status.builds_indexed);
                    println!("  Queries served: {}", status.queries_served);
                    println!("  Cached symbol tables: {}", status.cached_tables);
                    println!("  Cache hit rate: {:.1}%", status.cache_hit_rate * 100.0);
                }
                Err(ClientError::NotRunning) => {
                    println!("Daemon is running but not responding");
                }
                Err(e) => {
                    println!("Failed to get status: {}", e);
                }
            }
        }

        DaemonAction::Reload => {
            let builds = IndexClient::connect_required()
                .and_then(|mut client| client.reload())
                .context("Daemon reload failed")?;
            println!("Daemon reloaded ({} builds)", builds);
        }

        DaemonAction::Foreground => {
            if is_daemon_running() {
                println!("Daemon is already running in background. Stop it first with 'libcsearch daemon stop'");
                return Ok(());
            }

            println!("Running daemon in foreground (Ctrl+C to stop)...");
            server::daemon::run_foreground(config, &config.index_name)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_pair() {
        assert_eq!(
            parse_symbol_pair("system=0x7f00457a0").unwrap(),
            ("system".to_string(), "0x7f00457a0".to_string())
        );
        assert!(parse_symbol_pair("system").is_err());
        assert!(parse_symbol_pair("=0x10").is_err());
        assert!(parse_symbol_pair("system=").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_delta_requires_three_arguments() {
        assert!(Cli::try_parse_from(["libcsearch", "delta", "foo", "bar"]).is_err());
        let cli = Cli::try_parse_from(["libcsearch", "delta", "foo", "bar", "-0x10"]).unwrap();
        assert!(matches!(cli.command, Commands::Delta { ref delta, .. } if delta == "-0x10"));
    }

    #[test]
    fn test_daemon_reload_subcommand() {
        let cli = Cli::try_parse_from(["libcsearch", "daemon", "reload"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                action: DaemonAction::Reload
            }
        ));
    }
}
