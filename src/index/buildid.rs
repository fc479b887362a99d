//! Build identifier extraction.
//!
//! A missing or unreadable identifier is never an error for the indexer:
//! extractors return `None` and the record is stored without one.

use crate::utils::BuildIdSource;
use log::debug;
use object::Object;
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

pub trait BuildIdExtractor: Send + Sync {
    /// Lowercase hex build identifier of the binary, if it has one
    fn extract(&self, path: &Path, bytes: &[u8]) -> Option<String>;
}

/// Reads `.note.gnu.build-id` with the `object` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectBuildId;

impl BuildIdExtractor for ObjectBuildId {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Option<String> {
        let file = match object::File::parse(bytes) {
            Ok(f) => f,
            Err(e) => {
                debug!("{}: not an object file: {}", path.display(), e);
                return None;
            }
        };
        match file.build_id() {
            Ok(Some(id)) if !id.is_empty() => Some(hex::encode(id)),
            Ok(_) => None,
            Err(e) => {
                debug!("{}: unreadable build id note: {}", path.display(), e);
                None
            }
        }
    }
}

/// Scrapes the output of `readelf -n`
#[derive(Debug, Clone)]
pub struct ReadelfBuildId {
    program: String,
}

impl Default for ReadelfBuildId {
    fn default() -> Self {
        Self {
            program: "readelf".to_string(),
        }
    }
}

fn build_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Build ID: ([a-fA-F0-9]+)").expect("static regex"))
}

impl ReadelfBuildId {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Pull the identifier out of `readelf -n` text
    pub fn parse_output(output: &str) -> Option<String> {
        build_id_regex()
            .captures(output)
            .map(|caps| caps[1].to_ascii_lowercase())
    }
}

impl BuildIdExtractor for ReadelfBuildId {
    fn extract(&self, path: &Path, _bytes: &[u8]) -> Option<String> {
        let output = Command::new(&self.program)
            .arg("-n")
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                Self::parse_output(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                debug!("{}: {} exited with {}", path.display(), self.program, out.status);
                None
            }
            Err(e) => {
                debug!("{}: failed to run {}: {}", path.display(), self.program, e);
                None
            }
        }
    }
}

/// The extractor selected by configuration
pub fn extractor_for(source: BuildIdSource) -> Box<dyn BuildIdExtractor> {
    match source {
        BuildIdSource::Object => Box::new(ObjectBuildId),
        BuildIdSource::Readelf => Box::new(ReadelfBuildId::default()),
    }
}
