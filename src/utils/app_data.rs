use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "libcsearch";
const CONFIG_FILE: &str = "config.json";

/// Where the indexer gets a binary's build identifier from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildIdSource {
    /// Parse the `.note.gnu.build-id` note in-process
    #[default]
    Object,
    /// Run `readelf -n` and scrape its output
    Readelf,
}

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `<id>.so` / `<id>.symbols` pairs
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// Index used when none is given on the command line
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Glob selecting candidate binaries inside `db_dir`
    #[serde(default = "default_binary_glob")]
    pub binary_glob: String,

    /// Symbols always included in results, when the build has them
    #[serde(default = "default_symbols")]
    pub default_symbols: Vec<String>,

    /// Download locator template; `{}` is replaced by the build id
    #[serde(default = "default_download_url")]
    pub download_url: String,

    /// Locator template for the full symbols artifact
    #[serde(default = "default_symbols_url")]
    pub symbols_url: String,

    /// Maximum number of symbol tables kept in memory by the matcher
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub build_id_source: BuildIdSource,
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("/db")
}

fn default_index_name() -> String {
    APP_NAME.to_string()
}

fn default_binary_glob() -> String {
    "*.so".to_string()
}

fn default_symbols() -> Vec<String> {
    [
        "__libc_start_main_ret",
        "system",
        "dup2",
        "str_bin_sh",
        "read",
        "write",
        "puts",
        "printf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_download_url() -> String {
    "https://libc.rip/download/{}.so".to_string()
}

fn default_symbols_url() -> String {
    "https://libc.rip/download/{}.symbols".to_string()
}

fn default_cache_capacity() -> usize {
    2000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            index_name: default_index_name(),
            binary_glob: default_binary_glob(),
            default_symbols: default_symbols(),
            download_url: default_download_url(),
            symbols_url: default_symbols_url(),
            cache_capacity: default_cache_capacity(),
            build_id_source: BuildIdSource::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: AppConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Download locator of a build
    pub fn download_url_for(&self, id: &str) -> String {
        self.download_url.replace("{}", id)
    }

    /// Locator of a build's full symbols artifact
    pub fn symbols_url_for(&self, id: &str) -> String {
        self.symbols_url.replace("{}", id)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory for storing indexes
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Root directory holding one sub-directory per named index
pub fn get_indexes_dir() -> Result<PathBuf> {
    let indexes_dir = get_app_data_dir()?.join("indexes");
    fs::create_dir_all(&indexes_dir)?;
    Ok(indexes_dir)
}

/// Get the directory of a named index
pub fn get_index_dir(name: &str) -> Result<PathBuf> {
    validate_index_name(name)?;
    Ok(get_indexes_dir()?.join(name))
}

/// Index names become directory names, so keep them to a safe alphabet
pub fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        bail!("Index name must be 1-64 characters: {:?}", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || name.starts_with('.')
    {
        bail!("Invalid index name: {:?}", name);
    }
    Ok(())
}

/// Information about an index on disk
#[derive(Debug, Clone)]
pub struct IndexLocation {
    pub name: String,
    pub index_dir: PathBuf,
}

/// List all indexes found under a directory of indexes
pub fn list_indexes_in(indexes_dir: &Path) -> Result<Vec<IndexLocation>> {
    if !indexes_dir.exists() {
        return Ok(Vec::new());
    }

    let mut indexes = Vec::new();

    for entry in fs::read_dir(indexes_dir)? {
        let path = entry?.path();
        if !path.join("meta.json").is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            indexes.push(IndexLocation {
                name: name.to_string(),
                index_dir: path.clone(),
            });
        }
    }

    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}

/// List all indexes in the app data directory
pub fn list_indexes() -> Result<Vec<IndexLocation>> {
    list_indexes_in(&get_indexes_dir()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.index_name, "libcsearch");
        assert_eq!(config.cache_capacity, 2000);
        assert_eq!(config.default_symbols.len(), 8);
        assert_eq!(config.build_id_source, BuildIdSource::Object);
    }

    #[test]
    fn test_app_config_partial_json() {
        // Should use defaults for missing fields
        let json = r#"{"db_dir": "/srv/db", "build_id_source": "readelf"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.db_dir, PathBuf::from("/srv/db"));
        assert_eq!(config.build_id_source, BuildIdSource::Readelf);
        assert_eq!(config.binary_glob, "*.so");
    }

    #[test]
    fn test_app_config_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.download_url, default_download_url());
    }

    #[test]
    fn test_url_templates() {
        let config = AppConfig::default();
        assert_eq!(
            config.download_url_for("libc6_2.27-3ubuntu1_amd64"),
            "https://libc.rip/download/libc6_2.27-3ubuntu1_amd64.so"
        );
        assert_eq!(
            config.symbols_url_for("x"),
            "https://libc.rip/download/x.symbols"
        );
    }

    #[test]
    fn test_validate_index_name() {
        assert!(validate_index_name("libcsearch").is_ok());
        assert!(validate_index_name("libc_v2-test").is_ok());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("../etc").is_err());
        assert!(validate_index_name("a/b").is_err());
    }

    #[test]
    fn test_list_indexes_in() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("meta.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a").join("meta.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("stray")).unwrap();

        let names: Vec<_> = list_indexes_in(dir.path())
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
