//! Configuration system for the `kanban` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/kanban/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use url::Url;

use crate::backend::ws::WsOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The backend URL is not a URL.
    #[error("invalid backend url {url}: {source}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// The backend URL is not a WebSocket URL.
    #[error("backend url must use ws:// or wss://, got {0}")]
    UnsupportedScheme(String),

    /// Remote mode was selected without a backend URL.
    #[error("remote mode requires a backend url (--backend-url or KANBAN_BACKEND_URL)")]
    MissingBackendUrl,

    /// The timestamp format contains a specifier chrono does not know.
    #[error("invalid timestamp format {0:?}")]
    InvalidTimestampFormat(String),
}

/// Which storage variant backs the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Everything in the local data directory.
    #[default]
    Local,
    /// Tasks, comments and users in the hosted backend.
    Remote,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    backend: BackendFileConfig,
    ui: UiFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    mode: Option<StorageMode>,
    data_dir: Option<PathBuf>,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Storage variant.
    pub mode: StorageMode,
    /// Directory of the local key space.
    pub data_dir: PathBuf,
    /// Backend WebSocket URL. Always present in remote mode.
    pub backend_url: Option<Url>,
    /// Timeout for connecting to the backend.
    pub connect_timeout: Duration,
    /// Timeout for each backend request.
    pub request_timeout: Duration,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

/// Data directory used when none is configured.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kanban")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Local,
            data_dir: default_data_dir(),
            backend_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            timestamp_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/kanban/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the backend URL is invalid or missing in remote mode.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mode = cli.mode.or(file.storage.mode).unwrap_or(defaults.mode);
        let backend_url = cli
            .backend_url
            .as_deref()
            .or(file.backend.url.as_deref())
            .map(parse_backend_url)
            .transpose()?;
        if mode == StorageMode::Remote && backend_url.is_none() {
            return Err(ConfigError::MissingBackendUrl);
        }

        Ok(Self {
            mode,
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            backend_url,
            connect_timeout: file
                .backend
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            timestamp_format: check_timestamp_format(
                cli.timestamp_format
                    .clone()
                    .or_else(|| file.ui.timestamp_format.clone())
                    .unwrap_or(defaults.timestamp_format),
            )?,
        })
    }

    /// Connection options for the WebSocket backend client.
    #[must_use]
    pub const fn ws_options(&self) -> WsOptions {
        WsOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

fn check_timestamp_format(format: String) -> Result<String, ConfigError> {
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidTimestampFormat(format));
    }
    Ok(format)
}

/// Parses a backend URL, accepting only WebSocket schemes.
fn parse_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// CLI arguments shared by every `kanban` subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Storage variant.
    #[arg(long, value_enum, env = "KANBAN_MODE", global = true)]
    pub mode: Option<StorageMode>,

    /// Directory for local data and the session marker.
    #[arg(long, env = "KANBAN_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// WebSocket URL of the backend (remote mode).
    #[arg(long, env = "KANBAN_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Path to config file (default: `~/.config/kanban/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long, global = true)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "KANBAN_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/kanban.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("kanban").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.mode, StorageMode::Local);
        assert!(config.data_dir.ends_with("kanban"));
        assert!(config.backend_url.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.timestamp_format, "%Y-%m-%d %H:%M");
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[storage]
mode = "remote"
data_dir = "/var/lib/kanban"

[backend]
url = "ws://example.com:9000/ws"
connect_timeout_secs = 30
request_timeout_secs = 5

[ui]
timestamp_format = "%H:%M:%S"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file).unwrap();

        assert_eq!(config.mode, StorageMode::Remote);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/kanban"));
        assert_eq!(
            config.backend_url.as_ref().map(Url::as_str),
            Some("ws://example.com:9000/ws")
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.timestamp_format, "%H:%M:%S");

        let ws = config.ws_options();
        assert_eq!(ws.connect_timeout, Duration::from_secs(30));
        assert_eq!(ws.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn toml_parsing_empty() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file).unwrap();
        assert_eq!(config.mode, StorageMode::Local);
        assert!(config.backend_url.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[storage]
mode = "local"
data_dir = "/from/file"

[backend]
url = "ws://file:9000/ws"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            mode: Some(StorageMode::Remote),
            backend_url: Some("wss://cli.example.com/ws".to_string()),
            data_dir: None,
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file).unwrap();

        assert_eq!(config.mode, StorageMode::Remote);
        assert_eq!(
            config.backend_url.as_ref().map(Url::as_str),
            Some("wss://cli.example.com/ws")
        );
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));
    }

    #[test]
    fn remote_mode_requires_backend_url() {
        let cli = CliArgs {
            mode: Some(StorageMode::Remote),
            ..Default::default()
        };
        let err = ClientConfig::resolve(&cli, &ConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackendUrl));
    }

    #[test]
    fn backend_url_must_be_websocket() {
        let cli = CliArgs {
            backend_url: Some("http://example.com".to_string()),
            ..Default::default()
        };
        let err = ClientConfig::resolve(&cli, &ConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(s) if s == "http"));

        let cli = CliArgs {
            backend_url: Some("not a url".to_string()),
            ..Default::default()
        };
        let err = ClientConfig::resolve(&cli, &ConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn unknown_timestamp_specifier_is_rejected() {
        let cli = CliArgs {
            timestamp_format: Some("%Y %Q".to_string()),
            ..Default::default()
        };
        let err = ClientConfig::resolve(&cli, &ConfigFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimestampFormat(f) if f == "%Y %Q"));

        let file: ConfigFile = toml::from_str("[ui]\ntimestamp_format = \"%Q\"\n").unwrap();
        assert!(ClientConfig::resolve(&CliArgs::default(), &file).is_err());
    }

    #[test]
    fn unknown_mode_in_file_is_a_parse_error() {
        let result: Result<ConfigFile, _> = toml::from_str("[storage]\nmode = \"cloud\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = load_config_file(None);
        assert!(result.is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn explicit_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ui]\ntimestamp_format = \"%d/%m\"\n").unwrap();

        let cli = CliArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = ClientConfig::load(&cli).unwrap();
        assert_eq!(config.timestamp_format, "%d/%m");
    }
}
