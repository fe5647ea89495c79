//! Backend settings: where to listen and how much to buffer.
//!
//! Values come from CLI flags (with env fallbacks), then a flat TOML file,
//! then built-in defaults. Everything is checked before the server starts:
//! the bind address must be a socket address and both size limits must be
//! non-zero.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::tables::DEFAULT_CHANGE_BUFFER;

const DEFAULT_BIND: &str = "0.0.0.0:9000";
const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Errors that can occur when loading backend configuration.
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

    /// The bind address is not `host:port`.
    #[error("invalid bind address {addr}: {source}")]
    BindAddr {
        /// The rejected value.
        addr: String,
        /// Parser error.
        source: std::net::AddrParseError,
    },

    /// A size setting was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Overrides read from the config file. Keys sit at the top level.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Overrides {
    bind: Option<String>,
    max_frame_size: Option<usize>,
    change_buffer: Option<usize>,
}

/// CLI arguments for the backend server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Kanban reference backend")]
pub struct BackendCliArgs {
    /// Socket address to listen on.
    #[arg(short, long, env = "KANBAN_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Config file (default: `~/.config/kanban-backend/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest request frame accepted, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Change events buffered per connection before it is considered lagging.
    #[arg(long)]
    pub change_buffer: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "KANBAN_BACKEND_LOG")]
    pub log_level: String,
}

/// Validated backend settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Largest request frame accepted, in bytes.
    pub max_frame_size: NonZeroUsize,
    /// Capacity of the database change feed.
    pub change_buffer: NonZeroUsize,
    /// Log level filter string.
    pub log_level: String,
}

impl BackendConfig {
    /// Reads the config file named by `--config` (or the default one, if
    /// present) and combines it with the CLI values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file is missing, any file is
    /// malformed, or a resulting value is invalid.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let overrides = match cli.config.as_deref() {
            Some(path) => read_overrides(path)?,
            None => default_path().map_or(Ok(Overrides::default()), |p| {
                read_optional_overrides(&p)
            })?,
        };
        Self::build(cli, &overrides)
    }

    fn build(cli: &BackendCliArgs, file: &Overrides) -> Result<Self, ConfigError> {
        let bind = cli
            .bind
            .as_deref()
            .or(file.bind.as_deref())
            .unwrap_or(DEFAULT_BIND);
        let bind_addr = bind.parse().map_err(|source| ConfigError::BindAddr {
            addr: bind.to_string(),
            source,
        })?;

        let non_zero = |value: Option<usize>, fallback: usize, name: &'static str| {
            NonZeroUsize::new(value.unwrap_or(fallback)).ok_or(ConfigError::Zero(name))
        };

        Ok(Self {
            bind_addr,
            max_frame_size: non_zero(
                cli.max_frame_size.or(file.max_frame_size),
                DEFAULT_MAX_FRAME,
                "max_frame_size",
            )?,
            change_buffer: non_zero(
                cli.change_buffer.or(file.change_buffer),
                DEFAULT_CHANGE_BUFFER,
                "change_buffer",
            )?,
            log_level: cli.log_level.clone(),
        })
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kanban-backend").join("config.toml"))
}

fn read_overrides(path: &Path) -> Result<Overrides, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Like [`read_overrides`], but a missing file means no overrides.
fn read_optional_overrides(path: &Path) -> Result<Overrides, ConfigError> {
    match read_overrides(path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(Overrides::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(cli: &BackendCliArgs, toml_str: &str) -> Result<BackendConfig, ConfigError> {
        let file: Overrides = toml::from_str(toml_str).unwrap();
        BackendConfig::build(cli, &file)
    }

    #[test]
    fn bind_address_is_parsed() {
        let config = build(&BackendCliArgs::default(), "bind = \"127.0.0.1:8080\"").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.change_buffer.get(), DEFAULT_CHANGE_BUFFER);
    }

    #[test]
    fn bind_address_without_port_is_rejected() {
        let cli = BackendCliArgs {
            bind: Some("localhost".to_string()),
            ..Default::default()
        };
        let err = build(&cli, "").unwrap_err();
        assert!(matches!(err, ConfigError::BindAddr { ref addr, .. } if addr == "localhost"));
    }

    #[test]
    fn zero_change_buffer_is_rejected() {
        let err = build(&BackendCliArgs::default(), "change_buffer = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Zero("change_buffer")));
    }

    #[test]
    fn zero_frame_size_from_cli_is_rejected_even_if_file_is_valid() {
        let cli = BackendCliArgs {
            max_frame_size: Some(0),
            ..Default::default()
        };
        let err = build(&cli, "max_frame_size = 4096").unwrap_err();
        assert!(matches!(err, ConfigError::Zero("max_frame_size")));
    }

    #[test]
    fn misspelled_key_is_a_parse_error() {
        assert!(toml::from_str::<Overrides>("chnage_buffer = 8").is_err());
    }

    #[test]
    fn explicit_config_file_is_read_and_missing_one_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.toml");
        std::fs::write(&path, "bind = \"127.0.0.1:0\"\nchange_buffer = 8\n").unwrap();

        let cli = BackendCliArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = BackendConfig::load(&cli).unwrap();
        assert_eq!(config.change_buffer.get(), 8);

        let cli = BackendCliArgs {
            config: Some(dir.path().join("absent.toml")),
            ..Default::default()
        };
        assert!(matches!(
            BackendConfig::load(&cli),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn missing_default_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = read_optional_overrides(&dir.path().join("config.toml")).unwrap();
        assert!(overrides.bind.is_none());
    }
}
