//! Configuration system for the Flux messaging server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/flux-server/config.toml`)
//! 4. Compiled defaults
//!
//! The JWT signing secret has no default: a server that cannot verify
//! credentials refuses to start.

use std::path::PathBuf;

use flux_proto::message::MAX_CONTENT_LEN;

/// Errors that can occur when loading server configuration.
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

    /// No JWT secret was given on the CLI, in the environment or in the file.
    #[error("no JWT signing secret configured (set FLUX_JWT_SECRET or [auth] jwt_secret)")]
    MissingJwtSecret,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    auth: AuthFileConfig,
    users: Vec<SeedUser>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_content_len: Option<usize>,
    max_invalid_frames: Option<u32>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    jwt_secret: Option<String>,
}

/// A `[[users]]` entry inserted into the in-memory store at startup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SeedUser {
    /// Unique handle.
    pub username: String,
    /// Contact address.
    #[serde(default)]
    pub email: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the messaging server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Flux real-time messaging server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "FLUX_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/flux-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Shared HMAC secret used to verify bearer tokens.
    #[arg(long, env = "FLUX_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Maximum message content size in bytes.
    #[arg(long)]
    pub max_content_len: Option<usize>,

    /// Undecodable frames tolerated before a connection is dropped.
    #[arg(long)]
    pub max_invalid_frames: Option<u32>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "FLUX_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Shared HMAC secret for token verification.
    pub jwt_secret: String,
    /// Maximum message content size in bytes.
    pub max_content_len: usize,
    /// Undecodable frames tolerated per connection.
    pub max_invalid_frames: u32,
    /// Log level filter string.
    pub log_level: String,
    /// Accounts to create at startup.
    pub seed_users: Vec<SeedUser>,
}

/// Default bind address.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default number of undecodable frames tolerated per connection.
pub const DEFAULT_MAX_INVALID_FRAMES: u32 = 16;

impl ServerConfig {
    /// Builds a configuration with compiled defaults and the given secret.
    #[must_use]
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: jwt_secret.into(),
            max_content_len: MAX_CONTENT_LEN,
            max_invalid_frames: DEFAULT_MAX_INVALID_FRAMES,
            log_level: "info".to_string(),
            seed_users: Vec::new(),
        }
    }

    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if no JWT secret is configured anywhere.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Result<Self, ConfigError> {
        let jwt_secret = cli
            .jwt_secret
            .clone()
            .or(file.auth.jwt_secret)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingJwtSecret)?;
        let defaults = Self::with_secret(jwt_secret);

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_content_len: cli
                .max_content_len
                .or(file.server.max_content_len)
                .unwrap_or(defaults.max_content_len),
            max_invalid_frames: cli
                .max_invalid_frames
                .or(file.server.max_invalid_frames)
                .unwrap_or(defaults.max_invalid_frames),
            log_level: cli.log_level.clone(),
            seed_users: file.users,
            jwt_secret: defaults.jwt_secret,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("flux-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
