//! Service configuration module.
//!
//! Handles loading, validating, and layering the service configuration. The
//! result is one immutable [`ServiceConfig`] value that is handed to every
//! component constructor; nothing reads configuration from globals at
//! request time.
//!
//! ## Layers
//!
//! ```text
//! stock defaults            (ServiceConfig::default)
//!   └─ config file          (--config / THUMBSERVE_CONFIG, optional)
//!        └─ environment     (THUMBSERVE_* variables, see ENV_KEYS)
//! ```
//!
//! Each layer only needs the keys it wants to override. Layers are merged as
//! TOML tables with [`merge_toml`] before deserializing, so partial files work
//! and unknown keys are rejected to catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8080"
//! document_root = "."        # Local sources resolve below this directory
//! base_dir = "."             # Secondary root tried when the first lookup fails
//!
//! [cache]
//! dir = "cache"
//! ttl_secs = 86400           # Entries older than this are treated as misses
//! salt = "..."               # Rotating the salt invalidates every cache key
//!
//! [images]
//! max_width = 1500
//! max_height = 1500
//! default_quality = 90       # Used when a request carries no quality
//! max_file_size = 10485760   # Bytes, for local files and downloads alike
//!
//! [remote]
//! enabled = false            # External fetching is off unless enabled
//! allowed_hosts = []         # Empty = any host; otherwise host or subdomain match
//! timeout_secs = 10          # 1-10
//! # scratch_dir = "/var/tmp" # Where downloads wait for processing
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment variable {var}: {reason}")]
    Env { var: String, reason: String },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Upper bound for `remote.timeout_secs`.
pub const MAX_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Complete service configuration.
///
/// All fields have sensible defaults. Config files need only specify the
/// values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub images: ImagesConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub listen: String,
    /// Root directory that local source references resolve against.
    pub document_root: PathBuf,
    /// Secondary root, tried when resolution below `document_root` fails.
    pub base_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            document_root: PathBuf::from("."),
            base_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Age at which a cached artefact stops being served.
    pub ttl_secs: u64,
    /// Mixed into every cache key.
    pub salt: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache"),
            ttl_secs: 86_400,
            salt: "change-me-and-flush-the-cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Encoding quality used when the request does not name one (1-100).
    pub default_quality: u32,
    /// Largest accepted source, in bytes.
    pub max_file_size: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_width: 1500,
            max_height: 1500,
            default_quality: 90,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Whether `http(s)://` sources may be fetched at all.
    pub enabled: bool,
    /// Hosts (and their subdomains) that may be fetched. Empty allows any.
    pub allowed_hosts: Vec<String>,
    /// Overall deadline for one download, redirects included.
    pub timeout_secs: u64,
    /// Directory for in-flight downloads. `None` uses the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_hosts: Vec::new(),
            timeout_secs: MAX_REMOTE_TIMEOUT_SECS,
            scratch_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.listen must be a socket address, got {:?}",
                self.server.listen
            )));
        }
        if self.images.max_width == 0 || self.images.max_height == 0 {
            return Err(ConfigError::Validation(
                "images.max_width and images.max_height must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.images.default_quality) {
            return Err(ConfigError::Validation(
                "images.default_quality must be 1-100".into(),
            ));
        }
        if self.images.max_file_size == 0 {
            return Err(ConfigError::Validation(
                "images.max_file_size must be non-zero".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation("cache.ttl_secs must be non-zero".into()));
        }
        if self.cache.salt.is_empty() {
            return Err(ConfigError::Validation("cache.salt must not be empty".into()));
        }
        if !(1..=MAX_REMOTE_TIMEOUT_SECS).contains(&self.remote.timeout_secs) {
            return Err(ConfigError::Validation(format!(
                "remote.timeout_secs must be 1-{MAX_REMOTE_TIMEOUT_SECS}"
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    /// Directory for temporary downloads.
    pub fn scratch_dir(&self) -> PathBuf {
        self.remote
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Str,
    Int,
    Bool,
    List,
}

/// Environment variables (after the `THUMBSERVE_` prefix) and the config key
/// each one overrides.
const ENV_KEYS: &[(&str, &str, &str, EnvKind)] = &[
    ("LISTEN", "server", "listen", EnvKind::Str),
    ("DOCUMENT_ROOT", "server", "document_root", EnvKind::Str),
    ("BASE_DIR", "server", "base_dir", EnvKind::Str),
    ("CACHE_DIR", "cache", "dir", EnvKind::Str),
    ("CACHE_TTL", "cache", "ttl_secs", EnvKind::Int),
    ("CACHE_SALT", "cache", "salt", EnvKind::Str),
    ("MAX_WIDTH", "images", "max_width", EnvKind::Int),
    ("MAX_HEIGHT", "images", "max_height", EnvKind::Int),
    ("DEFAULT_QUALITY", "images", "default_quality", EnvKind::Int),
    ("MAX_FILE_SIZE", "images", "max_file_size", EnvKind::Int),
    ("ALLOW_EXTERNAL", "remote", "enabled", EnvKind::Bool),
    ("ALLOWED_HOSTS", "remote", "allowed_hosts", EnvKind::List),
    ("REMOTE_TIMEOUT", "remote", "timeout_secs", EnvKind::Int),
    ("SCRATCH_DIR", "remote", "scratch_dir", EnvKind::Str),
];

const ENV_PREFIX: &str = "THUMBSERVE_";

fn parse_env_value(var: &str, raw: &str, kind: EnvKind) -> Result<toml::Value, ConfigError> {
    let invalid = |reason: &str| ConfigError::Env {
        var: var.to_string(),
        reason: reason.to_string(),
    };
    let raw = raw.trim();
    match kind {
        EnvKind::Str => Ok(toml::Value::String(raw.to_string())),
        EnvKind::Int => raw
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .map(toml::Value::Integer)
            .ok_or_else(|| invalid("expected a non-negative integer")),
        EnvKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(invalid("expected true/false")),
        },
        EnvKind::List => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_string()))
                .collect(),
        )),
    }
}

/// Build an overlay table from `THUMBSERVE_*` variables.
///
/// Takes the variables as an iterator so tests never touch the process
/// environment. Unrecognised `THUMBSERVE_*` names are ignored (the config
/// path variable is consumed by the CLI instead).
pub fn env_overrides<I>(vars: I) -> Result<Option<toml::Value>, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = toml::map::Map::new();
    for (name, raw) in vars {
        let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some(&(_, section, key, kind)) = ENV_KEYS.iter().find(|(s, ..)| *s == suffix) else {
            continue;
        };
        let value = parse_env_value(&name, &raw, kind)?;
        let table = root
            .entry(section.to_string())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
        if let toml::Value::Table(table) = table {
            table.insert(key.to_string(), value);
        }
    }
    Ok((!root.is_empty()).then_some(toml::Value::Table(root)))
}

/// Merge the layers, then deserialize and validate.
pub fn resolve_config(
    file: Option<toml::Value>,
    env: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let mut merged = stock_defaults_value();
    for overlay in [file, env].into_iter().flatten() {
        merged = merge_toml(merged, overlay);
    }
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration from an optional file plus the process environment.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let file = path.map(load_raw_config).transpose()?;
    let env = env_overrides(std::env::vars())?;
    resolve_config(file, env)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbserve configuration
# ========================
# All settings are optional. Values shown below are the defaults.
# Every key can also be overridden with a THUMBSERVE_* environment variable
# (e.g. THUMBSERVE_CACHE_TTL=3600, THUMBSERVE_ALLOWED_HOSTS=a.com,b.org).
# Unknown keys will cause an error.

[server]
# Address the HTTP listener binds to.
listen = "127.0.0.1:8080"
# Local sources (e.g. ?source=/img/cat.png) resolve below this directory.
document_root = "."
# Secondary root, tried when the lookup below document_root fails.
# The same containment rules apply.
base_dir = "."

[cache]
# One file per (source, parameters) pair lives here.
dir = "cache"
# Seconds before a cached thumbnail is regenerated. Also sent as max-age.
ttl_secs = 86400
# Mixed into every cache key. Changing it invalidates the whole cache.
salt = "change-me-and-flush-the-cache"

[images]
# Requested sizes are clamped to these limits.
max_width = 1500
max_height = 1500
# Quality used when a request carries none (1-100). For PNG it selects the
# compression effort instead.
default_quality = 90
# Largest accepted source in bytes (local files and downloads).
max_file_size = 10485760

[remote]
# Fetch http:// and https:// sources. Disabled by default.
enabled = false
# Hosts that may be fetched; subdomains match too. Empty allows any host.
allowed_hosts = []
# Overall download deadline in seconds (1-10).
timeout_secs = 10
# Directory for in-flight downloads. Defaults to the OS temp dir.
# scratch_dir = "/var/tmp/thumbserve"
"##
}
