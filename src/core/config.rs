//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SwdError};

/// Key used by the original quarantine format.
pub const DEFAULT_XOR_KEY: u8 = 0x39;

/// Smallest window the streaming matcher is allowed to use.
pub const MIN_WINDOW_BYTES: usize = 4096;

/// Full SWD configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub remediation: RemediationConfig,
    pub quarantine: QuarantineConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Walker and matcher behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub root_paths: Vec<PathBuf>,
    pub excluded_paths: Vec<PathBuf>,
    /// Deepest directory level to descend into; unset walks the whole tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    pub cross_devices: bool,
    /// Files larger than this are matched through a sliding window instead of
    /// being buffered whole.
    pub buffer_limit_bytes: u64,
    /// Window size for the streaming matcher.
    pub window_bytes: usize,
}

/// Remediation pass knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemediationConfig {
    /// Report what would be done without touching files or the ledger.
    pub dry_run: bool,
    /// Re-read the signature bytes at the recorded offset before healing.
    pub verify_before_heal: bool,
}

/// Quarantine storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuarantineConfig {
    pub dir: PathBuf,
    pub xor_key: u8,
}

/// Activity log sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_fallback: Option<PathBuf>,
    pub max_log_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by swd.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub jsonl_log: PathBuf,
    pub activity_db: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            root_paths: vec![PathBuf::from(".")],
            excluded_paths: vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/dev"),
            ],
            max_depth: None,
            follow_symlinks: false,
            cross_devices: true,
            buffer_limit_bytes: 256 * 1024 * 1024,
            window_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verify_before_heal: true,
        }
    }
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("Quarantine"),
            xor_key: DEFAULT_XOR_KEY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_fallback: None,
            max_log_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let cfg = home_dir().join(".config").join("swd").join("config.toml");
        let data = data_dir();
        Self {
            config_file: cfg,
            database: data.join("warden.sqlite3"),
            jsonl_log: data.join("activity.jsonl"),
            activity_db: data.join("activity.sqlite3"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[SWD-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("swd")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SwdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(SwdError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scanner
        if let Some(raw) = lookup("SWD_SCANNER_ROOT_PATHS") {
            self.scanner.root_paths = env::split_paths(&raw).collect();
        }
        if let Some(raw) = lookup("SWD_SCANNER_MAX_DEPTH") {
            let depth = raw.trim().parse::<usize>().map_err(|error| SwdError::ConfigParse {
                context: "env",
                details: format!("SWD_SCANNER_MAX_DEPTH={raw:?}: {error}"),
            })?;
            self.scanner.max_depth = Some(depth);
        }
        set_parsed(
            &mut lookup,
            "SWD_SCANNER_FOLLOW_SYMLINKS",
            &mut self.scanner.follow_symlinks,
        )?;
        set_parsed(
            &mut lookup,
            "SWD_SCANNER_CROSS_DEVICES",
            &mut self.scanner.cross_devices,
        )?;
        set_parsed(
            &mut lookup,
            "SWD_SCANNER_BUFFER_LIMIT_BYTES",
            &mut self.scanner.buffer_limit_bytes,
        )?;
        set_parsed(
            &mut lookup,
            "SWD_SCANNER_WINDOW_BYTES",
            &mut self.scanner.window_bytes,
        )?;

        // remediation
        set_parsed(
            &mut lookup,
            "SWD_REMEDIATION_DRY_RUN",
            &mut self.remediation.dry_run,
        )?;
        set_parsed(
            &mut lookup,
            "SWD_REMEDIATION_VERIFY_BEFORE_HEAL",
            &mut self.remediation.verify_before_heal,
        )?;

        // quarantine
        if let Some(raw) = lookup("SWD_QUARANTINE_DIR") {
            self.quarantine.dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SWD_QUARANTINE_XOR_KEY") {
            self.quarantine.xor_key = parse_key("SWD_QUARANTINE_XOR_KEY", &raw)?;
        }

        // logging
        set_parsed(&mut lookup, "SWD_LOGGING_ENABLED", &mut self.logging.enabled)?;

        // paths
        if let Some(raw) = lookup("SWD_DATABASE") {
            self.paths.database = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SWD_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SWD_ACTIVITY_DB") {
            self.paths.activity_db = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Strip trailing slashes so exclusion checks compare equal paths.
    fn normalize_paths(&mut self) {
        for path in self
            .scanner
            .root_paths
            .iter_mut()
            .chain(self.scanner.excluded_paths.iter_mut())
        {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.scanner.max_depth == Some(0) {
            return Err(SwdError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.scanner.window_bytes < MIN_WINDOW_BYTES {
            return Err(SwdError::InvalidConfig {
                details: format!(
                    "scanner.window_bytes ({}) must be >= {MIN_WINDOW_BYTES}",
                    self.scanner.window_bytes
                ),
            });
        }
        if self.scanner.buffer_limit_bytes == 0 {
            return Err(SwdError::InvalidConfig {
                details: "scanner.buffer_limit_bytes must be > 0".to_string(),
            });
        }
        // A zero key would store quarantined content in the clear.
        if self.quarantine.xor_key == 0 {
            return Err(SwdError::InvalidConfig {
                details: "quarantine.xor_key must be non-zero".to_string(),
            });
        }
        if self.quarantine.dir.as_os_str().is_empty() {
            return Err(SwdError::InvalidConfig {
                details: "quarantine.dir must not be empty".to_string(),
            });
        }
        if self.logging.max_log_bytes == 0 {
            return Err(SwdError::InvalidConfig {
                details: "logging.max_log_bytes must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| SwdError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

/// Accepts decimal (`57`) or hex (`0x39`) byte values.
fn parse_key(name: &str, raw: &str) -> Result<u8> {
    let trimmed = raw.trim();
    let parsed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .map_or_else(|| trimmed.parse::<u8>(), |hex| u8::from_str_radix(hex, 16));
    parsed.map_err(|error| SwdError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
