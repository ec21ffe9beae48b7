//! Job settings
//!
//! A job file lists directory pairs and how each side is reached. Files
//! ending in `.json` are read as JSON, anything else as TOML:
//!
//! ```toml
//! name = "nightly"
//!
//! [[pairs]]
//! source = "/home/me/photos"
//! target = "/photos"
//! direction = "mirror"
//! exclude = ["*.tmp"]
//!
//! [pairs.target_backend]
//! kind = "ftp"
//! host = "nas.local"
//! user = "backup"
//! password = "secret"
//! ```

use crate::backend::remote::{RemoteEndpoint, DEFAULT_PORT};
use crate::copy::DEFAULT_CHUNK_SIZE;
use crate::diff::{ComparePolicy, Direction, SyncOptions};
use crate::rules::GlobFilter;
use crate::types::SyncError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// A whole job: one or more directory pairs run in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSettings {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Copy chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Dry run (record the plan, don't execute)
    #[serde(default)]
    pub dry_run: bool,

    pub pairs: Vec<PairSettings>,
}

/// One source/target directory pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairSettings {
    pub source: String,
    pub target: String,

    #[serde(default)]
    pub source_backend: BackendSpec,

    #[serde(default)]
    pub target_backend: BackendSpec,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub compare: ComparePolicy,

    /// Exclude patterns (globs)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Include patterns (override excludes)
    #[serde(default)]
    pub include: Vec<String>,
}

/// Which backend serves one side of a pair
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSpec {
    #[default]
    Local,
    Ftp(FtpSettings),
}

/// Connection settings for an FTP backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpSettings {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Server directory the pair paths are relative to
    #[serde(default = "default_root")]
    pub root: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    #[serde(default = "default_passive")]
    pub passive: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    "anonymous".to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    30
}

fn default_passive() -> bool {
    true
}

impl FtpSettings {
    pub fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            root: self.root.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            passive: self.passive,
        }
    }
}

impl BackendSpec {
    fn validate(&self, side: &str, index: usize) -> Result<(), SyncError> {
        if let BackendSpec::Ftp(ftp) = self {
            if ftp.host.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "pair {index}: {side} FTP host is empty"
                )));
            }
            if ftp.connect_timeout_secs == 0 || ftp.io_timeout_secs == 0 {
                return Err(SyncError::Config(format!(
                    "pair {index}: {side} FTP timeouts must be positive"
                )));
            }
        }
        Ok(())
    }
}

impl PairSettings {
    /// Local-to-local pair with default policy
    pub fn local(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_backend: BackendSpec::Local,
            target_backend: BackendSpec::Local,
            direction: Direction::default(),
            compare: ComparePolicy::default(),
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }

    /// Build the entry filter from the pair's patterns
    pub fn filter(&self) -> Result<GlobFilter, SyncError> {
        GlobFilter::new(&self.exclude, &self.include)
    }

    /// Engine options for this pair
    pub fn options(&self, job: &JobSettings) -> SyncOptions {
        SyncOptions {
            direction: self.direction,
            compare: self.compare,
            chunk_size: job.chunk_size,
            dry_run: job.dry_run,
        }
    }
}

impl JobSettings {
    /// Parse TOML job settings
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Parse JSON job settings
    pub fn from_json_str(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.pairs.is_empty() {
            return Err(SyncError::Config(
                "a job needs at least one directory pair".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        for (index, pair) in self.pairs.iter().enumerate() {
            if pair.source.trim().is_empty() || pair.target.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "pair {index}: source and target paths are required"
                )));
            }
            if pair.source_backend == BackendSpec::Local
                && pair.target_backend == BackendSpec::Local
                && Path::new(&pair.source) == Path::new(&pair.target)
            {
                return Err(SyncError::Config(format!(
                    "pair {index}: source and target cannot be the same"
                )));
            }
            pair.source_backend.validate("source", index)?;
            pair.target_backend.validate("target", index)?;
            pair.filter()?;
        }
        Ok(())
    }
}

/// Load and validate job settings from `path`.
///
/// # Errors
/// `SyncError::Io` when the file cannot be read, and
/// `SyncError::ConfigurationCorrupt` when it is not UTF-8 text, does not
/// parse or fails validation.
pub fn load_job_settings(path: &Path) -> Result<JobSettings, SyncError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(SyncError::ConfigurationCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        JobSettings::from_json_str(&text)
    } else {
        JobSettings::from_toml_str(&text)
    };
    let corrupt = |reason: String| SyncError::ConfigurationCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let settings = parsed.map_err(corrupt)?;
    settings.validate().map_err(|e| corrupt(e.to_string()))?;
    Ok(settings)
}
