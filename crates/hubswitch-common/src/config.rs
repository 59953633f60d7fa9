//! Switchover configuration, resolved once at startup.
//!
//! The environment is read in exactly one place ([`EnvOverrides::from_env`]);
//! everything below receives an explicit [`SwitchoverConfig`].
//!
//! The record location resolution chain (highest priority first):
//! 1. Explicit `--state-file` path for this invocation
//! 2. `HUBSWITCH_STATE_DIR` environment variable
//! 3. `.state/` relative to the working directory
//!
//! Every candidate is validated before any file is opened: parent-directory
//! segments are rejected outright, and absolute paths must sit under an
//! allow-listed root (`HUBSWITCH_STATE_ROOTS`, plus the system temp dir).

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Environment variable overriding the record directory
pub const STATE_DIR_ENV: &str = "HUBSWITCH_STATE_DIR";
/// Environment variable listing allow-listed absolute roots (OS path-list syntax)
pub const STATE_ROOTS_ENV: &str = "HUBSWITCH_STATE_ROOTS";
/// Default record directory, relative to the working directory
pub const DEFAULT_STATE_DIR: &str = ".state";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default reachability probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on concurrent read-only probes
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Client construction settings shared by every context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Deadline for a single API request
    pub call_timeout: Duration,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Retry policy for transient faults
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Settings for the read-only discovery fan-out
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Maximum number of contexts or managed clusters inspected at once
    pub max_concurrency: usize,
    /// Deadline for the reachability probe of one context
    pub probe_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Values taken from the process environment
#[derive(Clone, Debug, Default)]
pub struct EnvOverrides {
    /// `HUBSWITCH_STATE_DIR`
    pub state_dir: Option<String>,
    /// `HUBSWITCH_STATE_ROOTS`, split into paths
    pub allowed_roots: Vec<PathBuf>,
}

impl EnvOverrides {
    /// Read the override variables from the process environment
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(STATE_DIR_ENV).ok(),
            std::env::var_os(STATE_ROOTS_ENV),
        )
    }

    /// Build overrides from raw values (used by `from_env` and tests)
    pub fn from_values(state_dir: Option<String>, roots: Option<OsString>) -> Self {
        Self {
            state_dir: state_dir.filter(|s| !s.trim().is_empty()),
            allowed_roots: roots
                .map(|r| std::env::split_paths(&r).filter(|p| p.is_absolute()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Where switchover records live
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateLocation {
    /// A single record file named explicitly for this invocation
    File(PathBuf),
    /// A directory holding one record per (primary, secondary) pair
    Directory(PathBuf),
}

impl StateLocation {
    /// Resolve the record location using the precedence chain and validate it.
    pub fn resolve(
        explicit_file: Option<&Path>,
        env: &EnvOverrides,
        extra_roots: &[PathBuf],
    ) -> Result<Self> {
        let mut roots: Vec<PathBuf> = env.allowed_roots.clone();
        roots.extend(extra_roots.iter().cloned());

        if let Some(file) = explicit_file {
            validate_state_path(file, &roots, "--state-file")?;
            return Ok(Self::File(file.to_path_buf()));
        }
        if let Some(dir) = env.state_dir.as_deref() {
            let dir = PathBuf::from(dir);
            validate_state_path(&dir, &roots, STATE_DIR_ENV)?;
            return Ok(Self::Directory(dir));
        }
        Ok(Self::Directory(PathBuf::from(DEFAULT_STATE_DIR)))
    }

    /// Path of the record for a (primary, secondary) pair
    pub fn record_path(&self, primary: &str, secondary: &str, dry_run: bool) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::Directory(dir) => dir.join(record_file_name(primary, secondary, dry_run)),
        }
    }
}

/// File name of the record for a pair; context names are sanitised for the filesystem.
pub fn record_file_name(primary: &str, secondary: &str, dry_run: bool) -> String {
    let suffix = if dry_run { ".dry-run" } else { "" };
    format!(
        "switchover-{}__{}{}.json",
        sanitize(primary),
        sanitize(secondary),
        suffix
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reject parent traversal and absolute paths outside the allow-list.
pub fn validate_state_path(path: &Path, allowed_roots: &[PathBuf], source: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::validation_for_field(source, "state path is empty"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::validation_for_field(
            source,
            format!("state path {} contains a parent-directory segment", path.display()),
        ));
    }
    if path.is_absolute() && !allowed_roots.iter().any(|root| path.starts_with(root)) {
        return Err(Error::validation_for_field(
            source,
            format!(
                "absolute state path {} is not under an allowed root (set {})",
                path.display(),
                STATE_ROOTS_ENV
            ),
        ));
    }
    Ok(())
}

/// Full configuration for one invocation
#[derive(Clone, Debug)]
pub struct SwitchoverConfig {
    /// Where records are read and written
    pub state: StateLocation,
    /// Simulate every mutation
    pub dry_run: bool,
    /// Client construction settings
    pub client: ClientSettings,
    /// Discovery fan-out settings
    pub discovery: DiscoverySettings,
}

impl SwitchoverConfig {
    /// Resolve configuration from an explicit path argument and the environment snapshot
    pub fn resolve(explicit_state_file: Option<&Path>, env: &EnvOverrides, dry_run: bool) -> Result<Self> {
        Ok(Self {
            state: StateLocation::resolve(explicit_state_file, env, &[])?,
            dry_run,
            client: ClientSettings::default(),
            discovery: DiscoverySettings::default(),
        })
    }
}
