//!
//! nfstore configuration
//! ---------------------
//! Server settings resolved from, in increasing priority: built-in defaults, an
//! optional JSON file (`--config <path>`), environment variables and command-line
//! flags. The storage root may also be given as the first positional argument.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::WriteLockPolicy;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_ROOT: &str = "data";
pub const DEFAULT_CACHE_CAPACITY: usize = 128;
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;
pub const DEFAULT_MAX_WRITE_LEN: u64 = 64 * 1024 * 1024;

pub const ENV_ROOT: &str = "NFS_PATH";
pub const ENV_BIND: &str = "NFSTORE_BIND";
pub const ENV_PORT: &str = "NFSTORE_PORT";
pub const ENV_CACHE_CAPACITY: &str = "NFSTORE_CACHE_CAPACITY";
pub const ENV_MAX_WRITE_LEN: &str = "NFSTORE_MAX_WRITE_LEN";
pub const ENV_WRITE_LOCK: &str = "NFSTORE_WRITE_LOCK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Data directory; trashed files live under `<root>/.trash`.
    pub root: PathBuf,
    /// Entries per file cache.
    pub cache_capacity: usize,
    /// Longest accepted command line, terminator excluded.
    pub max_line_len: usize,
    /// Largest WRITE payload accepted; larger payloads are drained and refused.
    pub max_write_len: u64,
    pub write_lock: WriteLockPolicy,
    /// How long in-flight sessions get to finish after shutdown is requested.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from(DEFAULT_ROOT),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_write_len: DEFAULT_MAX_WRITE_LEN,
            write_lock: WriteLockPolicy::Global,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Root-relative config for tests and embedding.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Self::default() }
    }

    pub fn listen_addr(&self) -> String { format!("{}:{}", self.bind, self.port) }

    pub fn load_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Resolve the effective configuration from process arguments (program name
    /// excluded) and an environment lookup.
    pub fn resolve<F>(args: &[String], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match flag_value(args, "--config") {
            Some(p) => Self::load_file(Path::new(&p))?,
            None => Self::default(),
        };

        if let Some(v) = env(ENV_ROOT).filter(|v| !v.trim().is_empty()) { cfg.root = PathBuf::from(v); }
        if let Some(v) = env(ENV_BIND) { cfg.bind = v; }
        if let Some(v) = env(ENV_PORT) { cfg.port = parse_num(ENV_PORT, &v)?; }
        if let Some(v) = env(ENV_CACHE_CAPACITY) { cfg.cache_capacity = parse_num(ENV_CACHE_CAPACITY, &v)?; }
        if let Some(v) = env(ENV_MAX_WRITE_LEN) { cfg.max_write_len = parse_num(ENV_MAX_WRITE_LEN, &v)?; }
        if let Some(v) = env(ENV_WRITE_LOCK) { cfg.write_lock = parse_policy(&v)?; }

        if let Some(root) = positional_root(args) { cfg.root = PathBuf::from(root); }
        if let Some(v) = flag_value(args, "--root") { cfg.root = PathBuf::from(v); }
        if let Some(v) = flag_value(args, "--bind") { cfg.bind = v; }
        if let Some(v) = flag_value(args, "--port") { cfg.port = parse_num("--port", &v)?; }
        if let Some(v) = flag_value(args, "--cache-capacity") { cfg.cache_capacity = parse_num("--cache-capacity", &v)?; }
        if let Some(v) = flag_value(args, "--max-write-len") { cfg.max_write_len = parse_num("--max-write-len", &v)?; }
        if let Some(v) = flag_value(args, "--write-lock") { cfg.write_lock = parse_policy(&v)?; }
        if let Some(v) = flag_value(args, "--shutdown-grace-ms") { cfg.shutdown_grace_ms = parse_num("--shutdown-grace-ms", &v)?; }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 { bail!("cache_capacity must be greater than zero"); }
        if self.max_line_len == 0 { bail!("max_line_len must be greater than zero"); }
        if self.root.as_os_str().is_empty() { bail!("root directory must not be empty"); }
        Ok(())
    }
}

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--config", "--root", "--bind", "--port", "--cache-capacity",
    "--max-write-len", "--write-lock", "--shutdown-grace-ms",
];

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn positional_root(args: &[String]) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if VALUE_FLAGS.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with('-') { return Some(a.clone()); }
        i += 1;
    }
    None
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    match raw.trim().parse::<T>() {
        Ok(v) => Ok(v),
        Err(_) => bail!("{} expects a number, got '{}'", name, raw),
    }
}

fn parse_policy(raw: &str) -> Result<WriteLockPolicy> {
    match raw.trim().to_lowercase().as_str() {
        "global" => Ok(WriteLockPolicy::Global),
        "per-file" | "per_file" | "perfile" => Ok(WriteLockPolicy::PerFile),
        other => bail!("unknown write lock policy '{}' (expected global or per-file)", other),
    }
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
