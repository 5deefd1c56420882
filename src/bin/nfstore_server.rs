//!
//! nfstore server binary
//! ---------------------
//! Command-line entry point for the file-storage server. Configuration comes
//! from CLI flags, environment variables and an optional JSON file.

use anyhow::Result;
use std::env;

use nfstore::config::{has_flag, ServerConfig};

const USAGE: &str = "nfstore server

USAGE:
  nfstore_server [ROOT] [--root PATH] [--bind ADDR] [--port N] [--cache-capacity N]
                 [--max-write-len N] [--write-lock global|per-file]
                 [--shutdown-grace-ms N] [--config FILE]

OPTIONS:
  ROOT, --root PATH       Storage directory (env: NFS_PATH, default data)
  --bind ADDR             Listen address (env: NFSTORE_BIND, default 127.0.0.1)
  --port N                Listen port (env: NFSTORE_PORT, default 9090)
  --cache-capacity N      Cached ranges per file (env: NFSTORE_CACHE_CAPACITY, default 128)
  --max-write-len N       Largest accepted WRITE payload (env: NFSTORE_MAX_WRITE_LEN)
  --write-lock POLICY     global or per-file (env: NFSTORE_WRITE_LOCK, default global)
  --shutdown-grace-ms N   Time sessions get to finish on Ctrl+C (default 5000)
  --config FILE           JSON file with any of the settings above
";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().skip(1).collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = ServerConfig::resolve(&args, |k| env::var(k).ok())?;
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    tracing::info!(
        target: "nfstore",
        "nfstore starting: RUST_LOG='{}', listen={}, root='{}'",
        rust_log, config.listen_addr(), config.root.display()
    );
    nfstore::server::run(config).await
}
