use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use lmt_core::config::EngineConfig;
use lmt_data::reader::find_export_files;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map a `--log-level` name onto an [`EnvFilter`] directive.
///
/// Python-style names (`WARNING`, `CRITICAL`) are accepted; anything
/// unrecognised is passed through for `EnvFilter` to judge.
fn level_directive(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" => "info".to_string(),
        "WARNING" | "WARN" => "warn".to_string(),
        "ERROR" | "CRITICAL" => "error".to_string(),
        _ => log_level.to_lowercase(),
    }
}

/// Initialise the global `tracing` subscriber, writing to stderr so stdout
/// carries only the JSON report.
///
/// Falls back to `"warn"` if the level string is not a valid directive.
pub fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level_directive(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

// ── Configuration ──────────────────────────────────────────────────────────────

/// Default configuration file: `~/.lmt-stats/config.json`.
pub fn default_config_path() -> PathBuf {
    config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
}

/// Configuration path rooted at `base_dir` (used for testing).
pub fn config_path_in(base_dir: &Path) -> PathBuf {
    base_dir.join(".lmt-stats").join("config.json")
}

/// Resolve the engine configuration.
///
/// An explicit path must exist and parse. Otherwise the default file is used
/// when present, and built-in defaults when it is not.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = explicit {
        return EngineConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()));
    }

    let default_path = default_config_path();
    if default_path.is_file() {
        tracing::debug!("Using config {}", default_path.display());
        return EngineConfig::load_from(&default_path)
            .with_context(|| format!("loading config {}", default_path.display()));
    }

    Ok(EngineConfig::default())
}

// ── Export discovery ───────────────────────────────────────────────────────────

/// The export files named by `path`: the file itself, or every `*.csv`
/// beneath a directory.
pub fn discover_exports(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_dir() {
        let files = find_export_files(path);
        if files.is_empty() {
            bail!("no .csv exports found under {}", path.display());
        }
        tracing::info!("Found {} export files under {}", files.len(), path.display());
        return Ok(files);
    }
    Ok(vec![path.to_path_buf()])
}

// ── Tests ──────────────────────────────────────────────────────────────────────
