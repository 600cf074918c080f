//! Shared configuration and logging bootstrap for the NTT pipeline.
//!
//! Every other crate in the workspace takes an [`NttConfig`] (or a narrow
//! slice of it) rather than reading environment variables itself, so that
//! the orchestrate/copy/recover-failed CLI commands all see one consistent
//! picture of thresholds, paths and exclusion patterns.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod exclude;
pub use exclude::{default_patterns, ExclusionCategory, ExclusionPattern};

/// Health thresholds applied to the imaging collaborator's recovery map.
///
/// The spec deliberately leaves the exact `% rescued` → health mapping as
/// policy (§9 Open Questions), so it lives here as configuration rather
/// than being baked into `ntt-config`'s callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthThresholds {
	/// Minimum fraction (0.0-1.0) rescued to be considered `ok`.
	pub ok_min_rescued: f64,
	/// Minimum fraction (0.0-1.0) rescued to be considered `incomplete`
	/// rather than `failed`.
	pub incomplete_min_rescued: f64,
}

impl Default for HealthThresholds {
	fn default() -> Self {
		Self {
			ok_min_rescued: 0.9999,
			incomplete_min_rescued: 0.90,
		}
	}
}

/// Retry policy for the copy worker / diagnostic service (§4.5, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
	/// `retry_count` at which a full diagnostic sweep runs.
	pub checkpoint: u32,
	/// Absolute retry cap; crossing it forces `failed_retryable` and the
	/// inode is never re-claimed again.
	pub absolute_cap: u32,
	/// Consecutive empty claims before a copy worker exits cleanly.
	pub empty_claim_exit_after: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			checkpoint: 10,
			absolute_cap: 50,
			empty_claim_exit_after: 3,
		}
	}
}

/// Top-level configuration for the NTT pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NttConfig {
	/// Config schema version, bumped whenever a migration is needed.
	pub version: u32,
	/// Postgres connection string for the catalog.
	pub database_url: String,
	/// Root of the content-addressed blob store (§4.1).
	pub blob_store_root: PathBuf,
	/// Root under which media images are mounted (§6).
	pub mount_root: PathBuf,
	/// Path to the external mount helper binary (§6 Mount collaborator).
	pub mount_helper_path: PathBuf,
	/// Directory holding the imaging collaborator's `.map` recovery logs.
	pub map_dir: PathBuf,
	/// Directory used for working data: raw streams, temp files, logs.
	pub data_dir: PathBuf,
	pub health: HealthThresholds,
	pub retry: RetryPolicy,
	/// Inodes claimed per batch by a single copy worker (§4.6).
	pub batch_size: u32,
	/// Exclusion patterns applied by the loader (§6).
	pub exclusion_patterns: Vec<ExclusionPattern>,
	/// Soft per-file read timeout for the copy worker (§4.6, §5).
	pub per_file_timeout_secs: u64,
	/// Prefix for this process's `claimed_by` worker id, so claims from
	/// different hosts or runs are distinguishable in the catalog.
	pub worker_id_prefix: String,
	pub log_level: String,
}

impl NttConfig {
	fn target_version() -> u32 {
		1
	}

	/// Build the default configuration rooted at `data_dir`.
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			database_url: "postgres://ntt@localhost/ntt".to_string(),
			blob_store_root: data_dir.join("blobs"),
			mount_root: PathBuf::from("/mnt/ntt"),
			mount_helper_path: PathBuf::from("/usr/local/libexec/ntt-mount-helper"),
			map_dir: data_dir.join("maps"),
			data_dir,
			health: HealthThresholds::default(),
			retry: RetryPolicy::default(),
			batch_size: 256,
			exclusion_patterns: exclude::default_patterns(),
			per_file_timeout_secs: 30,
			worker_id_prefix: "ntt".to_string(),
			log_level: "info".to_string(),
		}
	}

	/// Load configuration from `path`, creating a default one on first run.
	///
	/// Mirrors the create-if-missing / migrate-if-stale shape used
	/// throughout the pipeline's configuration loading: never silently
	/// overwrite an existing, populated config.
	pub fn load_or_create(path: &Path) -> Result<Self> {
		if path.exists() {
			info!(path = %path.display(), "loading NTT config");
			let raw = fs::read_to_string(path)
				.with_context(|| format!("reading config at {}", path.display()))?;
			let mut config: Self =
				toml::from_str(&raw).with_context(|| format!("parsing config at {}", path.display()))?;
			if config.version < Self::target_version() {
				warn!(
					from = config.version,
					to = Self::target_version(),
					"migrating NTT config"
				);
				config.migrate()?;
				config.save(path)?;
			}
			Ok(config)
		} else {
			let data_dir = path
				.parent()
				.map(Path::to_path_buf)
				.unwrap_or_else(|| PathBuf::from("."));
			let config = Self::default_with_dir(data_dir);
			config.save(path)?;
			info!(path = %path.display(), "wrote default NTT config");
			Ok(config)
		}
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			v if v == Self::target_version() => Ok(()),
			v => Err(anyhow!("unknown NTT config version: {v}")),
		}
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.with_context(|| format!("creating config directory {}", parent.display()))?;
		}
		let toml = toml::to_string_pretty(self).context("serializing NTT config")?;
		fs::write(path, toml).with_context(|| format!("writing config to {}", path.display()))?;
		Ok(())
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn raw_streams_dir(&self) -> PathBuf {
		self.data_dir.join("raw")
	}

	pub fn archive_dir(&self) -> PathBuf {
		self.data_dir.join("archives")
	}

	pub fn ensure_directories(&self) -> std::io::Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		fs::create_dir_all(self.logs_dir())?;
		fs::create_dir_all(self.raw_streams_dir())?;
		fs::create_dir_all(self.archive_dir())?;
		fs::create_dir_all(&self.blob_store_root)?;
		fs::create_dir_all(&self.map_dir)?;
		Ok(())
	}
}

/// Install a global `tracing` subscriber: pretty logs to stderr plus a
/// daily-rolling file sink under `config.logs_dir()`. Returns the guard
/// that must be kept alive for the file writer to flush on drop.
pub fn init_logging(config: &NttConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
	use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

	fs::create_dir_all(config.logs_dir())?;
	let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "ntt.log");
	let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_target(true))
		.with(fmt::layer().with_writer(non_blocking).with_ansi(false))
		.try_init()
		.map_err(|e| anyhow!("installing tracing subscriber: {e}"))?;

	Ok(guard)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_has_sane_thresholds() {
		let cfg = NttConfig::default_with_dir(PathBuf::from("/tmp/ntt-test"));
		assert!(cfg.health.ok_min_rescued > cfg.health.incomplete_min_rescued);
		assert_eq!(cfg.retry.checkpoint, 10);
		assert_eq!(cfg.retry.absolute_cap, 50);
	}

	#[test]
	fn load_or_create_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("ntt.toml");

		let created = NttConfig::load_or_create(&path).unwrap();
		assert!(path.exists());

		let loaded = NttConfig::load_or_create(&path).unwrap();
		assert_eq!(created.database_url, loaded.database_url);
		assert_eq!(created.batch_size, loaded.batch_size);
	}
}
