//! Orchestrator (§4.8): drives one medium through
//! `imaged → mounted → enumerated → loaded → copying → copied → archived`.
//! Every transition is idempotent and resumable: a re-run after a crash
//! inspects the catalog (and the `.raw` stream on disk) and resumes from
//! the first unsatisfied postcondition (§5 "Resumability").

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use ntt_archiver::Archiver;
use ntt_blob_store::BlobStore;
use ntt_catalog::{Catalog, MediumHealth};
use ntt_config::NttConfig;
use ntt_copy_worker::{CopyWorker, WorkerSummary};
use ntt_diagnostics::{DiagnosticService, KernelLogSource};
use ntt_loader::Loader;

use crate::error::{NttError, Result};
use crate::imaging::MapSource;
use crate::mount::{MountCollaborator, MountReport};

const STREAM_CHUNK: usize = 64 * 1024;

fn hash_image_blocking(image_path: &Path) -> Result<ntt_blob_store::BlobHash> {
	use std::io::Read;
	let mut file = std::fs::File::open(image_path)?;
	let mut hasher = ntt_blob_store::Hasher::new();
	let mut buf = [0u8; STREAM_CHUNK];
	loop {
		let n = file.read(&mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hasher.finalize())
}

fn enumerate_blocking(medium_hash: &str, mount_points: &[PathBuf], raw_path: &Path) -> Result<ntt_enumerator::EnumerationStats> {
	if let Some(parent) = raw_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let mut out = std::io::BufWriter::new(std::fs::File::create(raw_path)?);
	let mut stats = ntt_enumerator::EnumerationStats::default();
	for mount_point in mount_points {
		let partition_stats = ntt_enumerator::enumerate_into(mount_point, &mut out)
			.map_err(|e| NttError::MountFailed { medium_hash: medium_hash.to_string(), reason: e.to_string() })?;
		stats.records_written += partition_stats.records_written;
		stats.unreadable_entries += partition_stats.unreadable_entries;
		stats.mount_boundaries_skipped += partition_stats.mount_boundaries_skipped;
	}
	std::io::Write::flush(&mut out)?;
	if stats.records_written == 0 {
		return Err(NttError::MountFailed {
			medium_hash: medium_hash.to_string(),
			reason: "enumerator produced an empty .raw stream".to_string(),
		});
	}
	Ok(stats)
}

/// Coarse stage reported back to the CLI once `orchestrate` returns; derived
/// from catalog/filesystem state, never stored as its own column (§4.8
/// states are a read of existing postconditions, not an extra source of
/// truth that could drift from them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Imaged,
	Mounted,
	Enumerated,
	Loaded,
	Copying,
	Copied,
	Archived,
}

#[derive(Debug, Clone)]
pub struct OrchestrationReport {
	pub medium_hash: String,
	pub final_stage: Stage,
	pub copy_summary: Option<WorkerSummary>,
}

pub struct Orchestrator<M, S, K> {
	catalog: Catalog,
	config: NttConfig,
	mount: M,
	maps: S,
	kernel_log: K,
	blob_store: BlobStore,
}

impl<M: MountCollaborator, S: MapSource, K: KernelLogSource + Clone> Orchestrator<M, S, K> {
	pub fn new(catalog: Catalog, config: NttConfig, mount: M, maps: S, kernel_log: K) -> Self {
		let blob_store = BlobStore::new(config.blob_store_root.clone());
		Self {
			catalog,
			config,
			mount,
			maps,
			kernel_log,
			blob_store,
		}
	}

	fn raw_stream_path(&self, medium_hash: &str) -> PathBuf {
		self.config.raw_streams_dir().join(format!("{medium_hash}.raw"))
	}

	/// Run the full state machine for `medium_hash`. `force` bypasses the
	/// §6 refusal to mount/process a `failed`-health medium.
	pub async fn orchestrate(&self, medium_hash: &str, force: bool) -> Result<OrchestrationReport> {
		let medium = self.catalog.get_medium(medium_hash).await?;

		if medium.archived.is_some() {
			tracing::info!(%medium_hash, "medium already archived");
			return Ok(OrchestrationReport {
				medium_hash: medium_hash.to_string(),
				final_stage: Stage::Archived,
				copy_summary: None,
			});
		}

		self.check_health(medium_hash, force).await?;
		self.ensure_image_digest(medium_hash, &medium).await?;

		let report = self.do_mount(medium_hash, &medium.image_path).await?;
		let raw_path = self.raw_stream_path(medium_hash);

		let medium = self.catalog.get_medium(medium_hash).await?;
		if medium.enum_done.is_none() {
			self.enumerate(medium_hash, &report, &raw_path).await?;
			self.load(medium_hash, &raw_path).await?;
		}

		let mut copy_summary = None;
		let medium = self.catalog.get_medium(medium_hash).await?;
		if medium.copy_done.is_none() {
			let summary = self.run_copy_worker(medium_hash).await?;
			self.finalize_copy_if_complete(medium_hash).await?;
			copy_summary = Some(summary);
		}

		let medium = self.catalog.get_medium(medium_hash).await?;
		let final_stage = if medium.copy_done.is_none() {
			Stage::Copying
		} else {
			self.unmount_and_archive(medium_hash, &raw_path, &report).await?;
			Stage::Archived
		};

		Ok(OrchestrationReport {
			medium_hash: medium_hash.to_string(),
			final_stage,
			copy_summary,
		})
	}

	/// Just the copy stage (§6 `copy` command): mounts (idempotently, for a
	/// worker process spawned separately from `orchestrate`'s) and runs one
	/// copy worker to exhaustion. Does not unmount or archive; other workers
	/// may still be running against this medium.
	pub async fn copy_only(&self, medium_hash: &str, force: bool) -> Result<WorkerSummary> {
		let medium = self.catalog.get_medium(medium_hash).await?;
		self.check_health(medium_hash, force).await?;
		self.do_mount(medium_hash, &medium.image_path).await?;
		let summary = self.run_copy_worker(medium_hash).await?;
		self.finalize_copy_if_complete(medium_hash).await?;
		Ok(summary)
	}

	async fn check_health(&self, medium_hash: &str, force: bool) -> Result<()> {
		let map = self
			.maps
			.read_map(medium_hash)
			.map_err(|e| NttError::MountFailed {
				medium_hash: medium_hash.to_string(),
				reason: format!("reading recovery map: {e}"),
			})?;
		let health = map.health(&self.config.health);
		self.catalog.set_health(medium_hash, health).await?;
		self.catalog
			.merge_problems(medium_hash, serde_json::json!({ "fraction_rescued": map.fraction_rescued() }))
			.await?;
		if health == MediumHealth::Failed && !force {
			return Err(NttError::Refused {
				medium_hash: medium_hash.to_string(),
				reason: "imaging health is failed; pass --force to process anyway".to_string(),
			});
		}
		Ok(())
	}

	/// Records a full-content BLAKE3 digest of the image under
	/// `medium.problems.image_digest` the first time this medium is
	/// orchestrated, idempotently. This is the digest the Archiver later
	/// reverifies against (§4.7 precondition c) since `medium_hash` itself
	/// is a hybrid fingerprint this crate has no way to re-derive from the
	/// image's bytes alone (see `ntt-archiver`'s preconditions module).
	async fn ensure_image_digest(&self, medium_hash: &str, medium: &ntt_catalog::Medium) -> Result<()> {
		if medium.problems.get(ntt_archiver::IMAGE_DIGEST_KEY).is_some() {
			return Ok(());
		}
		let image_path = PathBuf::from(&medium.image_path);
		let digest = tokio::task::spawn_blocking(move || hash_image_blocking(&image_path))
			.await
			.expect("image hashing task panicked")?;
		self.catalog
			.merge_problems(medium_hash, serde_json::json!({ ntt_archiver::IMAGE_DIGEST_KEY: digest.to_hex() }))
			.await?;
		Ok(())
	}

	async fn do_mount(&self, medium_hash: &str, image_path: &str) -> Result<MountReport> {
		let report = self
			.mount
			.mount(medium_hash, Path::new(image_path), &self.config.mount_root)
			.map_err(|e| NttError::MountFailed {
				medium_hash: medium_hash.to_string(),
				reason: e.to_string(),
			})?;
		if !report.any_mounted() {
			return Err(NttError::MountFailed {
				medium_hash: medium_hash.to_string(),
				reason: "mount collaborator reported no mounted partitions".to_string(),
			});
		}
		tracing::info!(%medium_hash, partitions = report.partitions.len(), "mounted");
		Ok(report)
	}

	/// §4.3/§4.8: walk every mounted partition into one `.raw` stream.
	/// Refuses to re-enumerate into a stream that already has content, since
	/// the enumerator has no checkpoint and a partial re-run would silently
	/// duplicate records ahead of the loader's own dedup step. Runs on a
	/// blocking thread since the walk is synchronous filesystem I/O (§5
	/// "coroutines / async I/O not required"; the surrounding orchestrator
	/// is async only at its database/mount boundaries).
	async fn enumerate(&self, medium_hash: &str, report: &MountReport, raw_path: &Path) -> Result<()> {
		if raw_path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
			tracing::info!(%medium_hash, path = %raw_path.display(), "raw stream already populated, skipping enumeration");
			return Ok(());
		}
		let medium_hash = medium_hash.to_string();
		let mount_points = report.mounted_paths();
		let raw_path = raw_path.to_path_buf();
		let stats = tokio::task::spawn_blocking(move || enumerate_blocking(&medium_hash, &mount_points, &raw_path))
			.await
			.expect("enumeration task panicked")?;
		tracing::info!(records = stats.records_written, unreadable = stats.unreadable_entries, "enumeration complete");
		Ok(())
	}

	async fn load(&self, medium_hash: &str, raw_path: &Path) -> Result<()> {
		let loader = Loader::new(self.catalog.clone(), self.config.exclusion_patterns.clone())?;
		let mut raw = std::io::BufReader::new(std::fs::File::open(raw_path)?);
		let report = loader.load(medium_hash, &mut raw).await?;
		tracing::info!(
			%medium_hash,
			records = report.records_staged,
			duplicates = report.duplicate_paths,
			non_file = report.non_file_inodes,
			excluded = report.all_paths_excluded_inodes,
			"load complete"
		);
		Ok(())
	}

	async fn run_copy_worker(&self, medium_hash: &str) -> Result<WorkerSummary> {
		let diagnostics = DiagnosticService::new(
			self.catalog.clone(),
			self.kernel_log.clone(),
			self.config.retry.checkpoint,
			self.config.retry.absolute_cap,
		);
		let worker_id = format!("{}-{}", self.config.worker_id_prefix, std::process::id());
		let worker = CopyWorker::new(
			worker_id,
			self.catalog.clone(),
			self.blob_store.clone(),
			diagnostics,
			self.config.batch_size as i64,
			self.config.retry.empty_claim_exit_after,
			Duration::from_secs(self.config.per_file_timeout_secs),
		);
		let cancel = Arc::new(AtomicBool::new(false));
		Ok(worker.run(medium_hash, cancel).await?)
	}

	/// §4.8 "on transition to `copied`, the orchestrator verifies that
	/// `count(unclaimed copyable inodes) == 0`": checked here as
	/// `pending_count == 0` (stronger: no pending inode at all, claimed or
	/// not) together with no live claim outstanding, matching the
	/// Archiver's own readiness check.
	async fn finalize_copy_if_complete(&self, medium_hash: &str) -> Result<()> {
		let pending = self.catalog.pending_count(medium_hash).await?;
		let live_claims = self.catalog.live_claims_count(medium_hash).await?;
		if pending == 0 && live_claims == 0 {
			self.catalog.set_copy_done(medium_hash).await?;
			tracing::info!(%medium_hash, "copy stage complete");
		} else {
			tracing::info!(%medium_hash, pending, live_claims, "copy stage not yet complete");
		}
		Ok(())
	}

	async fn unmount_and_archive(&self, medium_hash: &str, raw_path: &Path, report: &MountReport) -> Result<()> {
		self.mount.unmount(medium_hash, report).map_err(|e| NttError::MountFailed {
			medium_hash: medium_hash.to_string(),
			reason: e.to_string(),
		})?;
		let archiver = Archiver::new(self.catalog.clone(), self.config.archive_dir());
		let outcome = archiver.archive(medium_hash, raw_path, &report.mounted_paths()).await?;
		tracing::info!(%medium_hash, archive_path = %outcome.archive_path.display(), digest = %outcome.digest, "archived");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::imaging::{FakeMapSource, MapRange, RecoveryMap};
	use crate::mount::{FakeMount, Layout, PartitionInfo, PartitionStatus};
	use ntt_diagnostics::FakeKernelLog;

	fn mounted_report() -> MountReport {
		MountReport {
			layout: Layout::Single,
			partitions: vec![PartitionInfo {
				num: 1,
				device: "/dev/loop0".to_string(),
				mount: PathBuf::from("/mnt/ntt/abc123"),
				fstype: "ext4".to_string(),
				status: PartitionStatus::Mounted,
			}],
		}
	}

	#[test]
	fn failed_recovery_map_maps_to_failed_health() {
		let config = NttConfig::default_with_dir(PathBuf::from("/tmp/ntt-orch-test"));
		let map = RecoveryMap { ranges: vec![MapRange { size: 1000, rescued: false }] };
		assert_eq!(map.health(&config.health), MediumHealth::Failed);
	}

	#[test]
	fn fake_mount_with_no_partitions_is_not_any_mounted() {
		let empty = MountReport { layout: Layout::Single, partitions: vec![] };
		assert!(!empty.any_mounted());
		assert!(mounted_report().any_mounted());
	}

	// Everything below this point needs a live Postgres instance; these are
	// integration tests meant to run with `DATABASE_URL` pointed at a
	// scratch database, not in the default unit-test pass.

	#[tokio::test]
	#[ignore = "requires a live Postgres instance; set DATABASE_URL"]
	async fn orchestrate_happy_path_reaches_archived() {
		let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
		let catalog = Catalog::connect(&url).await.unwrap();
		catalog.migrate().await.unwrap();

		let dir = tempfile::tempdir().unwrap();
		let mount_dir = dir.path().join("mount");
		std::fs::create_dir_all(&mount_dir).unwrap();
		std::fs::write(mount_dir.join("a.txt"), b"hello\n").unwrap();

		let medium_hash = "abad1dea0123456789abcdef0123456789abcdef0123456789abcdef012345";
		catalog
			.register_medium(medium_hash, "test-medium", dir.path().join("image.dd").to_str().unwrap())
			.await
			.unwrap();
		std::fs::write(dir.path().join("image.dd"), b"fake image bytes").unwrap();

		let mut config = NttConfig::default_with_dir(dir.path().to_path_buf());
		config.database_url = url;
		config.ensure_directories().unwrap();

		let mut report = mounted_report();
		report.partitions[0].mount = mount_dir.clone();
		let mount = FakeMount::new(report);
		let maps = FakeMapSource(RecoveryMap { ranges: vec![MapRange { size: 1000, rescued: true }] });

		let orchestrator = Orchestrator::new(catalog, config, mount, maps, FakeKernelLog(vec![]));
		let result = orchestrator.orchestrate(medium_hash, false).await.unwrap();
		assert_eq!(result.final_stage, Stage::Archived);
	}
}
