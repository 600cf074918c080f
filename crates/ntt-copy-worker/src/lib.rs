//! Copy Worker: the concurrent claim/process/commit loop (§4.6).
//!
//! Within one worker, processing is strictly sequential — no intra-worker
//! parallelism across inodes (§5). Concurrency comes from running several
//! worker instances against the same medium; they never block each other
//! because claims use `SELECT ... FOR UPDATE SKIP LOCKED` (§4.2).

mod error;
mod mime;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ntt_blob_store::{BlobHash, BlobStore, BlobStoreError, Hasher};
use ntt_catalog::{Catalog, CopyFailure, CopySuccess, ErrorType, InodeStatus, InodeWithPaths, PathRow};
use ntt_diagnostics::{DiagnosticService, KernelLogSource};

pub use error::{CopyWorkerError, Result};
pub use mime::sniff;

const STREAM_CHUNK: usize = 64 * 1024;
const MAX_RETRIES_EXCEEDED_SENTINEL: &str = "MAX_RETRIES_EXCEEDED";

/// One worker's summary after its claim loop exits (empty claims or
/// cancellation), used by the orchestrator to decide whether copying is
/// complete (§4.8).
#[derive(Debug, Default, Clone)]
pub struct WorkerSummary {
	pub batches_processed: u64,
	pub inodes_succeeded: u64,
	pub inodes_failed: u64,
	pub cancelled: bool,
}

enum InodeOutcome {
	Success(CopySuccess),
	Failure(CopyFailure),
}

/// Outcome of the blocking copy for one inode, kept separate from the
/// catalog's [`CopyFailure`] classification because the blob store itself
/// distinguishes conditions that must abort the whole worker (disk full,
/// read-only filesystem) from conditions that are just this inode's problem.
enum BlockingFailure {
	Fatal(BlobStoreError),
	Message(String),
}

fn classify_blob_store_error(e: BlobStoreError) -> BlockingFailure {
	if e.is_fatal_to_worker() {
		BlockingFailure::Fatal(e)
	} else {
		BlockingFailure::Message(e.to_string())
	}
}

/// Stream `canonical_path` into the blob store, hashing and sniffing as it
/// goes, then place a hardlink at every entry in `dest_paths` (§4.6 steps
/// 1-5). Runs on a blocking thread; see [`CopyWorker::process_one`].
fn copy_inode_blocking(
	blob_store: &BlobStore,
	canonical_path: &[u8],
	dest_paths: &[Vec<u8>],
) -> std::result::Result<(BlobHash, String, u32), BlockingFailure> {
	let path = PathBuf::from(std::ffi::OsStr::from_bytes(canonical_path));
	let mut file = File::open(&path).map_err(|e| BlockingFailure::Message(e.to_string()))?;

	let mut temp = tempfile::NamedTempFile::new_in(blob_store.root()).map_err(|e| BlockingFailure::Message(e.to_string()))?;

	let mut hasher = Hasher::new();
	let mut sniff_buf = Vec::with_capacity(mime::SNIFF_WINDOW);
	let mut chunk = [0u8; STREAM_CHUNK];

	loop {
		let n = file.read(&mut chunk).map_err(|e| BlockingFailure::Message(e.to_string()))?;
		if n == 0 {
			break;
		}
		let slice = &chunk[..n];
		hasher.update(slice);
		if sniff_buf.len() < mime::SNIFF_WINDOW {
			let take = (mime::SNIFF_WINDOW - sniff_buf.len()).min(slice.len());
			sniff_buf.extend_from_slice(&slice[..take]);
		}
		temp.write_all(slice).map_err(|e| BlockingFailure::Message(e.to_string()))?;
	}

	temp.as_file().sync_all().map_err(|e| BlockingFailure::Message(e.to_string()))?;

	let hash = hasher.finalize();
	let mime_type = mime::sniff(&sniff_buf);

	let temp_path = temp.path().to_path_buf();
	blob_store.insert_from_temp(&temp_path, hash).map_err(classify_blob_store_error)?;
	// insert_from_temp renames or removes temp_path itself; NamedTempFile's
	// own cleanup-on-drop silently tolerates the path already being gone.

	let mut hardlinks_placed = 0u32;
	for dest_bytes in dest_paths {
		let dest = PathBuf::from(std::ffi::OsStr::from_bytes(dest_bytes));
		blob_store.hardlink_to(hash, &dest).map_err(classify_blob_store_error)?;
		hardlinks_placed += 1;
	}

	Ok((hash, mime_type, hardlinks_placed))
}

pub struct CopyWorker<K: KernelLogSource> {
	worker_id: String,
	catalog: Catalog,
	blob_store: BlobStore,
	diagnostics: DiagnosticService<K>,
	batch_size: i64,
	empty_claim_exit_after: u32,
	per_file_timeout: Duration,
}

impl<K: KernelLogSource> CopyWorker<K> {
	pub fn new(
		worker_id: String,
		catalog: Catalog,
		blob_store: BlobStore,
		diagnostics: DiagnosticService<K>,
		batch_size: i64,
		empty_claim_exit_after: u32,
		per_file_timeout: Duration,
	) -> Self {
		Self {
			worker_id,
			catalog,
			blob_store,
			diagnostics,
			batch_size,
			empty_claim_exit_after,
			per_file_timeout,
		}
	}

	/// Run the claim/process/commit loop until `empty_claim_exit_after`
	/// consecutive empty claims, or until `cancel` is observed between
	/// inodes (§4.6, §5).
	pub async fn run(&self, medium_hash: &str, cancel: Arc<AtomicBool>) -> Result<WorkerSummary> {
		tracing::info!(worker_id = %self.worker_id, %medium_hash, "copy worker starting");
		let mut summary = WorkerSummary::default();
		let mut consecutive_empty = 0u32;

		loop {
			if cancel.load(Ordering::SeqCst) {
				summary.cancelled = true;
				break;
			}

			let claimed = self.catalog.claim_batch(medium_hash, &self.worker_id, self.batch_size).await?;
			if claimed.is_empty() {
				consecutive_empty += 1;
				if consecutive_empty >= self.empty_claim_exit_after {
					break;
				}
				continue;
			}
			consecutive_empty = 0;

			let outcome = self.run_batch(medium_hash, claimed, &cancel).await?;
			summary.batches_processed += 1;
			summary.inodes_succeeded += outcome.0;
			summary.inodes_failed += outcome.1;

			if cancel.load(Ordering::SeqCst) {
				summary.cancelled = true;
				break;
			}
		}

		tracing::info!(worker_id = %self.worker_id, %medium_hash, batches = summary.batches_processed, succeeded = summary.inodes_succeeded, failed = summary.inodes_failed, cancelled = summary.cancelled, "copy worker exiting");
		Ok(summary)
	}

	/// Process one claimed batch and commit it. Returns `(n_succeeded,
	/// n_failed)`. Any inode left un-started because `cancel` fired mid-batch
	/// is released, not committed, and excluded from the commit's claimed-ino
	/// set (§5 "releases all still-claimed inodes before exiting").
	async fn run_batch(&self, medium_hash: &str, claimed: Vec<InodeWithPaths>, cancel: &Arc<AtomicBool>) -> Result<(u64, u64)> {
		// Defensive construction (§4.6, §9): every claimed ino starts with an
		// explicit placeholder outcome. A bug that forgets to overwrite one
		// fails the batch commit loudly via Catalog::commit_batch's identity
		// check, instead of silently vanishing and being re-claimed forever.
		let mut outcomes: HashMap<i64, CopyFailure> = claimed
			.iter()
			.map(|c| {
				(
					c.inode.ino,
					CopyFailure {
						ino: c.inode.ino,
						status: InodeStatus::FailedRetryable,
						error_type: ErrorType::Unknown,
						error_message: "internal: inode was claimed but never processed".to_string(),
					},
				)
			})
			.collect();
		let mut successes: Vec<CopySuccess> = Vec::new();
		let mut processed_inos: Vec<i64> = Vec::new();
		let mut released_inos: Vec<i64> = Vec::new();

		for claimed_inode in &claimed {
			if cancel.load(Ordering::SeqCst) {
				released_inos.push(claimed_inode.inode.ino);
				continue;
			}

			match self.process_one(medium_hash, claimed_inode).await {
				Ok(InodeOutcome::Success(success)) => {
					outcomes.remove(&success.ino);
					processed_inos.push(success.ino);
					successes.push(success);
				}
				Ok(InodeOutcome::Failure(failure)) => {
					processed_inos.push(failure.ino);
					outcomes.insert(failure.ino, failure);
				}
				Err(e) => {
					// Fatal blob-store condition (disk full, read-only fs):
					// nothing in this batch has been committed yet, so every
					// claimed ino, processed or not, is released rather than
					// partially committed (§4.1, §7).
					tracing::error!(worker_id = %self.worker_id, %medium_hash, error = %e, "aborting worker on fatal blob store condition");
					for c in &claimed {
						self.catalog.release_claim(medium_hash, c.inode.ino).await.ok();
					}
					return Err(e);
				}
			}
		}

		for ino in &released_inos {
			self.catalog.release_claim(medium_hash, *ino).await?;
		}

		let failures: Vec<CopyFailure> = outcomes.into_values().collect();
		let n_succeeded = successes.len() as u64;
		let n_failed = failures.len() as u64;

		// Pin inodes that crossed the absolute retry cap so they are never
		// re-claimed, regardless of classification (§4.5, §4.6).
		let pinned_cap: Vec<i64> = failures
			.iter()
			.filter(|f| self.diagnostics.is_absolute_cap_reached(retry_count_of(&claimed, f.ino)))
			.map(|f| f.ino)
			.collect();

		match self.commit_with_retry(medium_hash, &processed_inos, &successes, &failures).await {
			Ok(()) => {}
			Err(e) => {
				for ino in &processed_inos {
					self.catalog.release_claim(medium_hash, *ino).await?;
				}
				return Err(e);
			}
		}

		for ino in pinned_cap {
			self.catalog.pin_claim(medium_hash, ino, MAX_RETRIES_EXCEEDED_SENTINEL).await.ok();
		}

		Ok((n_succeeded, n_failed))
	}

	/// Commit failures cause one retry of the commit itself (not the
	/// underlying copy work), per §7 "database commit failures within a
	/// batch cause the worker to release its claims and retry the commit
	/// once; a second failure terminates the worker."
	async fn commit_with_retry(
		&self,
		medium_hash: &str,
		claimed_inos: &[i64],
		successes: &[CopySuccess],
		failures: &[CopyFailure],
	) -> Result<()> {
		match self.catalog.commit_batch(medium_hash, claimed_inos, successes, failures).await {
			Ok(()) => Ok(()),
			Err(_first_err) => self
				.catalog
				.commit_batch(medium_hash, claimed_inos, successes, failures)
				.await
				.map_err(CopyWorkerError::CommitRetryExhausted),
		}
	}

	/// Copy one inode end to end: open, stream+hash, insert into the blob
	/// store, place every non-excluded path's hardlink (§4.6 steps 1-5).
	///
	/// The actual I/O runs on a blocking thread under a soft timeout — a
	/// wedged read off a failing drive must not stall the whole worker's
	/// async loop (§4.6 "soft per-file timeout").
	async fn process_one(&self, medium_hash: &str, claimed: &InodeWithPaths) -> Result<InodeOutcome> {
		let device_hint = format!("dev{}", claimed.inode.dev);
		let retry_count = retry_count_of_row(&claimed.inode.errors);

		let canonical = match choose_canonical_path(&claimed.paths) {
			Some(p) => p,
			None => {
				let failure = self
					.classify_failure(medium_hash, claimed.inode.ino, "path_error: no non-excluded path", &device_hint, retry_count)
					.await;
				return Ok(InodeOutcome::Failure(failure));
			}
		};
		let canonical_path = canonical.path_bytes.clone();
		let dest_paths: Vec<Vec<u8>> = claimed.paths.iter().filter(|p| p.exclude_reason.is_none()).map(|p| p.path_bytes.clone()).collect();
		let blob_store = self.blob_store.clone();

		let blocking = tokio::task::spawn_blocking(move || copy_inode_blocking(&blob_store, &canonical_path, &dest_paths));

		let outcome = match tokio::time::timeout(self.per_file_timeout, blocking).await {
			Ok(Ok(inner)) => inner,
			Ok(Err(join_err)) => Err(BlockingFailure::Message(join_err.to_string())),
			Err(_elapsed) => Err(BlockingFailure::Message(format!("timed out after {:?}", self.per_file_timeout))),
		};

		match outcome {
			Ok((hash, mime_type, hardlinks_placed)) => Ok(InodeOutcome::Success(CopySuccess {
				ino: claimed.inode.ino,
				blob_id: hash.to_hex(),
				mime_type: Some(mime_type),
				hardlinks_placed,
			})),
			Err(BlockingFailure::Fatal(e)) => Err(CopyWorkerError::BlobStoreFatal(e)),
			Err(BlockingFailure::Message(message)) => {
				let failure = self.classify_failure(medium_hash, claimed.inode.ino, &message, &device_hint, retry_count).await;
				Ok(InodeOutcome::Failure(failure))
			}
		}
	}

	async fn classify_failure(&self, medium_hash: &str, ino: i64, message: &str, device_hint: &str, retry_count: u32) -> CopyFailure {
		match self.diagnostics.evaluate(medium_hash, ino, message, device_hint, retry_count, &self.worker_id).await {
			Ok(c) => CopyFailure {
				ino,
				status: c.status,
				error_type: c.error_type,
				error_message: message.to_string(),
			},
			Err(e) => CopyFailure {
				ino,
				status: InodeStatus::FailedRetryable,
				error_type: ErrorType::Unknown,
				error_message: format!("{message} (diagnostic service error: {e})"),
			},
		}
	}
}

/// The first non-excluded path, in deterministic (lexicographic) byte
/// order, per §4.6 step 1 "a canonical path ... deterministically".
fn choose_canonical_path(paths: &[PathRow]) -> Option<&PathRow> {
	paths
		.iter()
		.filter(|p| p.exclude_reason.is_none())
		.min_by(|a, b| a.path_bytes.cmp(&b.path_bytes))
}

fn retry_count_of_row(errors: &serde_json::Value) -> u32 {
	errors.as_array().map(|a| a.len() as u32).unwrap_or(0)
}

fn retry_count_of(claimed: &[InodeWithPaths], ino: i64) -> u32 {
	claimed
		.iter()
		.find(|c| c.inode.ino == ino)
		.map(|c| retry_count_of_row(&c.inode.errors))
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn path_row(bytes: &[u8], excluded: bool) -> PathRow {
		PathRow {
			medium_hash: "x".to_string(),
			ino: 1,
			path_bytes: bytes.to_vec(),
			exclude_reason: if excluded { Some("scratch".to_string()) } else { None },
			path_error: None,
		}
	}

	#[test]
	fn chooses_smallest_non_excluded_path_deterministically() {
		let paths = vec![
			path_row(b"/mnt/x/z.txt", false),
			path_row(b"/mnt/x/a.txt", false),
			path_row(b"/mnt/x/aaa.txt", true),
		];
		let chosen = choose_canonical_path(&paths).unwrap();
		assert_eq!(chosen.path_bytes, b"/mnt/x/a.txt");
	}

	#[test]
	fn returns_none_when_every_path_excluded() {
		let paths = vec![path_row(b"/mnt/x/a.txt", true)];
		assert!(choose_canonical_path(&paths).is_none());
	}

	#[test]
	fn retry_count_derived_from_errors_array_length() {
		let empty = serde_json::json!([]);
		assert_eq!(retry_count_of_row(&empty), 0);
		let three = serde_json::json!(["a", "b", "c"]);
		assert_eq!(retry_count_of_row(&three), 3);
	}
}
