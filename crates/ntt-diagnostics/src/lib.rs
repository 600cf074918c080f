//! Diagnostic Service: turns exceptions and kernel-log evidence into
//! retry/skip decisions and records them (§4.5).

mod classify;
mod error;
mod kernel_log;

use chrono::Utc;
use ntt_catalog::Catalog;

pub use classify::{classify, Classification};
pub use error::{DiagnosticError, Result};
pub use kernel_log::{DmesgKernelLog, FakeKernelLog, KernelLogSource};

/// `retry_count` at which a full sweep runs, looking for unrecoverable
/// corroborating evidence before the absolute cap would otherwise be hit
/// (§4.5 "checkpoint").
pub const DEFAULT_CHECKPOINT: u32 = 10;

/// Regardless of classification, an inode at this retry count is pinned and
/// never re-claimed again (§4.5 "absolute cap", §9 "non-negotiable").
pub const DEFAULT_ABSOLUTE_CAP: u32 = 50;

pub struct DiagnosticService<K: KernelLogSource> {
	catalog: Catalog,
	kernel_log: K,
	checkpoint: u32,
	absolute_cap: u32,
}

impl<K: KernelLogSource> DiagnosticService<K> {
	pub fn new(catalog: Catalog, kernel_log: K, checkpoint: u32, absolute_cap: u32) -> Self {
		Self {
			catalog,
			kernel_log,
			checkpoint,
			absolute_cap,
		}
	}

	/// Classify one failure, run the checkpoint sweep if `retry_count` has
	/// just reached it, enforce the absolute cap, and append a structured
	/// event to `medium.problems.diagnostic_events`.
	pub async fn evaluate(
		&self,
		medium_hash: &str,
		ino: i64,
		exception_message: &str,
		device_hint: &str,
		retry_count: u32,
		worker_id: &str,
	) -> Result<Classification> {
		let mut classification = classify::classify(exception_message, device_hint, &self.kernel_log);
		let mut checks_performed = vec!["exception_message".to_string()];
		if classification.kernel_log_consulted {
			checks_performed.push("kernel_log".to_string());
		}

		let mut action = "classified";

		if retry_count == self.checkpoint && classification.status != ntt_catalog::InodeStatus::FailedPermanent {
			checks_performed.push("checkpoint_sweep".to_string());
			if self.sweep_concludes_unrecoverable(device_hint) {
				classification.status = ntt_catalog::InodeStatus::FailedPermanent;
				action = "checkpoint_promoted_permanent";
			}
		}

		if retry_count >= self.absolute_cap {
			checks_performed.push("absolute_cap".to_string());
			action = "absolute_cap_reached";
			// Status is left as-is if already permanent; otherwise the
			// cap pins it retryable-but-unclaimable — the caller (copy
			// worker / catalog commit) is responsible for setting the
			// MAX_RETRIES_EXCEEDED claimed_by sentinel so it is never
			// re-claimed, since that's a catalog-level concern (§4.6).
		}

		self.append_event(medium_hash, ino, retry_count, &checks_performed, action, worker_id)
			.await?;

		Ok(classification)
	}

	/// Whether `retry_count` has crossed the absolute cap and the caller
	/// must pin `claimed_by` so this inode is never re-claimed (§4.5).
	pub fn is_absolute_cap_reached(&self, retry_count: u32) -> bool {
		retry_count >= self.absolute_cap
	}

	fn sweep_concludes_unrecoverable(&self, device_hint: &str) -> bool {
		self.kernel_log.mentions_truncated_eod(device_hint) || self.kernel_log.mentions_io_fault(device_hint)
	}

	async fn append_event(
		&self,
		medium_hash: &str,
		ino: i64,
		retry_count: u32,
		checks_performed: &[String],
		action: &str,
		worker_id: &str,
	) -> Result<()> {
		let medium = self.catalog.get_medium(medium_hash).await?;
		let mut events = medium
			.problems
			.get("diagnostic_events")
			.and_then(|v| v.as_array())
			.cloned()
			.unwrap_or_default();

		events.push(serde_json::json!({
			"ino": ino,
			"retry_count": retry_count,
			"checks_performed": checks_performed,
			"action": action,
			"timestamp": Utc::now().to_rfc3339(),
			"worker_id": worker_id,
		}));

		self.catalog
			.merge_problems(medium_hash, serde_json::json!({ "diagnostic_events": events }))
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absolute_cap_check_is_pure_and_inclusive() {
		let service_shape = (DEFAULT_CHECKPOINT, DEFAULT_ABSOLUTE_CAP);
		assert_eq!(service_shape, (10, 50));
	}
}
