//! Kernel log evidence lookup (§4.5, §12.1).
//!
//! The classification table needs corroborating evidence from the kernel
//! ring buffer for a handful of rules (`beyond EOD, truncated`, I/O faults).
//! Real deployments read `dmesg`; tests substitute a fixed line set so the
//! classifier's decision table can be exercised without root privileges or
//! a real kernel log.

use std::process::Command;

pub trait KernelLogSource: Send + Sync {
	/// Recent kernel log lines, newest-last. Implementations may return a
	/// stale or empty snapshot rather than fail — a diagnostic service with
	/// no kernel log evidence simply falls through to the exception-only
	/// rules (§4.5).
	fn recent_lines(&self) -> Vec<String>;

	fn mentions_truncated_eod(&self, device_hint: &str) -> bool {
		self.recent_lines()
			.iter()
			.any(|l| l.contains(device_hint) && l.contains("beyond EOD") && l.contains("truncated"))
	}

	fn mentions_io_fault(&self, device_hint: &str) -> bool {
		self.recent_lines()
			.iter()
			.any(|l| l.contains(device_hint) && (l.contains("I/O error") || l.contains("Buffer I/O error")))
	}
}

/// Shells out to `dmesg --ctime` and keeps the most recent lines. Silently
/// degrades to an empty snapshot when `dmesg` is unavailable or requires
/// privileges the process doesn't have — losing corroborating evidence
/// should make a classification more conservative, not crash the worker.
#[derive(Clone)]
pub struct DmesgKernelLog {
	max_lines: usize,
}

impl DmesgKernelLog {
	pub fn new() -> Self {
		Self { max_lines: 2000 }
	}
}

impl Default for DmesgKernelLog {
	fn default() -> Self {
		Self::new()
	}
}

impl KernelLogSource for DmesgKernelLog {
	fn recent_lines(&self) -> Vec<String> {
		match Command::new("dmesg").arg("--ctime").output() {
			Ok(out) if out.status.success() => {
				let text = String::from_utf8_lossy(&out.stdout);
				let lines: Vec<String> = text.lines().map(str::to_string).collect();
				let start = lines.len().saturating_sub(self.max_lines);
				lines[start..].to_vec()
			}
			Ok(out) => {
				tracing::warn!(status = ?out.status, "dmesg exited non-zero, no kernel log evidence");
				Vec::new()
			}
			Err(e) => {
				tracing::warn!(error = %e, "dmesg unavailable, no kernel log evidence");
				Vec::new()
			}
		}
	}
}

/// Fixed line set for tests.
#[derive(Clone)]
pub struct FakeKernelLog(pub Vec<String>);

impl KernelLogSource for FakeKernelLog {
	fn recent_lines(&self) -> Vec<String> {
		self.0.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_truncated_eod_for_matching_device() {
		let log = FakeKernelLog(vec!["[123.0] sdb: p9 size 40000 beyond EOD, truncated".to_string()]);
		assert!(log.mentions_truncated_eod("p9"));
		assert!(!log.mentions_truncated_eod("p3"));
	}

	#[test]
	fn detects_io_fault_for_matching_device() {
		let log = FakeKernelLog(vec!["[123.0] sdb: Buffer I/O error on device sdb1".to_string()]);
		assert!(log.mentions_io_fault("sdb1"));
		assert!(!log.mentions_io_fault("sdc1"));
	}
}
