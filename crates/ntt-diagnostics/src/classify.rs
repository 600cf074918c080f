//! Exception-message classification table (§4.5).

use ntt_catalog::{ErrorType, InodeStatus};

use crate::kernel_log::KernelLogSource;

/// One classification decision, plus the evidence considered so the caller
/// can log it without re-deriving what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
	pub status: InodeStatus,
	pub error_type: ErrorType,
	pub kernel_log_consulted: bool,
}

/// Classify a single failure by exception message and optional kernel-log
/// evidence, per the table in §4.5. `device_hint` narrows kernel log matches
/// to the backing device for this inode (e.g. the mount's source device or
/// partition label) — without it every fault on the host would corroborate
/// every inode's failure.
pub fn classify(exception_message: &str, device_hint: &str, kernel_log: &dyn KernelLogSource) -> Classification {
	let msg = exception_message;

	if msg.contains("No such file or directory") || looks_like_overlong_path(msg) {
		return Classification {
			status: InodeStatus::FailedRetryable,
			error_type: ErrorType::PathError,
			kernel_log_consulted: false,
		};
	}

	if msg.contains("Permission denied") {
		return Classification {
			status: InodeStatus::FailedRetryable,
			error_type: ErrorType::PermissionError,
			kernel_log_consulted: false,
		};
	}

	if kernel_log.mentions_truncated_eod(device_hint) {
		return Classification {
			status: InodeStatus::FailedPermanent,
			error_type: ErrorType::IoError,
			kernel_log_consulted: true,
		};
	}

	if msg.contains("hash mismatch") || msg.contains("content hash") {
		return Classification {
			status: InodeStatus::FailedRetryable,
			error_type: ErrorType::HashError,
			kernel_log_consulted: false,
		};
	}

	if msg.contains("Input/output error") {
		let corroborated = kernel_log.mentions_io_fault(device_hint);
		return Classification {
			status: if corroborated {
				InodeStatus::FailedPermanent
			} else {
				InodeStatus::FailedRetryable
			},
			error_type: ErrorType::IoError,
			kernel_log_consulted: true,
		};
	}

	Classification {
		status: InodeStatus::FailedRetryable,
		error_type: ErrorType::Unknown,
		kernel_log_consulted: false,
	}
}

fn looks_like_overlong_path(msg: &str) -> bool {
	msg.contains("File name too long") || msg.contains("ENAMETOOLONG")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kernel_log::FakeKernelLog;

	fn no_log() -> FakeKernelLog {
		FakeKernelLog(vec![])
	}

	#[test]
	fn missing_file_is_retryable_path_error() {
		let c = classify("No such file or directory", "sdb1", &no_log());
		assert_eq!(c.error_type, ErrorType::PathError);
		assert_eq!(c.status, InodeStatus::FailedRetryable);
	}

	#[test]
	fn permission_denied_is_retryable_permission_error() {
		let c = classify("Permission denied", "sdb1", &no_log());
		assert_eq!(c.error_type, ErrorType::PermissionError);
		assert_eq!(c.status, InodeStatus::FailedRetryable);
	}

	#[test]
	fn truncated_eod_in_kernel_log_is_permanent_io_error_even_without_matching_exception_text() {
		let log = FakeKernelLog(vec!["p9 size 1234 beyond EOD, truncated".to_string()]);
		let c = classify("Input/output error", "p9", &log);
		assert_eq!(c.error_type, ErrorType::IoError);
		assert_eq!(c.status, InodeStatus::FailedPermanent);
	}

	#[test]
	fn io_error_without_kernel_corroboration_is_retryable() {
		let c = classify("Input/output error", "p9", &no_log());
		assert_eq!(c.error_type, ErrorType::IoError);
		assert_eq!(c.status, InodeStatus::FailedRetryable);
	}

	#[test]
	fn io_error_with_corroborating_fault_is_permanent() {
		let log = FakeKernelLog(vec!["Buffer I/O error on device p9".to_string()]);
		let c = classify("Input/output error", "p9", &log);
		assert_eq!(c.status, InodeStatus::FailedPermanent);
	}

	#[test]
	fn hash_mismatch_is_retryable_hash_error() {
		let c = classify("content hash mismatch after streaming", "p9", &no_log());
		assert_eq!(c.error_type, ErrorType::HashError);
		assert_eq!(c.status, InodeStatus::FailedRetryable);
	}

	#[test]
	fn unrecognized_exception_defaults_to_unknown_retryable() {
		let c = classify("some bizarre platform exception", "p9", &no_log());
		assert_eq!(c.error_type, ErrorType::Unknown);
		assert_eq!(c.status, InodeStatus::FailedRetryable);
	}
}
