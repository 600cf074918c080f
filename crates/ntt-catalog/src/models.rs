//! Row types mirroring §3's data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Imaging health, derived from the imaging collaborator's recovery map
/// (§6). The exact `% rescued` thresholds live in `ntt-config`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MediumHealth {
	Ok,
	Incomplete,
	Failed,
}

impl MediumHealth {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ok => "ok",
			Self::Incomplete => "incomplete",
			Self::Failed => "failed",
		}
	}
}

impl std::str::FromStr for MediumHealth {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ok" => Ok(Self::Ok),
			"incomplete" => Ok(Self::Incomplete),
			"failed" => Ok(Self::Failed),
			other => Err(format!("unknown medium health: {other}")),
		}
	}
}

/// `medium` table row (§3).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Medium {
	pub medium_hash: String,
	pub label: String,
	pub image_path: String,
	pub health: String,
	pub problems: serde_json::Value,
	pub enum_done: Option<DateTime<Utc>>,
	pub copy_done: Option<DateTime<Utc>>,
	pub archived: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl Medium {
	pub fn health(&self) -> MediumHealth {
		self.health.parse().unwrap_or(MediumHealth::Failed)
	}
}

/// Lifecycle status of an inode (§3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InodeStatus {
	Pending,
	Success,
	FailedRetryable,
	FailedPermanent,
}

impl InodeStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Success => "success",
			Self::FailedRetryable => "failed_retryable",
			Self::FailedPermanent => "failed_permanent",
		}
	}
}

impl std::str::FromStr for InodeStatus {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"success" => Ok(Self::Success),
			"failed_retryable" => Ok(Self::FailedRetryable),
			"failed_permanent" => Ok(Self::FailedPermanent),
			other => Err(format!("unknown inode status: {other}")),
		}
	}
}

/// Error taxonomy (§4.5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
	PathError,
	IoError,
	HashError,
	PermissionError,
	Unknown,
}

impl ErrorType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::PathError => "path_error",
			Self::IoError => "io_error",
			Self::HashError => "hash_error",
			Self::PermissionError => "permission_error",
			Self::Unknown => "unknown",
		}
	}
}

impl std::str::FromStr for ErrorType {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"path_error" => Ok(Self::PathError),
			"io_error" => Ok(Self::IoError),
			"hash_error" => Ok(Self::HashError),
			"permission_error" => Ok(Self::PermissionError),
			"unknown" => Ok(Self::Unknown),
			other => Err(format!("unknown error type: {other}")),
		}
	}
}

/// Filesystem entry type recorded by the enumerator (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsType {
	File,
	Dir,
	Symlink,
	Special,
}

impl FsType {
	/// Parse the enumerator's single-character `fs_type` field
	/// (`f d l s p c b`, §4.3).
	pub fn from_raw_char(c: u8) -> Self {
		match c {
			b'f' => Self::File,
			b'd' => Self::Dir,
			b'l' => Self::Symlink,
			_ => Self::Special,
		}
	}

	pub fn as_char(self) -> char {
		match self {
			Self::File => 'f',
			Self::Dir => 'd',
			Self::Symlink => 'l',
			Self::Special => 's',
		}
	}
}

/// `inode_p_<short>` row (§3).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InodeRow {
	pub medium_hash: String,
	pub ino: i64,
	pub fs_type: String,
	pub dev: i64,
	pub nlink: i32,
	pub size: i64,
	pub mtime: Option<DateTime<Utc>>,
	pub blob_id: Option<String>,
	pub mime_type: Option<String>,
	pub copied: bool,
	pub status: String,
	pub error_type: Option<String>,
	pub claimed_by: Option<String>,
	pub claimed_at: Option<DateTime<Utc>>,
	pub errors: serde_json::Value,
	pub processed_at: Option<DateTime<Utc>>,
}

/// `path_p_<short>` row (§3).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PathRow {
	pub medium_hash: String,
	pub ino: i64,
	pub path_bytes: Vec<u8>,
	pub exclude_reason: Option<String>,
	/// Set when `path_bytes` was truncated to the 4 KiB storage limit
	/// (§4.4 edge case "never silently dropped").
	pub path_error: Option<String>,
}

/// A claimed inode together with its non-excluded paths, as returned by
/// [`crate::Catalog::claim_batch`] (§4.2, §4.6).
#[derive(Debug, Clone)]
pub struct InodeWithPaths {
	pub inode: InodeRow,
	pub paths: Vec<PathRow>,
}

/// A row destined for `bulk_insert_inodes` (§4.4 step 4).
#[derive(Debug, Clone)]
pub struct NewInode {
	pub ino: i64,
	pub fs_type: FsType,
	pub dev: i64,
	pub nlink: i32,
	pub size: i64,
	pub mtime: Option<DateTime<Utc>>,
}

/// A row destined for `bulk_insert_paths` (§4.4 step 5).
#[derive(Debug, Clone)]
pub struct NewPath {
	pub ino: i64,
	pub path_bytes: Vec<u8>,
}

/// One successfully copied inode, ready for `commit_batch` (§4.6).
#[derive(Debug, Clone)]
pub struct CopySuccess {
	pub ino: i64,
	pub blob_id: String,
	pub mime_type: Option<String>,
	pub hardlinks_placed: u32,
}

/// One inode that failed during copy, ready for `commit_batch` (§4.5, §4.6).
#[derive(Debug, Clone)]
pub struct CopyFailure {
	pub ino: i64,
	pub status: InodeStatus,
	pub error_type: ErrorType,
	pub error_message: String,
}
