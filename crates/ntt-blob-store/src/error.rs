use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the blob store (§4.1).
///
/// `OutOfSpace` and `ReadOnlyFilesystem` are distinguished from the rest
/// because the spec requires them to be fatal to the calling worker rather
/// than classified and retried per-inode (§4.1 "Failure semantics",
/// §7 propagation policy).
#[derive(Debug, Error)]
pub enum BlobStoreError {
	#[error("temp file {src} and blob store root are on different filesystems; insert_from_temp requires same-filesystem rename")]
	CrossDevice { src: PathBuf },

	#[error("blob store ran out of space while writing {path}")]
	OutOfSpace { path: PathBuf },

	#[error("blob store root {path} is on a read-only filesystem")]
	ReadOnlyFilesystem { path: PathBuf },

	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl BlobStoreError {
	/// Whether this error should abort the worker entirely (§4.1, §7),
	/// as opposed to being classified per-inode by the diagnostic service.
	pub fn is_fatal_to_worker(&self) -> bool {
		matches!(self, Self::OutOfSpace { .. } | Self::ReadOnlyFilesystem { .. })
	}

	pub(crate) fn from_io(path: PathBuf, source: std::io::Error) -> Self {
		match source.raw_os_error() {
			Some(libc::ENOSPC) => Self::OutOfSpace { path },
			Some(libc::EROFS) => Self::ReadOnlyFilesystem { path },
			Some(libc::EXDEV) => Self::CrossDevice { src: path },
			_ => Self::Io { path, source },
		}
	}
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;
