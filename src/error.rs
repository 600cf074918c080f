use thiserror::Error;

/// Top-level error composing every inner crate's error enum, for the CLI's
/// `main` (§6 "exit codes: 0 success, 2 stage-error, other values reserved").
#[derive(Debug, Error)]
pub enum NttError {
	#[error(transparent)]
	Catalog(#[from] ntt_catalog::CatalogError),

	#[error(transparent)]
	Enumerator(#[from] ntt_enumerator::EnumeratorError),

	#[error(transparent)]
	Loader(#[from] ntt_loader::LoaderError),

	#[error(transparent)]
	Diagnostics(#[from] ntt_diagnostics::DiagnosticError),

	#[error(transparent)]
	CopyWorker(#[from] ntt_copy_worker::CopyWorkerError),

	#[error(transparent)]
	Archiver(#[from] ntt_archiver::ArchiverError),

	#[error(transparent)]
	BlobStore(#[from] ntt_blob_store::BlobStoreError),

	#[error("{medium_hash} refused: {reason}")]
	Refused { medium_hash: String, reason: String },

	#[error("mount failed for {medium_hash}: {reason}")]
	MountFailed { medium_hash: String, reason: String },

	#[error("{0}")]
	Config(#[from] anyhow::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl NttError {
	/// Every `NttError` maps to the §6 "stage-error" exit code; the
	/// distinction between error *kinds* lives in `medium.problems` and the
	/// logs, not in the process exit status.
	pub fn exit_code(&self) -> i32 {
		2
	}
}

pub type Result<T> = std::result::Result<T, NttError>;
