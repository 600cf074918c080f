use thiserror::Error;

/// Errors that abort the whole worker, as opposed to per-inode failures
/// which are classified and recorded without stopping the batch (§4.6, §7).
#[derive(Debug, Error)]
pub enum CopyWorkerError {
	#[error(transparent)]
	Catalog(#[from] ntt_catalog::CatalogError),

	#[error(transparent)]
	Diagnostics(#[from] ntt_diagnostics::DiagnosticError),

	#[error("blob store is out of space or read-only, aborting worker: {0}")]
	BlobStoreFatal(#[source] ntt_blob_store::BlobStoreError),

	#[error("batch commit failed twice in a row, aborting worker: {0}")]
	CommitRetryExhausted(#[source] ntt_catalog::CatalogError),
}

pub type Result<T> = std::result::Result<T, CopyWorkerError>;
