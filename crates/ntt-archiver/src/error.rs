use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiverError {
	#[error(transparent)]
	Catalog(#[from] ntt_catalog::CatalogError),

	#[error("archive I/O failed: {0}")]
	Io(#[from] std::io::Error),

	#[error("{medium_hash} is not ready to archive: {reason}")]
	NotReady { medium_hash: String, reason: String },

	#[error("archive integrity check failed for {medium_hash}: digest at write time {expected} does not match digest read back {actual}")]
	IntegrityMismatch {
		medium_hash: String,
		expected: String,
		actual: String,
	},
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
