use thiserror::Error;

/// Errors surfaced by the catalog (§4.2).
#[derive(Debug, Error)]
pub enum CatalogError {
	#[error("database error: {0}")]
	Db(#[from] sqlx::Error),

	#[error("medium_hash {0:?} is not a valid catalog partition key (expected lowercase hex)")]
	InvalidMediumHash(String),

	#[error("partitions for medium {medium_hash} already exist and are non-empty; refusing to load without an explicit append flag")]
	PartitionsPopulated { medium_hash: String },

	#[error("medium {medium_hash} not found")]
	MediumNotFound { medium_hash: String },

	#[error("claimed inode set does not match commit result set for medium {medium_hash}: {detail}")]
	IncompleteCommit { medium_hash: String, detail: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
