use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
	#[error(transparent)]
	Catalog(#[from] ntt_catalog::CatalogError),

	#[error("database error: {0}")]
	Db(#[from] sqlx::Error),

	#[error("raw stream transform failed: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid exclusion pattern: {0}")]
	Exclusion(#[from] globset::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
