use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnumeratorError {
	#[error("failed to open mount root {path:?}: {source}")]
	OpenRoot { path: PathBuf, source: std::io::Error },

	#[error("failed to write raw stream: {0}")]
	Write(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnumeratorError>;
