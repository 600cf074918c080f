use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticError {
	#[error(transparent)]
	Catalog(#[from] ntt_catalog::CatalogError),
}

pub type Result<T> = std::result::Result<T, DiagnosticError>;
