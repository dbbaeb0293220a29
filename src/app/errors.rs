use crate::{catalog::CatalogError, index::IndexError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Index(#[from] IndexError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Placement and argument errors are the caller's fault and are never
    /// retried.
    pub fn is_structural(&self) -> bool {
        matches!(self, AppError::Catalog(err) if err.is_structural())
    }
}
