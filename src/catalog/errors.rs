#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("placement error: {0}")]
    Placement(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("item {0} not found")]
    ItemNotFound(u64),

    #[error("category {0} not found")]
    CategoryNotFound(u64),

    #[error("storage error: {0:?}")]
    Storage(#[from] anyhow::Error),
}

impl CatalogError {
    /// Structural violations are the caller's fault and never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CatalogError::Placement(_) | CatalogError::IllegalArgument(_)
        )
    }
}
