use recall_sampling::SamplingError;
use recall_store::StoreError;
use recall_sync::SyncError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Lock error: {0}")]
    Lock(#[from] SyncError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model proposed an invalid category name: {0:?}")]
    InvalidCategoryName(String),

    #[error("Model referenced a category that does not exist: {0}")]
    UnknownCategory(String),

    #[error("Model did not assign the information to any category")]
    NoCategories,

    #[error("Category task failed: {0}")]
    Task(String),
}
