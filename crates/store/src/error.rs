use recall_sampling::SamplingError;
use recall_sync::SyncError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid category name: {0:?}")]
    InvalidCategoryName(String),

    #[error("Path is outside of memory directory: {0}")]
    OutsideRoot(PathBuf),

    #[error("Not a category file: {0}")]
    InvalidExtension(PathBuf),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Lock error: {0}")]
    Lock(#[from] SyncError),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Memory session is closed")]
    SessionClosed,
}
