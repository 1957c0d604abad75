use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("lock {lock_id} is already held by the current task")]
    Reentrant { lock_id: u64 },
}
