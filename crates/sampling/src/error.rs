use thiserror::Error;

pub type Result<T> = std::result::Result<T, SamplingError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    /// The client refused to sample on our behalf. Terminal for the whole session.
    #[error("sampling permission denied: {0}")]
    PermissionDenied(String),

    #[error("sampling is unavailable because the session is closed")]
    SessionClosed,

    #[error("sampling transport error: {0}")]
    Transport(String),

    #[error("model returned non-text content")]
    NonTextResponse,

    #[error("model response is missing required <{0}> tag")]
    MissingTag(&'static str),

    #[error("model produced an invalid category block: {0}")]
    InvalidCategoryBlock(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl SamplingError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<std::io::Error> for SamplingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
