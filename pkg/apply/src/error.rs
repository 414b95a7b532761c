use pkg_state::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode {key}: {reason}")]
    Encode { key: String, reason: String },
}

impl ApplyError {
    /// Conflicts and timeouts clear up on the next trigger.
    pub fn is_transient(&self) -> bool {
        match self {
            ApplyError::Store(e) => e.is_transient(),
            ApplyError::Encode { .. } => false,
        }
    }
}
