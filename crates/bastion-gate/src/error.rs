use bastion_ledger::LedgerError;

/// Errors that abort an admission. Rejections are not errors; see
/// [`crate::Admission::Rejected`].
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Recording to the ledger failed. Fatal: the rejection was not audited.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The event store could not persist or load events.
    #[error("event store error: {0}")]
    Store(String),

    /// The downstream write run inside the admission failed; nothing was
    /// persisted.
    #[error("downstream write failed: {0}")]
    Downstream(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stage returned an unexpected error.
    #[error("stage error in '{stage}': {message}")]
    StageError { stage: String, message: String },

    #[error("event store lock poisoned")]
    LockPoisoned,
}

impl GateError {
    /// Create a stage error with a name and message.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageError {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
