use bastion_ledger::LedgerError;

/// Errors from the correlation engine.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// The event payload does not satisfy the signal contract.
    #[error("invalid signal in event '{event_id}': {reason}")]
    Signal { event_id: String, reason: String },

    /// A configuration value is out of range.
    #[error("invalid correlation config: {0}")]
    Config(String),

    /// Recording a state change failed. The change was not applied.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("incident state lock poisoned")]
    LockPoisoned,
}

impl CorrelationError {
    pub(crate) fn signal(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Signal {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }
}
