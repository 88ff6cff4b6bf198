/// Modem service errors
#[derive(thiserror::Error, Debug)]
pub enum ModemError {
    /// Operation was cancelled cooperatively
    #[error("Operation was cancelled")]
    Cancelled,

    /// Operation did not complete in time
    #[error("Timed out waiting for {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// Capability is not supported by this modem
    #[error("Capability '{capability}' is not supported by this modem")]
    Unsupported {
        /// Name of the unsupported capability.
        capability: &'static str,
    },

    /// Entity not found by identifier
    #[error("{kind} {identity} not found")]
    NotFound {
        /// Kind of entity that was looked up.
        kind: &'static str,
        /// Identity that failed to resolve.
        identity: String,
    },

    /// An equivalent entity or in-flight operation already exists
    #[error("{what} already exists")]
    AlreadyExists {
        /// What already exists.
        what: String,
    },

    /// SMS storage index already consumed by a registered message
    #[error("Storage index {index} already consumed")]
    DuplicateIndex {
        /// The offending storage index.
        index: u32,
    },

    /// Device rejected a command or returned an unparseable response
    #[error("Protocol failure during {operation}: {reason}")]
    ProtocolFailure {
        /// The operation that failed.
        operation: &'static str,
        /// Reason reported by the device or transport.
        reason: String,
    },

    /// Programming-contract breach; fatal, not user-recoverable
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl ModemError {
    /// Whether this error represents an internal contract breach rather
    /// than a recoverable runtime condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ModemError::InvariantViolation(_))
    }
}
