#[derive(thiserror::Error, Debug)]
pub enum TlyError {
    /// Structural violations surfaced to the user: wrong account type for a
    /// split, missing required split, lots that do not sum to the share
    /// count, invalid recurrence, inconsistent buffer edit, ...
    /// Recoverable: the caller may show the message and continue.
    #[error("{0}")]
    Validation(String),

    /// Splits do not balance per currency even after trading splits.
    #[error("{0}")]
    Balance(String),

    /// A lot usage exceeds the lot's remaining quantity at the transaction's
    /// date.  Recoverable, like Validation.
    #[error("{0}")]
    Availability(String),

    /// Reference to a non-existent account, security, currency or price pair.
    #[error("{0}")]
    Lookup(String),

    /// Attempt to mutate in a mode that forbids it (placeholder account,
    /// transaction that already has an id, ...).
    #[error("{0}")]
    State(String),

    /// Serialization boundaries only.
    #[error("{0}")]
    Io(String),
}

impl TlyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TlyError::Validation(msg.into())
    }

    pub fn balance(msg: impl Into<String>) -> Self {
        TlyError::Balance(msg.into())
    }

    pub fn availability(msg: impl Into<String>) -> Self {
        TlyError::Availability(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        TlyError::Lookup(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        TlyError::State(msg.into())
    }

    /// Whether the caller is expected to be able to recover (fix the input
    /// and retry) rather than treat the error as a bug.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TlyError::Validation(_) | TlyError::Availability(_))
    }
}

pub type Result<T> = std::result::Result<T, TlyError>;
