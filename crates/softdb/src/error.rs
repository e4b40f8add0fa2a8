use thiserror::Error;


pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the data plane.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The lookup found no live entry (a tombstone hit reports this too).
    #[error("not found")]
    NotFound,

    /// An entry's length prefix or tag was malformed.
    #[error("corruption: {detail}")]
    Corruption { detail: String },

    /// A persist barrier or host-provided I/O call failed.
    #[error("I/O error: {detail}")]
    Io { detail: String },

    /// A caller broke an interface contract (zero-capacity table,
    /// initially-invalid bulk-load cursor, ...).
    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: String },

    /// Background work was abandoned because the host is shutting down.
    #[error("shutting down")]
    ShuttingDown,
}

impl Error {
    #[must_use]
    pub fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption { detail: detail.into() }
    }

    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::InvalidArgument { detail: detail.into() }
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    #[inline]
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}
