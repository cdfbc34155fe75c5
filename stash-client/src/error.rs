//! Error kinds shared across the crate, mirroring the stashd service's
//! error codes.

/// All ways a client operation can fail. Remote-call failures are never
/// swallowed; the attempted operation's name is prefixed onto the message
/// as the error propagates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cookie resolved to nothing where existence was assumed.
    #[error("no such object: {0}")]
    NoSuchObject(String),
    /// Registration collided with existing remote state, or the service
    /// holds several entities under one cookie.
    #[error("object exists: {0}")]
    AlreadyExists(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    /// The required handler or remote method is missing.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// A remote call failed for an unspecified reason.
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Prefix the name of the attempted operation so callers can see which
    /// call failed once the error has crossed a few layers.
    pub(crate) fn in_op(self, op: &str) -> Self {
        match self {
            Error::NoSuchObject(m) => Error::NoSuchObject(format!("{op}: {m}")),
            Error::AlreadyExists(m) => Error::AlreadyExists(format!("{op}: {m}")),
            Error::InvalidArgs(m) => Error::InvalidArgs(format!("{op}: {m}")),
            Error::NotImplemented(m) => Error::NotImplemented(format!("{op}: {m}")),
            Error::Remote(m) => Error::Remote(format!("{op}: {m}")),
            Error::Internal(m) => Error::Internal(format!("{op}: {m}")),
        }
    }
}
