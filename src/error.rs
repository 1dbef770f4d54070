//! Error types for the server socket core.
//!
//! Errors are explicit and typed. Every system-level failure preserves the
//! originating `io::Error` (and therefore the OS errno) as its source, so
//! callers and accept-error callbacks can branch on the raw error code.

use std::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A call was made with invalid arguments or in an invalid state
    /// (adopting into a populated listener, mismatched address families,
    /// an empty address set).
    InvalidArgument,
    /// Binding a listening socket failed.
    Bind,
    /// `listen(2)` failed.
    Listen,
    /// Mandatory socket setup (non-blocking mode, `SO_REUSEPORT`) failed.
    SocketSetup,
    /// `accept(2)` failed.
    Accept,
    /// The callback to remove was not found in the dispatch table.
    CallbackNotFound,
    /// An event-loop operation (registration, cross-loop scheduling)
    /// failed.
    EventLoop,
    /// The accept backoff timer could not be scheduled.
    Backoff,
}

impl ErrorKind {
    /// Returns a static description of this error kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::Bind => "bind failed",
            Self::Listen => "listen failed",
            Self::SocketSetup => "socket setup failed",
            Self::Accept => "accept failed",
            Self::CallbackNotFound => "accept callback not found",
            Self::EventLoop => "event loop operation failed",
            Self::Backoff => "backoff timer failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type for server socket operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<io::Error>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Creates an error with a context message.
    #[must_use]
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    /// Creates an error wrapping an `io::Error` source.
    #[must_use]
    pub fn io(kind: ErrorKind, context: impl Into<String>, source: io::Error) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates an error from a raw OS error code.
    #[must_use]
    pub fn from_errno(kind: ErrorKind, context: impl Into<String>, errno: i32) -> Self {
        Self::io(kind, context, io::Error::from_raw_os_error(errno))
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the preserved OS error code, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        self.source.as_ref().and_then(|e| e.raw_os_error())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A specialized `Result` type for server socket operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_context() {
        let err = Error::with_context(ErrorKind::Bind, "127.0.0.1:80");
        let text = err.to_string();
        assert!(text.contains("bind failed"));
        assert!(text.contains("127.0.0.1:80"));
    }

    #[test]
    fn errno_is_preserved_through_source() {
        let err = Error::from_errno(ErrorKind::Accept, "accept", libc::EMFILE);
        assert_eq!(err.errno(), Some(libc::EMFILE));
        assert_eq!(err.kind(), ErrorKind::Accept);
    }

    #[test]
    fn plain_error_has_no_errno() {
        let err = Error::new(ErrorKind::CallbackNotFound);
        assert_eq!(err.errno(), None);
        assert_eq!(err.context(), None);
    }
}
