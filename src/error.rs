//! Error taxonomy for the task board.
//!
//! A hand-rolled flat `ErrorKind` plus a human-readable message, rather
//! than a derive-macro error enum. Internal assertion failures are
//! deliberately not representable here -- those are `assert!`/`panic!`
//! at the call site, not a `Result`.

use std::fmt;

/// The five recoverable error categories a task board can report.
/// (Internal assertion failures abort instead of returning one of these.)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Invalid CLI / startup configuration.
    Configuration,
    /// A resource cap was hit (MAX_TASKS, MAX_SECONDARIES, handle space).
    ResourceExhausted,
    /// Bad signature, unknown command, dangling reply.
    Protocol,
    /// A remote call deadline expired.
    Timing,
    /// Invariant violation with no corruption (double start, double destroy).
    Invariant,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timing => "timing",
            ErrorKind::Invariant => "invariant",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
