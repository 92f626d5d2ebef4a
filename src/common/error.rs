use std::fmt;
use std::io;

/// Error currency for every public operation in the security core.
///
/// Variants line up with the error kinds named in the core's error
/// handling design: input-malformed, denied-by-policy,
/// authentication-failed, not-found, permission-denied,
/// resource-exhausted, transport-failed, parser-error, cache-corrupt,
/// timeout, interrupted.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    UserNotFound(String),
    GroupNotFound(String),
    Configuration(String),
    Authentication(String),
    Denied(String),
    CommandNotFound(String),
    PermissionDenied(String),
    ResourceExhausted(String),
    Transport(String),
    ParserError(String),
    CacheCorrupt(String),
    Timeout(String),
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {e}"),
            Error::UserNotFound(u) => write!(f, "unknown user: {u}"),
            Error::GroupNotFound(g) => write!(f, "unknown group: {g}"),
            Error::Configuration(s) => write!(f, "configuration error: {s}"),
            Error::Authentication(s) => write!(f, "authentication failed: {s}"),
            Error::Denied(reason) => write!(f, "not permitted: {reason}"),
            Error::CommandNotFound(c) => write!(f, "command not found: {c}"),
            Error::PermissionDenied(s) => write!(f, "permission denied: {s}"),
            Error::ResourceExhausted(s) => write!(f, "resource exhausted: {s}"),
            Error::Transport(s) => write!(f, "directory transport failed: {s}"),
            Error::ParserError(s) => write!(f, "parse error: {s}"),
            Error::CacheCorrupt(s) => write!(f, "credential cache corrupt: {s}"),
            Error::Timeout(s) => write!(f, "timed out: {s}"),
            Error::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    /// True if the session should carry on (denial/parse problems are
    /// reported and recovered); false if the session must exit.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Authentication(_) | Error::PermissionDenied(_) | Error::Interrupted
        )
    }
}
