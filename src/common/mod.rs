pub mod context;
pub mod error;

pub use context::{CallerContext, EnvIntent, InvocationMode, TargetIdentity};
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The filtered environment handed to a child process: an ordered
/// list rather than a map, since exec wants `KEY=VALUE` strings and
/// order is otherwise insignificant.
pub type Environment = Vec<(String, String)>;
