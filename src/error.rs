use serde::{Deserialize, Serialize};

/// A bootmesh error. Every error is terminal for the bootstrap round: the
/// agent tears down any peer connections established so far (releasing peers
/// that would otherwise block on us) and exits. There is no partial-group or
/// retry-and-continue mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid bootstrap configuration: duplicate member addresses, own
    /// address missing from the group, port allocation exhaustion.
    Config(String),
    /// Mesh establishment failed: an accept or connect error, a malformed
    /// identification frame, or an inbound peer not in the group.
    Mesh(String),
    /// A peer's view of the group or replica counts disagrees with ours.
    Validation(String),
    /// A worker process could not be started.
    Launch(String),
    /// Launched replicas never reached their listening state.
    LivenessTimeout(String),
    /// An OS or serialization error outside a more specific phase.
    IO(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Mesh(msg) => write!(f, "mesh error: {msg}"),
            Error::Validation(msg) => write!(f, "validation error: {msg}"),
            Error::Launch(msg) => write!(f, "launch error: {msg}"),
            Error::LivenessTimeout(msg) => write!(f, "liveness timeout: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::Config via format!() and into().
#[macro_export]
macro_rules! errconf {
    ($($args:tt)*) => { $crate::error::Error::Config(format!($($args)*)).into() };
}

/// Constructs an Error::Mesh via format!() and into().
#[macro_export]
macro_rules! errmesh {
    ($($args:tt)*) => { $crate::error::Error::Mesh(format!($($args)*)).into() };
}

/// Constructs an Error::Validation via format!() and into().
#[macro_export]
macro_rules! errval {
    ($($args:tt)*) => { $crate::error::Error::Validation(format!($($args)*)).into() };
}

/// A bootmesh Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Allows returning a constructed error directly from a Result function, e.g.
/// return errmesh!("unknown peer {addr}").
impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(err: std::net::AddrParseError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<log::ParseLevelError> for Error {
    fn from(err: log::ParseLevelError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::IO(err.to_string())
    }
}
