use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Ashbatch errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid data, typically an unknown record tag, a truncated record, or
    /// a merge operator failure.
    Corruption(String),
    /// Invalid caller input, such as an out-of-range offset or a lookup that
    /// requires a merge operator when none is given.
    InvalidArgument(String),
    /// The requested item does not exist. Also signals end-of-batch from the
    /// record decoder and an empty savepoint stack on rollback.
    NotFound,
    /// The operation is not supported in the iterator's current state, e.g.
    /// stepping an invalid iterator.
    NotSupported(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotFound => write!(f, "not found"),
            Error::NotSupported(msg) => write!(f, "not supported: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! errcorruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)).into() };
}

/// An ashbatch Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}
