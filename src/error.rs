use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("key not found")]
    KeyNotFound,
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Error {
        Error::Corruption(msg.into())
    }

    #[inline]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound)
    }
}

// Iterators keep a sticky status that may be observed more than once,
// so errors must be clonable. `io::Error` is not `Clone`; preserve its
// kind and message.
impl Clone for Error {
    fn clone(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corruption(msg) => Error::Corruption(msg.clone()),
            Error::InvalidArgument(msg) => Error::InvalidArgument(msg.clone()),
            Error::KeyNotFound => Error::KeyNotFound,
        }
    }
}
