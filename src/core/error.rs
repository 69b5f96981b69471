use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    NotFound,
    InvalidArgument,
    Internal,
    InvalidState,
    /// A component body did not match its footer checksum, or a required
    /// component is missing while its completion marker is present.
    Corruption,
    /// An indexed term exceeded the per-kind byte limit.
    TermTooLarge,
    /// A vector failed the finiteness or zero-norm rules.
    InvalidVector,
    /// An index option was misspelled, mistyped, or applied to the wrong
    /// column kind.
    InvalidOptions,
    /// The operator is not supported by the targeted index.
    UnsupportedOperator,
    /// The index exists but cannot serve queries (build incomplete, build
    /// failed, or marked corrupt).
    NotQueryable,
    /// A build was interrupted and its partial output removed.
    BuildAborted,
    /// The query deadline elapsed.
    QueryTimeout,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into() }
    }

    pub fn corruption(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Corruption, context)
    }

    pub fn invalid_options(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidOptions, context)
    }

    pub fn unsupported_operator(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnsupportedOperator, context)
    }

    pub fn not_queryable(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotQueryable, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

// Serializing an in-memory value; failures here are engine bugs, not
// damaged files. Readers decoding stored components map their own errors
// to `Corruption` at the call site.
impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Internal,
            context: format!("serialization failed: {}", err),
        }
    }
}

impl From<fst::Error> for Error {
    fn from(err: fst::Error) -> Self {
        Error {
            kind: ErrorKind::Internal,
            context: format!("FST error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
