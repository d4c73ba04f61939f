//! Error taxonomy shared by every backend.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotExist,
    AlreadyExists,
    Validation,
    Transport,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{namespace}.{name} does not exist")]
    NotExist { namespace: String, name: String },

    #[error("{namespace}.{name} already exists")]
    Exist { namespace: String, name: String },

    #[error("version conflict on {namespace}.{name}: given {given:?}, expected {expected:?}")]
    ResourceVersion { namespace: String, name: String, given: String, expected: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{backend} clients require a {capability}, {kind} is not one")]
    UnsupportedKind { kind: &'static str, backend: &'static str, capability: &'static str },

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("{context}: {source}")]
    Codec {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("internal: {0}")]
    Internal(String),

    #[error("{provenance}: {source}")]
    Watch {
        provenance: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_exist(namespace: &str, name: &str) -> Self {
        Error::NotExist { namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn exist(namespace: &str, name: &str) -> Self {
        Error::Exist { namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn resource_version(namespace: &str, name: &str, given: &str, expected: &str) -> Self {
        Error::ResourceVersion {
            namespace: namespace.to_string(),
            name: name.to_string(),
            given: given.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn transport(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Transport { context: context.into(), source: source.into() }
    }

    pub fn codec(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Codec { context: context.into(), source: source.into() }
    }

    /// Tag an error with the watch it came from.
    pub fn from_watch(provenance: impl Into<String>, source: Error) -> Self {
        Error::Watch { provenance: provenance.into(), source: Box::new(source) }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotExist { .. } => ErrorKind::NotExist,
            Error::Exist { .. } | Error::ResourceVersion { .. } => ErrorKind::AlreadyExists,
            Error::Validation(_) | Error::UnsupportedKind { .. } => ErrorKind::Validation,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Codec { .. } | Error::Internal(_) => ErrorKind::Internal,
            Error::Watch { source, .. } => source.kind(),
        }
    }

    pub fn is_not_exist(&self) -> bool {
        match self {
            Error::Watch { source, .. } => source.is_not_exist(),
            other => matches!(other, Error::NotExist { .. }),
        }
    }

    pub fn is_exist(&self) -> bool {
        match self {
            Error::Watch { source, .. } => source.is_exist(),
            other => matches!(other, Error::Exist { .. }),
        }
    }

    pub fn is_resource_version(&self) -> bool {
        match self {
            Error::Watch { source, .. } => source.is_resource_version(),
            other => matches!(other, Error::ResourceVersion { .. }),
        }
    }
}
