use crate::resource::ResourceType;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes a single id can end in. Reported alongside the
/// message in run artifacts so drift in the portal markup is easy to
/// tell apart from network trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    Structural,
    Referential,
    Store,
    Invariant,
    Extraction,
    Config,
    Io,
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetching {target} failed after {tries} tries: {last_error}")]
    Fetch {
        target: String,
        tries: u32,
        last_error: String,
    },

    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    /// The page does not have the layout the parser was written against.
    #[error("unexpected page structure: {0}")]
    Structure(String),

    #[error("unresolved reference: {0}")]
    Referential(String),

    #[error("document store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("document store lock poisoned")]
    StorePoisoned,

    #[error("{rtype} {id} not found")]
    NotFound { rtype: ResourceType, id: i64 },

    #[error("record for {collection} does not match its schema: {detail}")]
    Shape {
        collection: &'static str,
        detail: String,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0} does not support update in place")]
    NotUpdateable(ResourceType),

    #[error("text extraction: {0}")]
    Extraction(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch timed out after {after:?} with {completed} ids finished")]
    BatchTimeout { after: Duration, completed: usize },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Fetch { .. } | Error::Http(_) => ErrorKind::TransientFetch,
            Error::Structure(_) => ErrorKind::Structural,
            Error::Referential(_) | Error::NotFound { .. } => ErrorKind::Referential,
            Error::Store(_) | Error::StorePoisoned | Error::Json(_) => ErrorKind::Store,
            Error::Shape { .. } | Error::Invariant(_) | Error::NotUpdateable(_) => {
                ErrorKind::Invariant
            }
            Error::Extraction(_) => ErrorKind::Extraction,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::BatchTimeout { .. } => ErrorKind::Timeout,
        }
    }

    pub(crate) fn structure(detail: impl Into<String>) -> Self {
        Error::Structure(detail.into())
    }
}
