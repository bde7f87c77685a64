use std::result;

/// Custom result type for store operations
pub type Result<T> = result::Result<T, Error>;

/// Boxed underlying error carried by storage failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Store error kinds
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed identifier, key too long or unusable JSON fragment
    #[error("invalid input {value:?}: {reason}")]
    InvalidInput { value: String, reason: String },
    /// Statement template could not be parsed or rendered
    #[error("error rendering {name} template: {reason}")]
    Template { name: String, reason: String },
    /// Pool creation or liveness check failed
    #[error("could not connect to the database: {0}")]
    Connection(String),
    /// Bulk transport rejected the batch or is not available
    #[error("error while importing data to {table}: {diagnostic}")]
    BulkLoad { table: String, diagnostic: String },
    /// Point lookup or metadata read miss
    #[error("{0} not found")]
    NotFound(String),
    /// Point lookup matched more than one row
    #[error("cnpj {id} matched {rows} rows")]
    DuplicateRows { id: i64, rows: usize },
    /// Generic backend failure
    #[error("error {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: BoxError,
    },
    /// Cancelled through the caller's context
    #[error("operation cancelled")]
    Cancelled,
    /// Deadline of the caller's context expired
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    pub(crate) fn invalid_input(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn storage<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Storage failure whose text carries the server's diagnostic
    pub(crate) fn postgres(context: impl Into<String>, source: tokio_postgres::Error) -> Self {
        let mut context = context.into();
        if let Some(db) = source.as_db_error() {
            context = format!("{} ({}: {})", context, db.code().code(), db.message());
        }
        Error::Storage {
            context,
            source: source.into(),
        }
    }

    pub(crate) fn bulk_load(table: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Error::BulkLoad {
            table: table.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput { .. })
    }
}
