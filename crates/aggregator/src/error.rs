use thiserror::Error;

/// Failures talking to one catalog provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("A scan is already running")]
    ScanInProgress,

    #[error("Library error: {0}")]
    Library(#[from] library::LibraryError),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("db error: {0}")]
    Redb(#[from] redb::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

macro_rules! redb_into_offline {
    ($($ty:ty),*) => {
        $(impl From<$ty> for OfflineError {
            fn from(err: $ty) -> Self {
                OfflineError::Redb(err.into())
            }
        })*
    };
}

redb_into_offline!(
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);
