use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read name corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("malformed connection string segment: {0}")]
    Malformed(String),
    #[error("connection string is missing `{0}`")]
    MissingKey(&'static str),
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("the Azure CLI could not be found, install it and run `az login`")]
    CliNotFound,
    #[error("not logged in to the Azure CLI, run `az login`: {0}")]
    NotLoggedIn(String),
    #[error("`az account get-access-token` failed: {0}")]
    CommandFailed(String),
    #[error("`az account get-access-token` did not finish within {0:?}")]
    Timeout(Duration),
    #[error("failed to parse access token response")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("failed to run the Azure CLI")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("batch size must be at least one row")]
    EmptyBatch,
    #[error("batch of {batch_size} rows needs {parameters} parameters, the server accepts at most {limit}")]
    TooManyParameters {
        batch_size: usize,
        parameters: usize,
        limit: usize,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GenerateError {
    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("batch carries {actual} rows but the statement expects {expected}")]
    RowCountMismatch { expected: usize, actual: usize },
    #[error("database error: {0}")]
    Database(#[from] tiberius::error::Error),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// A batch that failed to execute, along with how long the attempt took
#[derive(Error, Debug)]
#[error("batch failed after {}ms: {source}", .elapsed.as_millis())]
pub struct BatchError {
    pub elapsed: Duration,
    #[source]
    pub source: ExecutionError,
}

#[derive(Error, Debug)]
pub enum KeyDecryptionError {
    #[error("no key store provider registered as `{0}`")]
    ProviderNotFound(String),
    #[error("invalid master key path `{0}`")]
    InvalidKeyPath(String),
    #[error("unsupported key encryption algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("malformed encrypted column encryption key: {0}")]
    MalformedKey(String),
    #[error("failed to acquire a key vault token")]
    Auth(#[from] AuthError),
    #[error("key vault request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
    #[error("an unknown key decryption error ocurred")]
    Unknown,
}

impl Default for KeyDecryptionError {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("key store provider name must not be empty")]
    EmptyName,
    #[error("key store provider name `{0}` uses the reserved `MSSQL_` prefix")]
    ReservedName(String),
    #[error("a key store provider named `{0}` is already registered")]
    Duplicate(String),
}

/// Errors that abort a run before (or instead of) the batch loop
#[derive(Error, Debug)]
pub enum SeederError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to login to Azure: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error("failed to open the database connection: {0}")]
    Connection(#[from] ExecutionError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("column encryption key unavailable: {0}")]
    KeyDecryption(#[from] KeyDecryptionError),
}
