//! Run-wide settings. Everything a run needs is fixed at compile time; the
//! `with_*` builders exist so tests can shrink a run.

use static_assertions::const_assert;
use std::path::PathBuf;

use crate::errors::ConfigError;

/// Rows per INSERT statement
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Number of INSERT statements sent per run
pub const DEFAULT_BATCH_COUNT: usize = 1000;

pub const FIRST_NAMES_PATH: &str = "first-names.txt";
pub const LAST_NAMES_PATH: &str = "last-names.txt";

/// Edit for your server and database
pub const DEFAULT_CONNECTION_STRING: &str = "server=tcp:xxxxxx.database.windows.net; \
     database=ContosoMH; \
     encrypt=true; Column Encryption Setting=Enabled; Attestation Protocol=None;";

pub const SQL_DATABASE_SCOPE: &str = "https://database.windows.net/.default";

pub const TARGET_TABLE: &str = "[HR].[Employees]";

/// Placeholders bound for every generated row (LastName, FirstName, Salary, SSN)
pub const PARAMS_PER_ROW: usize = 4;

/// SQL Server rejects RPC requests carrying more parameters than this
pub const MAX_PARAMETERS: usize = 2100;

pub const DEFAULT_PORT: u16 = 1433;

const_assert!(DEFAULT_BATCH_SIZE * PARAMS_PER_ROW <= MAX_PARAMETERS);
const_assert!(DEFAULT_BATCH_SIZE > 0);

/// The options for a loader run
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub batch_count: usize,
    pub first_names_path: PathBuf,
    pub last_names_path: PathBuf,
}

impl LoaderConfig {
    /// Configure the number of rows sent in each INSERT
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Configure the number of INSERT statements to send
    pub fn with_batch_count(mut self, batch_count: usize) -> Self {
        self.batch_count = batch_count;
        self
    }

    pub fn with_corpus_paths(
        mut self,
        first_names: impl Into<PathBuf>,
        last_names: impl Into<PathBuf>,
    ) -> Self {
        self.first_names_path = first_names.into();
        self.last_names_path = last_names.into();
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_count: DEFAULT_BATCH_COUNT,
            first_names_path: PathBuf::from(FIRST_NAMES_PATH),
            last_names_path: PathBuf::from(LAST_NAMES_PATH),
        }
    }
}

/// How a connection reaches the database, parsed from an ADO-style connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub column_encryption: bool,
    pub attestation_protocol: Option<String>,
}

impl ConnectionSettings {
    /// Parse `key=value;` pairs. Keys are case-insensitive and unknown keys are ignored.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut host = None;
        let mut port = DEFAULT_PORT;
        let mut database = None;
        let mut encrypt = true;
        let mut trust_server_certificate = false;
        let mut column_encryption = false;
        let mut attestation_protocol = None;

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::Malformed(segment.to_string()))?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "address" | "addr" | "network address" => {
                    let (h, p) = parse_server(value)?;
                    host = Some(h);
                    if let Some(p) = p {
                        port = p;
                    }
                }
                "database" | "initial catalog" => database = Some(value.to_string()),
                "encrypt" => encrypt = parse_bool(&key, value)?,
                "trustservercertificate" | "trust server certificate" => {
                    trust_server_certificate = parse_bool(&key, value)?
                }
                "column encryption setting" => {
                    column_encryption = match value.to_ascii_lowercase().as_str() {
                        "enabled" => true,
                        "disabled" => false,
                        _ => return Err(invalid(&key, value)),
                    }
                }
                "attestation protocol" => {
                    attestation_protocol = match value.to_ascii_lowercase().as_str() {
                        "none" | "" => None,
                        _ => Some(value.to_string()),
                    }
                }
                _ => {}
            }
        }

        let host = host.ok_or(ConfigError::MissingKey("server"))?;

        Ok(Self {
            host,
            port,
            database,
            encrypt,
            trust_server_certificate,
            column_encryption,
            attestation_protocol,
        })
    }
}

fn parse_server(value: &str) -> Result<(String, Option<u16>), ConfigError> {
    let value = value
        .strip_prefix("tcp:")
        .or_else(|| value.strip_prefix("TCP:"))
        .unwrap_or(value);

    let (host, port) = match value.split_once(',') {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| invalid("server", value))?;
            (host.trim(), Some(port))
        }
        None => (value, None),
    };

    if host.is_empty() {
        return Err(invalid("server", value));
    }

    Ok((host.to_string(), port))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "mandatory" | "strict" => Ok(true),
        "false" | "no" | "0" | "optional" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
