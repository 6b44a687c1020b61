mod azure_key_vault;
mod caching_key_store;
pub mod config;
mod corpus;
pub mod errors;
mod executor;
mod key_store;
mod loader;
mod row;
mod template;
mod token_provider;

pub use crate::azure_key_vault::{AzureKeyVaultProvider, AZURE_KEY_VAULT_PROVIDER_NAME};
pub use crate::caching_key_store::{CacheOptions, CachingKeyStoreProvider};
pub use crate::config::{ConnectionSettings, LoaderConfig};
pub use crate::corpus::NameCorpus;
pub use crate::errors::{
    AuthError, BatchError, ConfigError, CorpusError, ExecutionError, GenerateError,
    KeyDecryptionError, RegistrationError, SeederError, TemplateError,
};
pub use crate::executor::{execute_batch, BatchExecutor, ExecutionResult, SqlServerExecutor};
pub use crate::key_store::{
    ColumnEncryptionKey, ColumnKeyMetadata, ColumnKeyStoreProvider, KeyStoreProviderRegistry,
};
pub use crate::loader::{console_progress, BatchLoader};
pub use crate::row::{generate_row, RowValues, SALARY_RANGE};
pub use crate::template::BatchTemplate;
pub use crate::token_provider::{
    AccessToken, AzureCliTokenProvider, StaticTokenProvider, TokenProvider,
};
