//! Trait for a column master key store, and the registry the connection resolves providers from

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{KeyDecryptionError, RegistrationError};

const RESERVED_PREFIX: &str = "MSSQL_";

/// A plaintext column encryption key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ColumnEncryptionKey {
    key: Vec<u8>,
}

impl ColumnEncryptionKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Debug for ColumnEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnEncryptionKey({} bytes)", self.key.len())
    }
}

/// One column encryption key as described by the database catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKeyMetadata {
    pub name: String,
    pub key_store_provider_name: String,
    pub key_path: String,
    pub encryption_algorithm: String,
    pub encrypted_value: Vec<u8>,
}

#[async_trait]
pub trait ColumnKeyStoreProvider: Send + Sync {
    /// Unwrap an encrypted column encryption key using the master key at `master_key_path`
    ///
    /// # Arguments
    ///
    /// * `master_key_path` - Where the column master key lives, in the provider's own format
    /// * `algorithm` - The algorithm the key was wrapped with, as recorded in the catalog
    /// * `encrypted_key` - The wrapped key bytes
    ///
    async fn decrypt_column_encryption_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        encrypted_key: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError>;
}

#[async_trait]
impl ColumnKeyStoreProvider for Box<dyn ColumnKeyStoreProvider> {
    async fn decrypt_column_encryption_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        encrypted_key: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
        (**self)
            .decrypt_column_encryption_key(master_key_path, algorithm, encrypted_key)
            .await
    }
}

/// Named key store providers, built once at startup and handed to whatever needs keys
#[derive(Default)]
pub struct KeyStoreProviderRegistry {
    providers: HashMap<String, Box<dyn ColumnKeyStoreProvider>>,
}

impl KeyStoreProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Box<dyn ColumnKeyStoreProvider>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        if name
            .get(..RESERVED_PREFIX.len())
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case(RESERVED_PREFIX))
        {
            return Err(RegistrationError::ReservedName(name));
        }

        if self.providers.contains_key(&name) {
            return Err(RegistrationError::Duplicate(name));
        }

        info!(provider = %name, "registered column key store provider");
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ColumnKeyStoreProvider> {
        self.providers.get(name).map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn decrypt(
        &self,
        provider_name: &str,
        master_key_path: &str,
        algorithm: &str,
        encrypted_key: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
        let provider = self
            .get(provider_name)
            .ok_or_else(|| KeyDecryptionError::ProviderNotFound(provider_name.to_string()))?;

        provider
            .decrypt_column_encryption_key(master_key_path, algorithm, encrypted_key)
            .await
    }

    /// Unwrap every key in `keys`, stopping at the first one that can't be resolved
    pub async fn unwrap_all(
        &self,
        keys: &[ColumnKeyMetadata],
    ) -> Result<Vec<ColumnEncryptionKey>, KeyDecryptionError> {
        let mut unwrapped = Vec::with_capacity(keys.len());

        for key in keys {
            debug!(cek = %key.name, provider = %key.key_store_provider_name, "unwrapping column encryption key");
            unwrapped.push(
                self.decrypt(
                    &key.key_store_provider_name,
                    &key.key_path,
                    &key.encryption_algorithm,
                    &key.encrypted_value,
                )
                .await?,
            );
        }

        Ok(unwrapped)
    }

    /// Check that every key the database lists can be unwrapped. The keys themselves are
    /// dropped: rows are inserted with plaintext parameters.
    pub async fn verify_all(
        &self,
        keys: &[ColumnKeyMetadata],
    ) -> Result<usize, KeyDecryptionError> {
        let unwrapped = self.unwrap_all(keys).await?;

        info!(keys = unwrapped.len(), "column encryption keys available");
        warn!(
            "parameter values are sent unencrypted, batches into encrypted columns will be rejected by the server"
        );

        Ok(unwrapped.len())
    }
}

impl fmt::Debug for KeyStoreProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}
