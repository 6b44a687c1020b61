//! Column master keys stored in Azure Key Vault or Managed HSM

use async_trait::async_trait;
use base64::{decode_config, encode_config};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::errors::KeyDecryptionError;
use crate::key_store::{ColumnEncryptionKey, ColumnKeyStoreProvider};
use crate::token_provider::TokenProvider;

/// The name SQL Server records in `sys.column_master_keys` for vault-backed master keys
pub const AZURE_KEY_VAULT_PROVIDER_NAME: &str = "AZURE_KEY_VAULT";

pub const KEY_VAULT_API_VERSION: &str = "7.4";

const RSA_OAEP: &str = "RSA_OAEP";
const VERSION: u8 = 0x01;
const HEADER_SIZE: usize = 5;
const CEK_SIZE: usize = 32;

/// Vault and HSM endpoints a master key path may point at
const TRUSTED_ENDPOINTS: &[&str] = &[
    "vault.azure.net",
    "vault.azure.cn",
    "vault.usgovcloudapi.net",
    "vault.microsoftazure.de",
    "managedhsm.azure.net",
    "managedhsm.azure.cn",
    "managedhsm.usgovcloudapi.net",
    "managedhsm.microsoftazure.de",
];

/// A decoded encrypted column encryption key, as written by SSMS and the SqlClient tooling
///
/// | Pos       | Data                                |
/// |-----------|-------------------------------------|
/// | 0         | Version (1 byte, 0x01)              |
/// | 1-3       | Key path length (u16 LE)            |
/// | 3-5       | Ciphertext length (u16 LE)          |
/// | 5-        | Key path (UTF-16LE)                 |
/// | ..        | Ciphertext                          |
/// | ..        | Signature (same size as ciphertext) |
#[derive(Debug)]
struct EncryptedColumnKey<'a> {
    key_path: String,
    ciphertext: &'a [u8],
    signature: &'a [u8],
}

impl<'a> EncryptedColumnKey<'a> {
    fn from_slice(bytes: &'a [u8]) -> Result<Self, KeyDecryptionError> {
        if bytes.len() < HEADER_SIZE {
            return Err(malformed(format!(
                "Slice was too small to load an EncryptedColumnKey. Received: {}",
                bytes.len()
            )));
        }

        if bytes[0] != VERSION {
            return Err(malformed(format!("unknown version {:#04x}", bytes[0])));
        }

        let key_path_len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        let ciphertext_len = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;

        let body = &bytes[HEADER_SIZE..];
        if body.len() < key_path_len + ciphertext_len {
            return Err(malformed(format!(
                "expected at least {} bytes after the header, found {}",
                key_path_len + ciphertext_len,
                body.len()
            )));
        }

        let (key_path, rest) = body.split_at(key_path_len);
        let (ciphertext, signature) = rest.split_at(ciphertext_len);

        if signature.len() != ciphertext.len() {
            return Err(malformed(format!(
                "signature is {} bytes but ciphertext is {}",
                signature.len(),
                ciphertext.len()
            )));
        }

        Ok(Self {
            key_path: decode_utf16le(key_path)?,
            ciphertext,
            signature,
        })
    }
}

fn decode_utf16le(bytes: &[u8]) -> Result<String, KeyDecryptionError> {
    if bytes.len() % 2 != 0 {
        return Err(malformed("key path is not valid UTF-16".to_string()));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|_| malformed("key path is not valid UTF-16".to_string()))
}

fn malformed(message: String) -> KeyDecryptionError {
    KeyDecryptionError::MalformedKey(message)
}

/// Check a master key path such as `https://contoso.vault.azure.net/keys/CMK/1a2b` and
/// return the token scope for its vault.
fn token_scope(master_key_path: &str) -> Result<String, KeyDecryptionError> {
    let invalid = || KeyDecryptionError::InvalidKeyPath(master_key_path.to_string());

    let url = Url::parse(master_key_path).map_err(|_| invalid())?;
    if url.scheme() != "https" {
        return Err(invalid());
    }

    let host = url.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
    let endpoint = TRUSTED_ENDPOINTS
        .iter()
        .find(|endpoint| host.ends_with(&format!(".{endpoint}")))
        .ok_or_else(invalid)?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [keys, _name] | [keys, _name, _] if keys.eq_ignore_ascii_case("keys") => {}
        _ => return Err(invalid()),
    }

    Ok(format!("https://{endpoint}/.default"))
}

#[derive(Serialize)]
struct UnwrapKeyRequest {
    alg: &'static str,
    value: String,
}

#[derive(Deserialize)]
struct UnwrapKeyResponse {
    #[serde(default)]
    kid: Option<String>,
    value: String,
}

/// Unwraps column encryption keys with RSA-OAEP through the Key Vault `unwrapkey` operation
pub struct AzureKeyVaultProvider<T> {
    credential: T,
    client: reqwest::Client,
}

impl<T: TokenProvider> AzureKeyVaultProvider<T> {
    pub fn new(credential: T) -> Self {
        Self::with_client(credential, reqwest::Client::new())
    }

    pub fn with_client(credential: T, client: reqwest::Client) -> Self {
        Self { credential, client }
    }

    async fn unwrap_key(
        &self,
        master_key_path: &str,
        scope: &str,
        ciphertext: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
        let token = self.credential.get_token(scope).await?;

        let url = format!(
            "{}/unwrapkey?api-version={}",
            master_key_path.trim_end_matches('/'),
            KEY_VAULT_API_VERSION
        );

        let request = UnwrapKeyRequest {
            alg: "RSA-OAEP",
            value: encode_config(ciphertext, base64::URL_SAFE_NO_PAD),
        };

        let response: UnwrapKeyResponse = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(kid = ?response.kid, "unwrapped column encryption key");

        decode_unwrapped_key(response)
    }
}

fn decode_unwrapped_key(
    mut response: UnwrapKeyResponse,
) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
    let decoded = decode_config(&response.value, base64::URL_SAFE_NO_PAD);
    response.value.zeroize();

    let key = decoded.map_err(|e| {
        KeyDecryptionError::Other(format!("Response did not contain a valid key: {e}"))
    })?;

    if key.len() != CEK_SIZE {
        return Err(KeyDecryptionError::Other(format!(
            "Unwrapped key is {} bytes, expected {}",
            key.len(),
            CEK_SIZE
        )));
    }

    Ok(ColumnEncryptionKey::new(key))
}

#[async_trait]
impl<T: TokenProvider> ColumnKeyStoreProvider for AzureKeyVaultProvider<T> {
    async fn decrypt_column_encryption_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        encrypted_key: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
        if !algorithm.eq_ignore_ascii_case(RSA_OAEP) {
            return Err(KeyDecryptionError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let scope = token_scope(master_key_path)?;
        let encrypted = EncryptedColumnKey::from_slice(encrypted_key)?;

        if !encrypted
            .key_path
            .trim_end_matches('/')
            .eq_ignore_ascii_case(master_key_path.trim_end_matches('/'))
        {
            return Err(malformed(format!(
                "key was wrapped under `{}`, not `{master_key_path}`",
                encrypted.key_path
            )));
        }

        debug!(
            key_path = %encrypted.key_path,
            signature_len = encrypted.signature.len(),
            "decoded encrypted column encryption key"
        );

        self.unwrap_key(master_key_path, &scope, encrypted.ciphertext)
            .await
    }
}
