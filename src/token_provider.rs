//! Bearer tokens for the database and the key vault

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::AuthError;

/// How long `az` gets before the request is abandoned
pub const CLI_TIMEOUT: Duration = Duration::from_secs(13);

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken {
    secret: String,
    /// Expiry as seconds since the unix epoch, when the issuer reports one
    #[zeroize(skip)]
    expires_on: Option<i64>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_on: Option<i64>) -> Self {
        Self {
            secret: secret.into(),
            expires_on,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_on(&self) -> Option<i64> {
        self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a token for a single `.default` scope, e.g. `https://database.windows.net/.default`
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;
}

#[async_trait]
impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        (**self).get_token(scope).await
    }
}

#[async_trait]
impl TokenProvider for Box<dyn TokenProvider> {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        (**self).get_token(scope).await
    }
}

/// Gets tokens for whoever is logged in to the Azure CLI
#[derive(Debug, Clone)]
pub struct AzureCliTokenProvider {
    tenant_id: Option<String>,
    timeout: Duration,
}

impl AzureCliTokenProvider {
    pub fn new() -> Self {
        Self {
            tenant_id: None,
            timeout: CLI_TIMEOUT,
        }
    }

    /// Request tokens from a specific tenant instead of the CLI's default
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, scope: &str) -> Command {
        let mut command = if cfg!(windows) {
            let mut command = Command::new("cmd");
            command.args(["/C", "az"]);
            command
        } else {
            Command::new("az")
        };

        command.args([
            "account",
            "get-access-token",
            "--output",
            "json",
            "--scope",
            scope,
        ]);

        if let Some(tenant_id) = &self.tenant_id {
            command.args(["--tenant", tenant_id.as_str()]);
        }

        command.kill_on_drop(true);
        command
    }
}

impl Default for AzureCliTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        debug!(scope, "requesting token from the Azure CLI");

        let output = match tokio::time::timeout(self.timeout, self.command(scope).output()).await {
            Err(_) => return Err(AuthError::Timeout(self.timeout)),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Err(AuthError::CliNotFound),
            Ok(result) => result?,
        };

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_token_response(&output.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    // Only newer CLI versions report the epoch form
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

fn parse_token_response(stdout: &[u8]) -> Result<AccessToken, AuthError> {
    let mut response: CliTokenResponse = serde_json::from_slice(stdout)?;

    if response.access_token.is_empty() {
        return Err(AuthError::Other(String::from(
            "Response did not contain an access token",
        )));
    }

    let token = AccessToken::new(std::mem::take(&mut response.access_token), response.expires_on);
    Ok(token)
}

fn classify_failure(stderr: &str) -> AuthError {
    let message = stderr.trim().to_string();

    if message.contains("az login") || message.contains("az account set") {
        AuthError::NotLoggedIn(message)
    } else if message.contains("'az' is not recognized") || message.contains("az: not found") {
        AuthError::CliNotFound
    } else {
        AuthError::CommandFailed(message)
    }
}

/// Hands out the same token for every scope. Useful when a token was obtained elsewhere.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}
