use async_trait::async_trait;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::ConnectionSettings;
use crate::errors::{BatchError, ExecutionError};
use crate::key_store::ColumnKeyMetadata;
use crate::row::RowValues;
use crate::template::BatchTemplate;
use crate::token_provider::AccessToken;

const APPLICATION_NAME: &str = "encrypted-seeder";

const COLUMN_KEYS_QUERY: &str = r#"
    SELECT cek.name,
           cmk.key_store_provider_name,
           cmk.key_path,
           cekv.encryption_algorithm_name,
           cekv.encrypted_value
      FROM sys.column_encryption_keys cek
      JOIN sys.column_encryption_key_values cekv
        ON cek.column_encryption_key_id = cekv.column_encryption_key_id
      JOIN sys.column_master_keys cmk
        ON cekv.column_master_key_id = cmk.column_master_key_id
"#;

/// How one batch went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub elapsed: Duration,
    pub rows_affected: u64,
}

impl ExecutionResult {
    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Something that can run a bound batch statement
#[async_trait]
pub trait BatchExecutor: Send {
    /// Execute `template` with `rows` bound in order, returning the number of rows affected.
    /// Callers guarantee `rows.len() == template.batch_size()`.
    async fn execute(
        &mut self,
        template: &BatchTemplate,
        rows: &[RowValues],
    ) -> Result<u64, ExecutionError>;
}

/// Bind `rows` into `template`, run it once and time it
pub async fn execute_batch<E: BatchExecutor + ?Sized>(
    executor: &mut E,
    template: &BatchTemplate,
    rows: &[RowValues],
) -> Result<ExecutionResult, BatchError> {
    let start = Instant::now();

    if rows.len() != template.batch_size() {
        return Err(BatchError {
            elapsed: start.elapsed(),
            source: ExecutionError::RowCountMismatch {
                expected: template.batch_size(),
                actual: rows.len(),
            },
        });
    }

    match executor.execute(template, rows).await {
        Ok(rows_affected) => Ok(ExecutionResult {
            elapsed: start.elapsed(),
            rows_affected,
        }),
        Err(source) => Err(BatchError {
            elapsed: start.elapsed(),
            source,
        }),
    }
}

/// One long-lived connection to SQL Server, authenticated with an Azure AD token.
///
/// Parameter values are bound as plain `nvarchar`/`int`; nothing is encrypted on the client,
/// so the target columns must not use Always Encrypted.
pub struct SqlServerExecutor {
    client: Client<Compat<TcpStream>>,
}

impl SqlServerExecutor {
    pub async fn connect(
        settings: &ConnectionSettings,
        token: &AccessToken,
    ) -> Result<Self, ExecutionError> {
        let config = client_config(settings, &settings.host, settings.port, token);
        let tcp = open_stream(&config).await?;

        let client = match Client::connect(config, tcp.compat_write()).await {
            Ok(client) => client,
            // Azure SQL gateways may hand the session over to the node hosting the database
            Err(tiberius::error::Error::Routing { host, port }) => {
                info!(%host, port, "following server redirect");
                let config = client_config(settings, &host, port, token);
                let tcp = open_stream(&config).await?;
                Client::connect(config, tcp.compat_write()).await?
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            host = %settings.host,
            database = settings.database.as_deref().unwrap_or("<default>"),
            column_encryption = settings.column_encryption,
            "connected"
        );

        if settings.attestation_protocol.is_some() {
            warn!("attestation protocols are not supported, ignoring");
        }

        Ok(Self { client })
    }

    /// Read every column encryption key the database knows about
    pub async fn column_encryption_keys(
        &mut self,
    ) -> Result<Vec<ColumnKeyMetadata>, ExecutionError> {
        let rows = self
            .client
            .simple_query(COLUMN_KEYS_QUERY)
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                let text = |index: usize| -> Result<String, ExecutionError> {
                    row.try_get::<&str, _>(index)?
                        .map(String::from)
                        .ok_or_else(|| missing_column(index))
                };

                Ok(ColumnKeyMetadata {
                    name: text(0)?,
                    key_store_provider_name: text(1)?,
                    key_path: text(2)?,
                    encryption_algorithm: text(3)?,
                    encrypted_value: row
                        .try_get::<&[u8], _>(4)?
                        .map(<[u8]>::to_vec)
                        .ok_or_else(|| missing_column(4))?,
                })
            })
            .collect()
    }
}

fn missing_column(index: usize) -> ExecutionError {
    ExecutionError::Other(format!("column {index} of the key catalog was NULL"))
}

fn client_config(
    settings: &ConnectionSettings,
    host: &str,
    port: u16,
    token: &AccessToken,
) -> Config {
    let mut config = Config::new();

    config.host(host);
    config.port(port);
    if let Some(database) = &settings.database {
        config.database(database);
    }
    config.application_name(APPLICATION_NAME);
    config.authentication(AuthMethod::aad_token(token.secret()));
    config.encryption(if settings.encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if settings.trust_server_certificate {
        config.trust_cert();
    }

    config
}

async fn open_stream(config: &Config) -> Result<TcpStream, ExecutionError> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

#[async_trait]
impl BatchExecutor for SqlServerExecutor {
    async fn execute(
        &mut self,
        template: &BatchTemplate,
        rows: &[RowValues],
    ) -> Result<u64, ExecutionError> {
        let mut query = Query::new(template.sql());

        // Parameter order follows the template: LastName, FirstName, Salary, SSN
        for row in rows {
            query.bind(row.last_name.as_str());
            query.bind(row.first_name.as_str());
            query.bind(row.salary);
            query.bind(row.ssn.as_str());
        }

        let result = query.execute(&mut self.client).await?;
        Ok(result.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingExecutor {
        calls: usize,
        fail: bool,
    }

    #[async_trait]
    impl BatchExecutor for CountingExecutor {
        async fn execute(
            &mut self,
            _template: &BatchTemplate,
            rows: &[RowValues],
        ) -> Result<u64, ExecutionError> {
            self.calls += 1;
            if self.fail {
                return Err(ExecutionError::Other("constraint violation".into()));
            }
            Ok(rows.len() as u64)
        }
    }

    fn rows(count: usize) -> Vec<RowValues> {
        (0..count)
            .map(|i| RowValues {
                last_name: "Lee".into(),
                first_name: "Ann".into(),
                salary: 50_000 + i as i32,
                ssn: "123-45-6789".into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_execute_batch_reports_rows() {
        let template = BatchTemplate::build(3).unwrap();
        let mut executor = CountingExecutor {
            calls: 0,
            fail: false,
        };

        let result = execute_batch(&mut executor, &template, &rows(3)).await.unwrap();

        assert_eq!(result.rows_affected, 3);
        assert_eq!(executor.calls, 1);
    }

    #[tokio::test]
    async fn test_execute_batch_returns_failure_as_value() {
        let template = BatchTemplate::build(2).unwrap();
        let mut executor = CountingExecutor {
            calls: 0,
            fail: true,
        };

        let err = execute_batch(&mut executor, &template, &rows(2))
            .await
            .expect_err("Failing batch succeeded");

        assert!(matches!(err.source, ExecutionError::Other(_)));
        assert!(err.to_string().ends_with("constraint violation"));
    }

    #[tokio::test]
    async fn test_unbound_placeholders_fail_without_executing() {
        let template = BatchTemplate::build(4).unwrap();
        let mut executor = CountingExecutor {
            calls: 0,
            fail: false,
        };

        let err = execute_batch(&mut executor, &template, &rows(3))
            .await
            .expect_err("Short batch succeeded");

        assert!(matches!(
            err.source,
            ExecutionError::RowCountMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(executor.calls, 0);
    }

    #[test]
    fn test_client_config_uses_settings() {
        let settings = ConnectionSettings::parse(
            "server=tcp:example.database.windows.net,1444;database=HR;encrypt=true",
        )
        .unwrap();
        let token = AccessToken::new("token", None);

        let config = client_config(&settings, &settings.host, settings.port, &token);

        assert_eq!(config.get_addr(), "example.database.windows.net:1444");
    }
}
