use encrypted_seeder::config::{DEFAULT_CONNECTION_STRING, SQL_DATABASE_SCOPE};
use encrypted_seeder::{
    console_progress, AzureCliTokenProvider, AzureKeyVaultProvider, BatchLoader, CacheOptions,
    CachingKeyStoreProvider, ConnectionSettings, KeyStoreProviderRegistry, LoaderConfig,
    NameCorpus, SeederError, SqlServerExecutor, TokenProvider, AZURE_KEY_VAULT_PROVIDER_NAME,
};
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use std::sync::Arc;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SeederError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = LoaderConfig::default();

    // Random first and last names
    let first_names = NameCorpus::load(&config.first_names_path)?;
    let last_names = NameCorpus::load(&config.last_names_path)?;
    info!(
        first_names = first_names.len(),
        last_names = last_names.len(),
        "loaded name corpora"
    );

    let loader = BatchLoader::new(&config, &first_names, &last_names)?;
    let settings = ConnectionSettings::parse(DEFAULT_CONNECTION_STRING)?;

    let credential = Arc::new(AzureCliTokenProvider::new());
    let sql_token = credential.get_token(SQL_DATABASE_SCOPE).await?;

    let mut executor = SqlServerExecutor::connect(&settings, &sql_token).await?;

    let mut registry = KeyStoreProviderRegistry::new();
    registry.register(
        AZURE_KEY_VAULT_PROVIDER_NAME,
        Box::new(CachingKeyStoreProvider::new(
            AzureKeyVaultProvider::new(credential.clone()),
            CacheOptions::default(),
        )),
    )?;

    if settings.column_encryption {
        let keys = executor.column_encryption_keys().await?;
        registry.verify_all(&keys).await?;
    }

    let mut rng = ChaChaRng::from_entropy();
    let progress = console_progress(config.batch_count);

    loader.run(&mut executor, &mut rng, &progress).await?;

    progress.finish();

    Ok(())
}
