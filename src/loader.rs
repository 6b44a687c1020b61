use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::Rng;
use tracing::{error, info};

use crate::config::LoaderConfig;
use crate::corpus::NameCorpus;
use crate::errors::{GenerateError, TemplateError};
use crate::executor::{execute_batch, BatchExecutor};
use crate::row::{generate_row, RowValues};
use crate::template::BatchTemplate;

/// A single overwrite-in-place status line on stderr
pub fn console_progress(batch_count: usize) -> ProgressBar {
    let progress = ProgressBar::with_draw_target(
        Some(batch_count as u64),
        ProgressDrawTarget::stderr(),
    );
    progress.set_style(
        ProgressStyle::with_template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress
}

/// Sends `batch_count` INSERTs of `batch_size` generated rows, one after another
#[derive(Debug)]
pub struct BatchLoader<'a> {
    config: &'a LoaderConfig,
    template: BatchTemplate,
    first_names: &'a NameCorpus,
    last_names: &'a NameCorpus,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        config: &'a LoaderConfig,
        first_names: &'a NameCorpus,
        last_names: &'a NameCorpus,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            config,
            template: BatchTemplate::build(config.batch_size)?,
            first_names,
            last_names,
        })
    }

    pub fn template(&self) -> &BatchTemplate {
        &self.template
    }

    /// Fresh values for every placeholder of the template
    pub fn generate_batch<R: Rng>(&self, rng: &mut R) -> Result<Vec<RowValues>, GenerateError> {
        (0..self.template.batch_size())
            .map(|_| generate_row(&mut *rng, self.first_names, self.last_names))
            .collect()
    }

    /// Run every batch. A failed batch is logged and its rows are dropped; only a
    /// failure to generate rows stops the run.
    pub async fn run<E, R>(
        &self,
        executor: &mut E,
        rng: &mut R,
        progress: &ProgressBar,
    ) -> Result<(), GenerateError>
    where
        E: BatchExecutor + ?Sized,
        R: Rng,
    {
        let batch_size = self.template.batch_size();
        let batch_count = self.config.batch_count;
        let mut last_millis = 0;

        info!(batch_size, batch_count, "sending batches");

        for batch in 0..batch_count {
            progress.set_position(batch as u64);
            progress.set_message(format!(
                "Sending Batch ({batch_size} rows each): {} of {batch_count}. Last exec: {last_millis}ms",
                batch + 1
            ));

            let rows = self.generate_batch(rng)?;

            match execute_batch(executor, &self.template, &rows).await {
                Ok(result) => last_millis = result.elapsed_millis(),
                Err(e) => {
                    last_millis = e.elapsed.as_millis() as u64;
                    progress.suspend(|| error!(batch = batch + 1, "{e}"));
                }
            }
        }

        progress.set_position(batch_count as u64);
        info!(last_millis, "finished sending batches");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BatchLoader;
    use crate::config::LoaderConfig;
    use crate::corpus::NameCorpus;
    use crate::errors::{ExecutionError, GenerateError, TemplateError};
    use crate::executor::BatchExecutor;
    use crate::row::RowValues;
    use crate::template::BatchTemplate;
    use async_trait::async_trait;
    use indicatif::ProgressBar;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Everything a test subscriber writes, kept in memory
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails the batches listed in `fail_on` (1-based) and records everything it is sent
    #[derive(Default)]
    struct ScriptedExecutor {
        fail_on: Vec<usize>,
        attempted: Vec<usize>,
        inserted: Vec<RowValues>,
    }

    #[async_trait]
    impl BatchExecutor for ScriptedExecutor {
        async fn execute(
            &mut self,
            _template: &BatchTemplate,
            rows: &[RowValues],
        ) -> Result<u64, ExecutionError> {
            let batch = self.attempted.len() + 1;
            self.attempted.push(batch);

            if self.fail_on.contains(&batch) {
                return Err(ExecutionError::Other(format!("simulated failure on batch {batch}")));
            }

            self.inserted.extend_from_slice(rows);
            Ok(rows.len() as u64)
        }
    }

    fn corpora() -> (NameCorpus, NameCorpus) {
        (
            ["Ann", "Bo"].into_iter().collect(),
            ["Lee", "Ng"].into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn test_runs_every_batch() {
        let (first, last) = corpora();
        let config = LoaderConfig::default().with_batch_size(2).with_batch_count(5);
        let loader = BatchLoader::new(&config, &first, &last).unwrap();
        let mut executor = ScriptedExecutor::default();
        let mut rng = ChaChaRng::seed_from_u64(3);

        loader
            .run(&mut executor, &mut rng, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(executor.attempted, vec![1, 2, 3, 4, 5]);
        assert_eq!(executor.inserted.len(), 10);
        for row in &executor.inserted {
            assert!(first.contains(&row.first_name));
            assert!(last.contains(&row.last_name));
        }
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_the_run() {
        let (first, last) = corpora();
        let config = LoaderConfig::default().with_batch_size(2).with_batch_count(5);
        let loader = BatchLoader::new(&config, &first, &last).unwrap();
        let mut executor = ScriptedExecutor {
            fail_on: vec![3],
            ..Default::default()
        };
        let mut rng = ChaChaRng::seed_from_u64(3);

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        loader
            .run(&mut executor, &mut rng, &ProgressBar::hidden())
            .await
            .unwrap();

        // Batches 4 and 5 are still attempted, batch 3's rows are lost
        assert_eq!(executor.attempted, vec![1, 2, 3, 4, 5]);
        assert_eq!(executor.inserted.len(), 8);

        let logs = logs.contents();
        let failure = logs
            .lines()
            .find(|line| line.contains("simulated failure on batch 3"))
            .expect("Batch failure was not logged");
        assert!(failure.contains("ERROR"), "{failure}");
        assert!(failure.contains("batch=3"), "{failure}");
        assert_eq!(logs.matches("simulated failure").count(), 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_stops_before_executing() {
        let first = NameCorpus::from_lines("");
        let last: NameCorpus = ["Lee"].into_iter().collect();
        let config = LoaderConfig::default().with_batch_size(2).with_batch_count(5);
        let loader = BatchLoader::new(&config, &first, &last).unwrap();
        let mut executor = ScriptedExecutor::default();
        let mut rng = ChaChaRng::seed_from_u64(3);

        let err = loader
            .run(&mut executor, &mut rng, &ProgressBar::hidden())
            .await
            .expect_err("Run with an empty corpus succeeded");

        assert!(matches!(err, GenerateError::InvalidState(_)));
        assert!(executor.attempted.is_empty());
    }

    #[test]
    fn test_zero_batch_size_fails_fast() {
        let (first, last) = corpora();
        let config = LoaderConfig::default().with_batch_size(0);

        assert_eq!(
            BatchLoader::new(&config, &first, &last).unwrap_err(),
            TemplateError::EmptyBatch
        );
    }

    #[test]
    fn test_generate_batch_fills_the_template() {
        let (first, last) = corpora();
        let config = LoaderConfig::default().with_batch_size(7);
        let loader = BatchLoader::new(&config, &first, &last).unwrap();
        let mut rng = ChaChaRng::seed_from_u64(11);

        let rows = loader.generate_batch(&mut rng).unwrap();

        assert_eq!(rows.len(), 7);
        assert_eq!(loader.template().parameter_count(), rows.len() * 4);
    }

    #[tokio::test]
    async fn test_zero_batches_sends_nothing() {
        let (first, last) = corpora();
        let config = LoaderConfig::default().with_batch_size(2).with_batch_count(0);
        let loader = BatchLoader::new(&config, &first, &last).unwrap();
        let mut executor = ScriptedExecutor::default();
        let mut rng = ChaChaRng::seed_from_u64(3);

        loader
            .run(&mut executor, &mut rng, &ProgressBar::hidden())
            .await
            .unwrap();

        assert!(executor.attempted.is_empty());
    }
}
