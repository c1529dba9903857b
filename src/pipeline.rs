//! In-process orchestration: partition, run chunks in parallel, assemble.

use std::{future::Future, sync::Arc};

use futures::stream::StreamExt;
use tokio::{
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    assembler::{assemble, FinalReport},
    error::PipelineError,
    extractor::Extractor,
    fetcher::{BlockDetector, FetcherFactory, MarkerBlockDetector},
    job::JobConfig,
    partition::{partition, Chunk},
    processor::{ChunkProcessor, ResultSet},
    worker::{FetchOptions, FetchWorker},
};

pub mod stage;
mod statistics;

pub use statistics::{Statistics, StatisticsSnapshot};

pub struct Pipeline {
    config: JobConfig,
    runner: ChunkRunner,
}

/// Everything a single chunk needs, cheap to clone into a task.
#[derive(Clone)]
struct ChunkRunner {
    factory: Arc<dyn FetcherFactory>,
    detector: Arc<dyn BlockDetector>,
    extractor: Extractor,
    options: FetchOptions,
    statistics: Statistics,
}

impl ChunkRunner {
    async fn process(
        &self,
        chunk: Chunk,
        token: &CancellationToken,
    ) -> Result<ResultSet, PipelineError> {
        let fetcher = self
            .factory
            .create()
            .await
            .map_err(|err| PipelineError::FetcherUnavailable(err.to_string()))?;
        let worker = FetchWorker::new(fetcher, self.extractor.clone(), self.options.clone())
            .with_detector(self.detector.clone())
            .with_statistics(self.statistics.clone());
        Ok(ChunkProcessor::new(worker).process_until(chunk, token).await)
    }
}

impl Pipeline {
    pub fn new(config: JobConfig, factory: Arc<dyn FetcherFactory>) -> Self {
        let runner = ChunkRunner {
            factory,
            detector: Arc::new(MarkerBlockDetector::default()),
            extractor: config.extractor.clone(),
            options: config.options.clone(),
            statistics: Statistics::default(),
        };
        Self { config, runner }
    }

    pub fn with_detector(mut self, detector: Arc<dyn BlockDetector>) -> Self {
        self.runner.detector = detector;
        self
    }

    pub fn statistics(&self) -> &Statistics {
        &self.runner.statistics
    }

    pub fn chunks(&self) -> Result<Vec<Chunk>, PipelineError> {
        Ok(partition(&self.config.urls, self.config.chunk_size)?)
    }

    /// Runs the whole job. Cancelling `token`, or hitting the job deadline,
    /// stops every chunk and assembles whatever was collected.
    pub async fn run(&self, token: CancellationToken) -> Result<FinalReport, PipelineError> {
        let starting_time = Instant::now();
        let chunks = self.chunks()?;
        let report = if chunks.is_empty() {
            tracing::info!("no urls to scrape");
            FinalReport::empty()
        } else {
            let result_sets = self.run_chunks(chunks, token).await?;
            assemble(&result_sets)
        };
        self.runner.statistics.write_to_log(starting_time.elapsed());
        Ok(report)
    }

    /// Like [`run`](Self::run), cancelling the job when `shutdown` resolves.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<FinalReport, PipelineError>
    where
        S: Future + Send + 'static,
    {
        let token = CancellationToken::new();
        let shutdown_token = token.clone();
        let listener = tokio::spawn(async move {
            shutdown.await;
            tracing::warn!("shutdown requested, cancelling job");
            shutdown_token.cancel();
        });
        let result = self.run(token).await;
        listener.abort();
        result
    }

    /// Processes one chunk on its own, for running the stages as separate
    /// processes.
    pub async fn process_chunk(
        &self,
        chunk: Chunk,
        token: &CancellationToken,
    ) -> Result<ResultSet, PipelineError> {
        self.runner.process(chunk, token).await
    }

    /// Runs `chunks` with at most `concurrency` in flight and returns their
    /// result sets sorted by chunk index.
    pub async fn run_chunks(
        &self,
        chunks: Vec<Chunk>,
        token: CancellationToken,
    ) -> Result<Vec<ResultSet>, PipelineError> {
        let token = token.child_token();
        let num_chunks = chunks.len();
        let capacity = num_chunks.max(1);
        let concurrency = self.config.concurrency;
        tracing::info!(chunks = num_chunks, concurrency, "running chunks");

        let indices: Vec<usize> = chunks.iter().map(Chunk::index).collect();
        let (chunks_tx, chunks_rx) = mpsc::channel(capacity);
        let (results_tx, mut results_rx) = mpsc::channel(capacity);
        for chunk in chunks {
            let _ = chunks_tx.send(chunk).await;
        }
        drop(chunks_tx);

        let tracker = TaskTracker::new();
        if let Some(job_timeout) = self.config.job_timeout {
            let deadline_token = token.clone();
            tracker.spawn(async move {
                tokio::select! {
                    _ = sleep(job_timeout) => {
                        tracing::warn!(?job_timeout, "job deadline reached, cancelling");
                        deadline_token.cancel();
                    }
                    _ = deadline_token.cancelled() => {}
                }
            });
        }

        let runner = self.runner.clone();
        let chunks_token = token.clone();
        let chunks_tracker = tracker.clone();
        tracker.spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(chunks_rx)
                .for_each_concurrent(concurrency, |chunk| async {
                    let index = chunk.index();
                    let runner = runner.clone();
                    let token = chunks_token.clone();
                    // a panic ends only this chunk's task
                    let handle =
                        chunks_tracker.spawn(async move { runner.process(chunk, &token).await });
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(err) => Err(PipelineError::ChunkAborted {
                            index,
                            reason: err.to_string(),
                        }),
                    };
                    if let Err(err) = &result {
                        tracing::error!(chunk = index, "chunk failed: {}", err);
                        chunks_token.cancel();
                    }
                    let _ = results_tx.send(result).await;
                })
                .await;
        });
        tracker.close();

        let mut result_sets = Vec::with_capacity(num_chunks);
        let mut failure = None;
        for _ in 0..num_chunks {
            match results_rx.recv().await {
                Some(Ok(result_set)) => result_sets.push(result_set),
                Some(Err(err)) => {
                    failure.get_or_insert(err);
                }
                None => break,
            }
        }
        if failure.is_none() && result_sets.len() < num_chunks {
            let index = indices
                .into_iter()
                .find(|index| result_sets.iter().all(|set| set.chunk_index() != *index))
                .unwrap_or_default();
            failure = Some(PipelineError::ChunkAborted {
                index,
                reason: "no result set delivered".to_string(),
            });
        }

        // releases the deadline watcher
        token.cancel();
        tracker.wait().await;

        if let Some(err) = failure {
            return Err(err);
        }
        result_sets.sort_by_key(ResultSet::chunk_index);
        Ok(result_sets)
    }
}
