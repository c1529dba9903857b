//! A library for finding the most popular product among a list of URLs.
//!
//! URLs are split into chunks ([`partition`]), each chunk is scraped
//! sequentially by a [`ChunkProcessor`] through a [`PageFetcher`], and the
//! per-chunk [`ResultSet`]s are reduced to a [`FinalReport`] by [`assemble`].
//! [`Pipeline`] runs all three stages in one process.

pub mod assembler;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod job;
pub mod partition;
pub mod pipeline;
pub mod processor;
pub mod worker;

pub use assembler::{assemble, FinalReport};
pub use error::{ConfigError, PipelineError};
pub use extractor::{ExtractionRules, Extractor};
pub use fetcher::{FetchErrorKind, FetcherFactory, PageFetcher};
pub use job::{JobConfig, JobSpec, UrlSpec};
pub use partition::{partition, Chunk};
pub use pipeline::Pipeline;
pub use processor::{ChunkProcessor, ResultSet};
pub use worker::{FetchOptions, FetchWorker, ScrapeOutcome, ScrapedItem};
