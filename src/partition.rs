use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, job::UrlSpec};

/// A contiguous slice of the job's URLs, processed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    index: usize,
    urls: Vec<UrlSpec>,
}

impl Chunk {
    pub fn new(index: usize, urls: Vec<UrlSpec>) -> Self {
        Self { index, urls }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn urls(&self) -> &[UrlSpec] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Splits `urls` into ordered chunks of at most `chunk_size` URLs.
///
/// Chunk `i` holds `urls[i * chunk_size..(i + 1) * chunk_size]`; only the last
/// one may be shorter. An empty list yields no chunks.
pub fn partition(urls: &[UrlSpec], chunk_size: usize) -> Result<Vec<Chunk>, ConfigError> {
    if chunk_size < 1 {
        return Err(ConfigError::InvalidChunkSize(0));
    }
    let chunks: Vec<Chunk> = urls
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, urls)| Chunk::new(index, urls.to_vec()))
        .collect();
    tracing::info!(
        urls = urls.len(),
        chunk_size,
        chunks = chunks.len(),
        "partitioned urls"
    );
    Ok(chunks)
}
