//! JSON files that carry work between the three stages when they run as
//! separate processes: `data_{index}.json` chunks, `chunk_{index}_results.json`
//! result sets and the final `most_popular_item.json`.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    assembler::FinalReport, error::PipelineError, partition::Chunk, processor::ResultSet,
    worker::ScrapeOutcome,
};

pub const REPORT_FILE_NAME: &str = "most_popular_item.json";

pub fn chunk_file_name(index: usize) -> String {
    format!("data_{}.json", index)
}

pub fn result_file_name(index: usize) -> String {
    format!("chunk_{}_results.json", index)
}

fn parse_index(file_name: &str, prefix: &str, suffix: &str) -> Option<usize> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}

/// On-disk shape of a result set, with counters for people reading it.
#[derive(Debug, Serialize, Deserialize)]
struct ResultFile {
    #[serde(flatten)]
    result_set: ResultSet,
    #[serde(default)]
    success_count: usize,
    #[serde(default)]
    error_count: usize,
}

#[derive(Debug, Serialize)]
struct ResultFileRef<'a> {
    #[serde(flatten)]
    result_set: &'a ResultSet,
    success_count: usize,
    error_count: usize,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(|err| PipelineError::json(path, err))?;
    let mut file = fs::File::create(path).map_err(|err| PipelineError::io(path, err))?;
    file.write_all(json.as_bytes())
        .map_err(|err| PipelineError::io(path, err))?;
    tracing::info!("stage: wrote '{}'", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let file = fs::File::open(path).map_err(|err| PipelineError::io(path, err))?;
    serde_json::from_reader(io::BufReader::new(file)).map_err(|err| PipelineError::json(path, err))
}

/// Files in `dir` named `{prefix}{index}{suffix}`, sorted by index.
fn indexed_files(
    dir: &Path,
    prefix: &str,
    suffix: &str,
) -> Result<Vec<(usize, PathBuf)>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::io(dir, err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| parse_index(name, prefix, suffix));
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

/// Writes one file per chunk into `dir`, creating it if needed. Chunk files
/// left over from an earlier job are removed first.
pub fn write_chunks(dir: &Path, chunks: &[Chunk]) -> Result<Vec<PathBuf>, PipelineError> {
    fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
    for (_, stale) in indexed_files(dir, "data_", ".json")? {
        fs::remove_file(&stale).map_err(|err| PipelineError::io(&stale, err))?;
    }
    chunks
        .iter()
        .map(|chunk| {
            let path = dir.join(chunk_file_name(chunk.index()));
            write_json(&path, chunk)?;
            Ok(path)
        })
        .collect()
}

pub fn read_chunk(path: &Path) -> Result<Chunk, PipelineError> {
    read_json(path)
}

pub fn read_chunks(dir: &Path) -> Result<Vec<Chunk>, PipelineError> {
    indexed_files(dir, "data_", ".json")?
        .into_iter()
        .map(|(_, path)| read_chunk(&path))
        .collect()
}

pub fn write_result_set(dir: &Path, result_set: &ResultSet) -> Result<PathBuf, PipelineError> {
    let path = dir.join(result_file_name(result_set.chunk_index()));
    write_json(
        &path,
        &ResultFileRef {
            result_set,
            success_count: result_set.success_count(),
            error_count: result_set.failure_count(),
        },
    )?;
    Ok(path)
}

/// Reads every result file in `dir`, in chunk-index order.
///
/// A file that cannot be read or decoded is logged and skipped; the report
/// is then built from the remaining chunks.
pub fn read_result_sets(dir: &Path) -> Result<Vec<ResultSet>, PipelineError> {
    let files = indexed_files(dir, "chunk_", "_results.json")?;
    tracing::info!("stage: found {} result files in '{}'", files.len(), dir.display());
    let mut result_sets = Vec::with_capacity(files.len());
    for (_, path) in files {
        match read_json::<ResultFile>(&path) {
            Ok(file) => result_sets.push(file.result_set),
            Err(err) => {
                tracing::error!("stage: skipping result file: {}", err);
            }
        }
    }
    result_sets.sort_by_key(ResultSet::chunk_index);
    Ok(result_sets)
}

pub fn write_report(dir: &Path, report: &FinalReport) -> Result<PathBuf, PipelineError> {
    let path = dir.join(REPORT_FILE_NAME);
    write_json(&path, report)?;
    Ok(path)
}

pub fn read_report(path: &Path) -> Result<FinalReport, PipelineError> {
    read_json(path)
}

/// Summary line for a result set, as logged by the scrape stage.
pub fn describe(result_set: &ResultSet) -> String {
    let failed: Vec<&str> = result_set
        .outcomes()
        .iter()
        .filter(|outcome| !outcome.is_success())
        .map(ScrapeOutcome::url)
        .collect();
    let mut line = format!(
        "chunk {}: {} success, {} errors",
        result_set.chunk_index(),
        result_set.success_count(),
        result_set.failure_count(),
    );
    if !failed.is_empty() {
        line.push_str(&format!(" ({})", failed.join(", ")));
    }
    if result_set.cancelled() {
        line.push_str(&format!(", cancelled at {}", result_set.finished_at()));
    }
    line
}
