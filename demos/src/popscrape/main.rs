use std::{fs, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use popscrape::{
    assemble,
    fetcher::{CloningFactory, HttpFetcher},
    job::parse_url_source,
    pipeline::stage,
    JobSpec, Pipeline,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "popscrape", about = "Find the most popular product in a list of URLs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split the job's URLs into chunk files
    Partition {
        #[arg(long, env = "POPSCRAPE_JOB")]
        job: PathBuf,
        /// Extra URL sources: JSON arrays, {"urls": [...]} or one URL per line
        #[arg(long)]
        source: Vec<PathBuf>,
        #[arg(long, env = "CHUNKS_DIR")]
        chunks_dir: PathBuf,
    },
    /// Scrape one chunk file into a result file
    Scrape {
        #[arg(long, env = "POPSCRAPE_JOB")]
        job: PathBuf,
        #[arg(long)]
        chunk: PathBuf,
        #[arg(long, env = "TASK_RESULTS_DIR")]
        results_dir: PathBuf,
    },
    /// Merge result files into the final report
    Assemble {
        #[arg(long, env = "TASK_RESULTS_DIR")]
        results_dir: PathBuf,
        #[arg(long, env = "OUTPUT_DIR")]
        output_dir: PathBuf,
    },
    /// Run all three stages in this process
    Run {
        #[arg(long, env = "POPSCRAPE_JOB")]
        job: PathBuf,
        #[arg(long)]
        source: Vec<PathBuf>,
        #[arg(long, env = "OUTPUT_DIR")]
        output_dir: Option<PathBuf>,
    },
}

fn load_job(path: &PathBuf, sources: &[PathBuf]) -> anyhow::Result<JobSpec> {
    let json =
        fs::read_to_string(path).with_context(|| format!("reading job '{}'", path.display()))?;
    let mut job = JobSpec::from_json(&json)?;
    for source in sources {
        let content = fs::read_to_string(source)
            .with_context(|| format!("reading url source '{}'", source.display()))?;
        job.urls.extend(parse_url_source(&content));
    }
    Ok(job)
}

fn pipeline(job: &JobSpec) -> anyhow::Result<Pipeline> {
    let config = job.validate()?;
    let fetcher = HttpFetcher::new()?;
    Ok(Pipeline::new(config, Arc::new(CloningFactory::new(fetcher))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?)
        .init();

    match Cli::parse().command {
        Command::Partition {
            job,
            source,
            chunks_dir,
        } => {
            let job = load_job(&job, &source)?;
            let chunks = pipeline(&job)?.chunks()?;
            let paths = stage::write_chunks(&chunks_dir, &chunks)?;
            tracing::info!("created {} chunks", paths.len());
        }
        Command::Scrape {
            job,
            chunk,
            results_dir,
        } => {
            let job = load_job(&job, &[])?;
            let chunk = stage::read_chunk(&chunk)?;
            let token = CancellationToken::new();
            let shutdown = token.clone();
            tokio::spawn(async move {
                if let Err(error) = signal::ctrl_c().await {
                    tracing::error!("Failed to listen for event: {:?}", error);
                    return;
                }
                shutdown.cancel();
            });
            let result_set = pipeline(&job)?.process_chunk(chunk, &token).await?;
            stage::write_result_set(&results_dir, &result_set)?;
            tracing::info!("{}", stage::describe(&result_set));
        }
        Command::Assemble {
            results_dir,
            output_dir,
        } => {
            let result_sets = stage::read_result_sets(&results_dir)?;
            let report = assemble(&result_sets);
            stage::write_report(&output_dir, &report)?;
        }
        Command::Run {
            job,
            source,
            output_dir,
        } => {
            let job = load_job(&job, &source)?;
            let report = pipeline(&job)?.run_until(signal::ctrl_c()).await?;
            match output_dir {
                Some(dir) => {
                    stage::write_report(&dir, &report)?;
                }
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }
    Ok(())
}
