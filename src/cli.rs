//! Command-line front end for the fetch engine.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{self, HarvestConfig};
use crate::discover::{discover_image_urls, fetch_page};
use crate::manager::{FetchEngine, FetchReport};
use crate::models::DownloadOutcome;

#[derive(Debug, Parser)]
#[command(name = "imgharvest")]
#[command(about = "Download the images of a web page", long_about = None)]
pub struct Cli {
    /// Config file to use instead of the XDG default.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Discover the images on a page and download them.
    Fetch {
        /// Page to harvest; also names the output folder.
        page_url: String,

        /// Read image URLs from this file (one per line) instead of parsing the page.
        #[arg(long, value_name = "FILE")]
        urls_file: Option<PathBuf>,

        /// Output root directory.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Maximum simultaneous downloads (1-200).
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..=200))]
        concurrency: Option<u16>,

        /// Folder name for this run; defaults to the page URL.
        #[arg(long)]
        run_id: Option<String>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the config path and effective settings.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                page_url,
                urls_file,
                out,
                concurrency,
                run_id,
                json,
            } => {
                let mut cfg = cfg;
                if let Some(n) = concurrency {
                    cfg.concurrency = Some(usize::from(n));
                }
                if let Some(out) = out {
                    cfg.output_dir = out;
                }
                let run_id = run_id.unwrap_or_else(|| page_url.clone());
                run_fetch(&cfg, &page_url, urls_file.as_deref(), &run_id, json).await?;
            }
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

async fn run_fetch(
    cfg: &HarvestConfig,
    page_url: &str,
    urls_file: Option<&Path>,
    run_id: &str,
    json: bool,
) -> Result<()> {
    let engine = FetchEngine::new(cfg)?;

    let urls = match urls_file {
        Some(path) => read_url_list(path)?,
        None => {
            let html = fetch_page(engine.client(), page_url).await?;
            discover_image_urls(&html, page_url)?
                .into_iter()
                .map(|asset| asset.url)
                .collect()
        }
    };
    if urls.is_empty() {
        bail!("no image URLs found for {page_url}");
    }

    let report = engine.download_all(&urls, &cfg.output_dir, run_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn run_config(cfg: &HarvestConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());
    println!("effective concurrency: {}", cfg.effective_concurrency());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading url list {}", path.display()))?;
    Ok(parse_url_list(&data))
}

fn parse_url_list(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_report(report: &FetchReport) {
    for entry in &report.outcomes {
        if let DownloadOutcome::Failed { reason } = &entry.outcome {
            println!("failed  {}  ({})", entry.asset.url, reason);
        }
    }
    let s = &report.stats;
    println!(
        "{} saved, {} skipped, {} failed of {} in {:.1}s ({:.1}/s) -> {}",
        s.success,
        s.skipped,
        s.failed,
        s.total,
        s.elapsed_secs,
        s.throughput,
        report.directory.display()
    );
}
