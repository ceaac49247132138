use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;

use sift::config::CONFIG;
use sift::data_models::{RunOutcome, StopSignal};
use sift::engine::ResearchEngine;
use sift::events::{ConsoleSink, DedupSink};
use sift::fetcher::PageFetcher;
use sift::llm::LlmClient;
use sift::search::DuckDuckGoSearch;

/// Answer a question by iteratively searching the web and reading pages.
#[derive(Parser, Debug)]
#[command(name = "sift", version)]
struct Cli {
    /// The question to research. Read from stdin when omitted.
    query: Vec<String>,

    /// Maximum number of search attempts before a best-effort answer.
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Maximum number of search results considered per attempt.
    #[arg(long)]
    max_results: Option<usize>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        std::env::var("SIFT_LOG")
            .ok()
            .and_then(|l| l.parse().ok())
            .unwrap_or(tracing::Level::INFO)
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Bridge log crate -> tracing (library code logs through `log`)
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn read_query(cli: &Cli) -> anyhow::Result<String> {
    let query = if cli.query.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read query from stdin")?;
        input
    } else {
        cli.query.join(" ")
    };
    let query = query.trim().to_string();
    if query.is_empty() {
        bail!("Query cannot be empty");
    }
    Ok(query)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let query = read_query(&cli)?;

    let mut settings = CONFIG.research.clone();
    if let Some(max_attempts) = cli.max_attempts {
        settings.max_attempts = max_attempts;
    }
    if let Some(max_results) = cli.max_results {
        settings.max_results = max_results;
    }

    let fetcher = PageFetcher::new(&CONFIG.fetcher)?;
    let search_client = reqwest::Client::builder()
        .user_agent(CONFIG.fetcher.user_agent.clone())
        .timeout(CONFIG.fetcher.timeout)
        .build()?;

    let engine = ResearchEngine::new(
        Arc::new(LlmClient::new(CONFIG.llm.clone())?),
        Arc::new(DuckDuckGoSearch::new(search_client)),
        Arc::new(fetcher),
        Arc::new(DedupSink::new(ConsoleSink)),
        settings,
    );

    let stop = StopSignal::new();
    let stop_on_ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, stopping after the current step");
            stop_on_ctrl_c.stop();
        }
    });

    match engine.search_and_improve(&query, &stop).await {
        // the console sink has already printed the answer
        RunOutcome::Answered(answer) => {
            log::info!(
                "answered after {} attempt(s) ({})",
                answer.attempts,
                answer.kind.as_str()
            );
            Ok(())
        }
        // the console sink has already reported the stop
        RunOutcome::Cancelled => std::process::exit(130),
    }
}
