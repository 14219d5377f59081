//! Search binary entry point.
//!
//! Command-line access to the adaptive OpenAlex search. Supports single-query
//! and interactive REPL modes, optional reranking, and table or JSON output.
//!
//! # Examples
//!
//! Keywords only:
//! ```bash
//! search --keyword "graph neural networks" --keyword "molecules"
//! ```
//!
//! Keywords plus an example abstract, reranked with the cross-encoder:
//! ```bash
//! search --keyword "drug discovery" --abstract "We learn molecular graphs ..." --rerank cross-encoder
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use research_finder::{
    config::Settings,
    models::{RerankStrategy, SearchRequest, WorkSummary, WorksSearchResponse},
    provider::OpenAlexClient,
    runtime::{CacheDir, ModelRegistry, Reranker},
    search::{SearchOptions, SearchService},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CliSearchService = SearchService<OpenAlexClient, Arc<ModelRegistry>>;

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// Machine-readable JSON envelope
    Json,
}

/// Reranking model for the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RerankArg {
    Embedding,
    CrossEncoder,
}

impl From<RerankArg> for RerankStrategy {
    fn from(arg: RerankArg) -> Self {
        match arg {
            RerankArg::Embedding => RerankStrategy::Embedding,
            RerankArg::CrossEncoder => RerankStrategy::CrossEncoder,
        }
    }
}

/// Search binary CLI for querying OpenAlex
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search OpenAlex with automatic query relaxation",
    long_about = "Build an OpenAlex filter from keywords and example abstracts, relax it until \
                  works are found, and optionally rerank the results with a local model.

EXAMPLES:
  Keywords only:
    search --keyword \"graph neural networks\" --keyword molecules

  With a date range and JSON output:
    search --keyword transformers --start-date 2020-01-01 --format json

  Interactive mode:
    search --interactive"
)]
struct Args {
    /// Keyword to match in title and abstract (repeatable)
    #[arg(long = "keyword", short = 'k', value_name = "TEXT")]
    keywords: Vec<String>,

    /// Example abstract to extract phrases from (repeatable)
    #[arg(long = "abstract", short = 'a', value_name = "TEXT")]
    abstracts: Vec<String>,

    /// Earliest publication date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    start_date: Option<String>,

    /// Latest publication date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    end_date: Option<String>,

    /// Restrict to OpenAlex work types (repeatable), e.g. article
    #[arg(long = "type", value_name = "TYPE")]
    work_types: Vec<String>,

    /// Works fetched per attempt
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Rerank results with a local model
    #[arg(long, value_enum)]
    rerank: Option<RerankArg>,

    /// Number of results to display
    #[arg(long, value_name = "N", default_value = "10")]
    top_k: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i', conflicts_with_all = ["keywords", "abstracts"])]
    interactive: bool,

    /// TOML settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Run a search and optional rerank
async fn execute_search(
    service: &CliSearchService,
    registry: &ModelRegistry,
    request: &SearchRequest,
) -> Result<Vec<WorkSummary>> {
    debug!("Executing search: {:?}", request);

    let outcome = service
        .search(request)
        .await
        .with_context(|| "Search failed")?;
    info!(
        "{} works (min_match={:?}, attempts={})",
        outcome.works.len(),
        outcome.matched_at,
        outcome.attempts
    );

    match request.rerank {
        Some(strategy) => registry
            .rerank(strategy, request, outcome.works)
            .await
            .with_context(|| "Rerank failed"),
        None => Ok(outcome.works),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Format results as a pretty table
fn format_results_table(results: &[WorkSummary]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("Year").add_attribute(Attribute::Bold),
        Cell::new("Keywords").add_attribute(Attribute::Bold),
    ]);

    for (idx, work) in results.iter().enumerate() {
        let authors = work
            .authors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let year = work
            .publication_year
            .map(|y| y.to_string())
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(truncate(&work.title, 60)),
            Cell::new(truncate(&authors, 40)),
            Cell::new(year),
            Cell::new(truncate(&work.keywords, 40)),
        ]);
    }

    table.to_string()
}

/// Format results as the JSON envelope the HTTP API returns
fn format_results_json(results: &[WorkSummary]) -> Result<String> {
    serde_json::to_string_pretty(&WorksSearchResponse::new(results.to_vec()))
        .with_context(|| "Failed to serialize results to JSON")
}

fn print_results(results: &[WorkSummary], top_k: usize, format: OutputFormat, elapsed: f64) -> Result<()> {
    let shown = &results[..results.len().min(top_k)];
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(shown));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed);
        }
        OutputFormat::Json => println!("{}", format_results_json(shown)?),
    }
    Ok(())
}

/// Display detailed view of a single result
fn display_result_detail(work: &WorkSummary, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Id: {}", work.id);
    println!("Title: {}", work.title);
    println!(
        "Authors: {}",
        work.authors
            .iter()
            .map(|a| match &a.affiliation {
                Some(aff) => format!("{} ({})", a.name, aff),
                None => a.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(year) = work.publication_year {
        println!("Year: {}", year);
    }
    println!("Keywords: {}", work.keywords);
    println!("\nAbstract:\n{}", work.abstract_text);
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <kw1, kw2, ...>          - Search with comma-separated keywords");
    println!("  /abstract TEXT           - Add an example abstract to the next searches");
    println!("  /abstracts clear         - Forget all abstracts");
    println!("  /dates START END         - Filter by publication dates (YYYY-MM-DD)");
    println!("  /dates clear             - Clear the date filter");
    println!("  /rerank embedding|cross_encoder|off");
    println!("  /top N                   - Show N results");
    println!("  /format table|json       - Output format");
    println!("  /detail N                - Show full details for result rank N");
    println!("  /help                    - Show this help");
    println!("  Ctrl+D or Ctrl+C         - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    service: CliSearchService,
    registry: Arc<ModelRegistry>,
    mut template: SearchRequest,
    mut top_k: usize,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive OpenAlex Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;
    let mut last_results: Vec<WorkSummary> = Vec::new();

    loop {
        match rl.readline("Search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                if let Some(text) = line.strip_prefix("/abstract ") {
                    template.abstracts.push(text.trim().to_string());
                    println!("{} abstract(s) set", template.abstracts.len());
                    continue;
                }

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts.as_slice() {
                        ["/help"] => print_help(),
                        ["/abstracts", "clear"] => {
                            template.abstracts.clear();
                            println!("Cleared abstracts");
                        }
                        ["/dates", "clear"] => {
                            template.start_date = None;
                            template.end_date = None;
                            println!("Cleared date filter");
                        }
                        ["/dates", start, end] => {
                            template.start_date = Some(start.to_string());
                            template.end_date = Some(end.to_string());
                            println!("Set date filter: {} - {}", start, end);
                        }
                        ["/rerank", "off"] => {
                            template.rerank = None;
                            println!("Reranking disabled");
                        }
                        ["/rerank", name] => match *name {
                            "embedding" => {
                                template.rerank = Some(RerankStrategy::Embedding);
                                println!("Reranking with embedding model");
                            }
                            "cross_encoder" | "cross-encoder" => {
                                template.rerank = Some(RerankStrategy::CrossEncoder);
                                println!("Reranking with cross-encoder");
                            }
                            _ => eprintln!("Invalid strategy: {}", name),
                        },
                        ["/top", n] => match n.parse::<usize>() {
                            Ok(n) if n > 0 => {
                                top_k = n;
                                println!("Set top-k to {}", top_k);
                            }
                            _ => eprintln!("Invalid number: must be a positive integer"),
                        },
                        ["/format", "table"] => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        ["/format", "json"] => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        ["/detail", n] => match n.parse::<usize>() {
                            Ok(rank) if rank > 0 && rank <= last_results.len() => {
                                display_result_detail(&last_results[rank - 1], rank);
                            }
                            _ => eprintln!(
                                "Invalid rank (last search had {} results)",
                                last_results.len()
                            ),
                        },
                        _ => eprintln!("Unknown command: {}. Type /help for available commands.", line),
                    }
                    continue;
                }

                let mut request = template.clone();
                request.keywords = line
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect();

                let start = Instant::now();
                match execute_search(&service, &registry, &request).await {
                    Ok(results) => {
                        if let Err(e) =
                            print_results(&results, top_k, format, start.elapsed().as_secs_f64())
                        {
                            eprintln!("Error formatting results: {}", e);
                        }
                        last_results = results;
                    }
                    Err(e) => eprintln!("Search failed: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    if !args.interactive && args.keywords.is_empty() && args.abstracts.is_empty() {
        anyhow::bail!(
            "Either --keyword/--abstract or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }

    let settings =
        Settings::load(args.config.as_deref()).with_context(|| "Failed to load settings")?;
    let cache = CacheDir::new(settings.models.cache_dir.as_deref())
        .with_context(|| "Failed to prepare model cache directory")?;

    let registry = Arc::new(ModelRegistry::new(&settings.models, cache.path()));
    let client = OpenAlexClient::new(&settings.openalex)
        .with_context(|| "Failed to create OpenAlex client")?;
    let service = SearchService::new(
        client,
        registry.clone(),
        SearchOptions::from(&settings.search),
    );

    let request = SearchRequest {
        keywords: args.keywords,
        abstracts: args.abstracts,
        start_date: args.start_date,
        end_date: args.end_date,
        page_size: args.page_size,
        work_types: args.work_types,
        rerank: args.rerank.map(RerankStrategy::from),
    };

    let result = if args.interactive {
        run_interactive(service, registry, request, args.top_k, args.format).await
    } else {
        let start = Instant::now();
        match execute_search(&service, &registry, &request).await {
            Ok(results) => print_results(
                &results,
                args.top_k,
                args.format,
                start.elapsed().as_secs_f64(),
            ),
            Err(e) => Err(e),
        }
    };

    if let Err(e) = cache.cleanup() {
        error!("Failed to remove temporary model cache: {}", e);
    }
    result
}
