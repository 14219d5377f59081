//! Evaluation binary entry point.
//!
//! Runs every fixture query paper through the rerankers and reports P@k per
//! query, model and variant.
//!
//! # Examples
//!
//! Evaluate both models against a JSON fixture:
//! ```bash
//! evaluate --fixture papers.json
//! ```
//!
//! Convert the plain-text paper list and evaluate the cross-encoder only:
//! ```bash
//! evaluate --raw papers.txt --write-fixture papers.json --model cross-encoder
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use research_finder::{
    config::Settings,
    fixture::{
        build_query, build_search_space, load_fixture, parse_raw_fixture, EvalRow, Evaluator,
        FixturePaper, QueryVariant,
    },
    models::RerankStrategy,
    runtime::{CacheDir, ModelRegistry, Reranker},
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Which rerankers to evaluate
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Embedding,
    CrossEncoder,
    Both,
}

impl ModelArg {
    fn strategies(self) -> Vec<RerankStrategy> {
        match self {
            ModelArg::Embedding => vec![RerankStrategy::Embedding],
            ModelArg::CrossEncoder => vec![RerankStrategy::CrossEncoder],
            ModelArg::Both => vec![RerankStrategy::Embedding, RerankStrategy::CrossEncoder],
        }
    }
}

fn strategy_name(strategy: RerankStrategy) -> &'static str {
    match strategy {
        RerankStrategy::Embedding => "embedding",
        RerankStrategy::CrossEncoder => "cross_encoder",
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "evaluate",
    version,
    about = "Measure reranker precision on a grouped paper fixture"
)]
#[command(group(ArgGroup::new("input").required(true).args(["fixture", "raw"])))]
struct Args {
    /// JSON fixture file
    #[arg(long, value_name = "PATH")]
    fixture: Option<PathBuf>,

    /// Plain-text paper list
    #[arg(long, value_name = "PATH")]
    raw: Option<PathBuf>,

    /// Save the parsed plain-text list as a JSON fixture
    #[arg(long, value_name = "PATH", requires = "raw")]
    write_fixture: Option<PathBuf>,

    /// Rerankers to evaluate
    #[arg(long, value_enum, default_value = "both")]
    model: ModelArg,

    /// Write all result rows as JSON
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Exit with an error if any query falls below the threshold
    #[arg(long)]
    strict: bool,

    /// TOML settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn load_papers(args: &Args) -> Result<Vec<FixturePaper>> {
    if let Some(path) = &args.fixture {
        return load_fixture(path).with_context(|| "Failed to load fixture");
    }

    let path = args
        .raw
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No input given"))?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let papers = parse_raw_fixture(&text);
    info!("Parsed {} papers from {}", papers.len(), path.display());

    if let Some(out) = &args.write_fixture {
        let json = serde_json::to_string_pretty(&papers)?;
        std::fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
        println!("Wrote {} papers to {}", papers.len(), out.display());
    }
    Ok(papers)
}

async fn run(
    evaluator: &Evaluator,
    registry: &ModelRegistry,
    strategies: &[RerankStrategy],
) -> Result<Vec<EvalRow>> {
    let cases = evaluator.query_papers()?;
    let total = (cases.len() * strategies.len() * QueryVariant::ALL.len()) as u64;

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .with_context(|| "Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let mut rows = Vec::new();
    for &strategy in strategies {
        let model = strategy_name(strategy);
        for variant in QueryVariant::ALL {
            for (group, paper) in &cases {
                pb.set_message(format!("{} {} {}", model, variant.as_str(), paper.id));

                let request = build_query(paper, variant);
                let space = build_search_space(evaluator.papers(), &paper.id);
                let ranked = registry
                    .rerank(strategy, &request, space)
                    .await
                    .with_context(|| format!("Rerank failed for {}", paper.id))?;

                rows.push(evaluator.evaluate(model, variant, group, &paper.id, &ranked));
                pb.inc(1);
            }
        }
    }
    pb.finish_with_message("done");
    Ok(rows)
}

fn format_rows(rows: &[EvalRow]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Model").add_attribute(Attribute::Bold),
        Cell::new("Variant").add_attribute(Attribute::Bold),
        Cell::new("Group").add_attribute(Attribute::Bold),
        Cell::new("Query").add_attribute(Attribute::Bold),
        Cell::new("k").add_attribute(Attribute::Bold),
        Cell::new("Hits").add_attribute(Attribute::Bold),
        Cell::new("P@k").add_attribute(Attribute::Bold),
        Cell::new("Missing").add_attribute(Attribute::Bold),
        Cell::new("Result").add_attribute(Attribute::Bold),
    ]);

    for row in rows {
        let (verdict, color) = if row.pass {
            ("PASS", Color::Green)
        } else {
            ("FAIL", Color::Red)
        };
        table.add_row(vec![
            Cell::new(&row.model),
            Cell::new(row.variant.as_str()),
            Cell::new(&row.group),
            Cell::new(&row.query_id),
            Cell::new(row.k),
            Cell::new(row.hit_in_top_k),
            Cell::new(format!("{:.2}", row.p_at_k)),
            Cell::new(row.missing_in_top_k.join(", ")),
            Cell::new(verdict).fg(color),
        ]);
    }

    table.to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let papers = load_papers(&args)?;
    let evaluator = Evaluator::new(papers).with_context(|| "Invalid fixture")?;

    let settings =
        Settings::load(args.config.as_deref()).with_context(|| "Failed to load settings")?;
    let cache = CacheDir::new(settings.models.cache_dir.as_deref())
        .with_context(|| "Failed to prepare model cache directory")?;
    let registry = Arc::new(ModelRegistry::new(&settings.models, cache.path()));

    let result = run(&evaluator, &registry, &args.model.strategies()).await;
    if let Err(e) = cache.cleanup() {
        error!("Failed to remove temporary model cache: {}", e);
    }
    let rows = result?;

    println!("{}", format_rows(&rows));
    let passed = rows.iter().filter(|r| r.pass).count();
    println!("\n{}/{} queries passed", passed, rows.len());

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote results to {}", path.display());
    }

    if args.strict && passed < rows.len() {
        anyhow::bail!("{} queries below threshold", rows.len() - passed);
    }
    Ok(())
}
