use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use imgmirror::config::{self, Settings};
use imgmirror::{utils, ImageSearch};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgmirror")]
#[command(about = "Image search that races interchangeable search mirrors", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, short, global = true, env = "IMGMIRROR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search images (e.g., imgmirror search "red panda" -n 10)
    Search {
        /// Free-text query
        query: String,

        /// Maximum number of images to return
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Run the canary query against every configured mirror and rank them
    Probe,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 日志输出到 stderr, stdout 只留给结果表格
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (settings, path) = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Search { query, limit } => handle_search(&settings, &query, limit).await?,
        Commands::Probe => handle_probe(&settings).await?,
        Commands::Config => handle_config(&settings, &path),
    }

    Ok(())
}

// --- Handlers ---

async fn handle_search(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let engine = ImageSearch::from_settings(settings)?;
    let limit = engine.effective_limit(limit.unwrap_or(settings.max_results));

    // Ctrl-C 取消正在进行的查询
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = engine.query(query, limit, &cancel).await;

    let Some(mirror) = outcome.mirror.as_deref() else {
        if cancel.is_cancelled() {
            println!("Cancelled.");
            return Ok(());
        }
        if engine.registry().members().is_empty() {
            bail!("No search mirror is reachable. Run 'imgmirror probe' to check them.");
        }
        println!("Nothing to search for.");
        return Ok(());
    };

    println!("Mirror: {}", mirror);
    println!(
        "Candidates: {}  Accepted: {}",
        outcome.candidate_count,
        outcome.accepted.len()
    );
    println!("{}", "-".repeat(70));
    println!("{:<4} {:<11} {:<6} URL", "#", "SIZE", "FORMAT");
    println!("{}", "-".repeat(70));

    for (i, image) in outcome.accepted.iter().enumerate() {
        println!(
            "{:<4} {:<11} {:<6} {}",
            i + 1,
            format!("{}x{}", image.width, image.height),
            image.format.as_deref().unwrap_or("?"),
            image.url
        );
    }
    println!("{}", "-".repeat(70));

    Ok(())
}

async fn handle_probe(settings: &Settings) -> Result<()> {
    let engine = ImageSearch::from_settings(settings)?;
    let results = utils::benchmark_mirrors(engine.search_client().mirrors(), &settings.mirrors).await;

    println!(); // Newline after progress bar

    println!("{:<4} {:<10} {:<8} MIRROR", "RANK", "LATENCY", "RESULTS");
    println!("{}", "-".repeat(60));

    for (i, res) in results.iter().enumerate() {
        let latency_str = format!("{}ms", res.latency.as_millis());
        let results_str = match res.results {
            Some(n) => n.to_string(),
            None => "Failed".to_string(),
        };

        println!(
            "{:<4} {:<10} {:<8} {}",
            i + 1,
            latency_str,
            results_str,
            res.address
        );
    }

    match results.first() {
        Some(best) if best.is_usable() => {
            println!("{}", "-".repeat(60));
            println!("Fastest mirror: {}", best.address);
        }
        _ => bail!("No mirror returned canary results. Please check your network connection."),
    }

    Ok(())
}

fn handle_config(settings: &Settings, path: &std::path::Path) {
    println!("Config file: {}", path.display());
    println!("{}", "-".repeat(60));
    println!("{:<18} {}s", "fetch_budget_secs", settings.fetch_budget_secs);
    println!("{:<18} {}", "max_results", settings.max_results);
    println!("{:<18} {}", "user_agent", settings.user_agent);
    println!("{:<18} {}", "mirrors", settings.mirrors.len());
    for mirror in &settings.mirrors {
        println!("  - {}", mirror);
    }
}
