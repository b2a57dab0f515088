use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use press_ingest::config::Config;
use press_ingest::feed::HttpFetcher;
use press_ingest::storage::{Database, DatabaseError};
use press_ingest::sync::{Pipeline, ReconciliationReport, TracingProgress};

/// Recent articles listed by `--stats`
const STATS_RECENT: i64 = 20;

#[derive(Parser, Debug)]
#[command(
    name = "press-ingest",
    about = "Ingest a news site's feed and sitemap into a deduplicated SQLite catalog"
)]
struct Args {
    /// Config file (TOML); missing file means defaults
    #[arg(long, value_name = "FILE", default_value = "press-ingest.toml")]
    config: PathBuf,

    /// Database path, overriding config and PRESS_INGEST_DB
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// Reconcile only; report missing links without fetching them
    #[arg(long)]
    skip_backfill: bool,

    /// Fetch at most N missing links this run (0 = unlimited)
    #[arg(long, value_name = "N")]
    max_backfill: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Print category statistics and recent articles, then exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.apply_env();
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(n) = args.max_backfill {
        config.max_backfill = n;
    }
    config.validate().context("Invalid configuration")?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database is locked by another run. Wait for it to finish and try again.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    if args.stats {
        return print_stats(&db).await;
    }

    let pipeline = Pipeline::new(&config)
        .context("Invalid configuration")?
        .skip_backfill(args.skip_backfill);
    let http = HttpFetcher::new(&config).context("Failed to build HTTP client")?;

    tracing::info!(
        feed = %config.feed_url,
        sitemap = %config.sitemap_url,
        db = %config.database_path,
        "Starting ingestion run"
    );
    let report = pipeline.run(&db, &http, &TracingProgress).await;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &ReconciliationReport) {
    println!(
        "Feed: {} records, {} ingested, {} failed",
        report.feed_records, report.feed_ingested, report.feed_failed
    );
    println!("Sitemap: {} URLs", report.sitemap_urls);
    println!(
        "Reconciled {} candidates in {} batches ({} failed): {} existing, {} missing",
        report.total_candidates,
        report.batches,
        report.failed_batches.len(),
        report.existing,
        report.missing
    );
    println!(
        "Backfilled {}, deferred {}, failed {}",
        report.backfilled,
        report.deferred,
        report.failed_urls.len()
    );
    for failure in &report.failed_urls {
        println!("  [{:?}] {}: {}", failure.stage, failure.url, failure.reason);
    }
    println!("Articles in store: {}", report.article_count);
}

async fn print_stats(db: &Database) -> Result<()> {
    let total = db.article_count().await.context("Failed to count articles")?;
    println!("Articles: {total}");

    println!();
    println!("Categories:");
    for stat in db.category_stats().await.context("Failed to load category stats")? {
        println!("  {:<12} {}", stat.name, stat.article_count);
    }

    println!();
    println!("Recent articles:");
    let recent = db
        .recent_articles_with_categories(STATS_RECENT)
        .await
        .context("Failed to load recent articles")?;
    for article in recent {
        let date = article
            .pub_date
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!(
            "  {} {} [{}]",
            date,
            article.title,
            article.categories.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
