use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use swipefeed::article::{Article, ArticleStatus};
use swipefeed::cache::{CacheRouter, CacheStorage, HttpFetcher, PrecacheManifest};
use swipefeed::config::Config;
use swipefeed::feed::{FeedController, FeedQuery, FeedStatus, PaginationClient};
use swipefeed::persistence::LocalStore;
use swipefeed::source::{ArticleSource, HttpSource, SqliteSource};
use swipefeed::storage::{Database, DatabaseError, IngestDocument};
use swipefeed::util::{relative_time, single_line, truncate_summary};

/// Summary length in the listing, in characters
const SUMMARY_CHARS: usize = 160;

/// Get the config directory path (~/.config/swipefeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("swipefeed");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "swipefeed", about = "Headless swipe-feed reader over a paginated article store")]
struct Args {
    /// Config file (defaults to ~/.config/swipefeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Import a JSON array of article documents into the local store
    #[arg(long, value_name = "FILE")]
    seed: Option<PathBuf>,

    /// Only show articles tagged with this topic
    #[arg(long)]
    topic: Option<String>,

    /// List available topics and exit
    #[arg(long)]
    topics: bool,

    /// Number of scroll-to-end cycles after the first page
    #[arg(long, default_value_t = 3, value_name = "N")]
    pages: u32,

    /// Install the precache manifest and the offline fallbacks, then exit
    #[arg(long)]
    precache: bool,
}

/// Read a seed file into documents ready for ingestion.
///
/// Entries without an `id` get one derived from their `originalUrl`;
/// entries without a `status` are treated as published. Every entry must
/// decode as an article.
fn load_seed(path: &Path) -> Result<Vec<IngestDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&content).context("Seed file must be a JSON array of articles")?;

    let mut documents = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let serde_json::Value::Object(mut fields) = entry else {
            anyhow::bail!("Seed entry {index} is not an object");
        };

        let id = match fields.remove("id") {
            Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id,
            _ => {
                let url = fields
                    .get("originalUrl")
                    .and_then(|v| v.as_str())
                    .with_context(|| format!("Seed entry {index} has neither id nor originalUrl"))?;
                format!("{:x}", Sha256::digest(url.as_bytes()))
            }
        };
        fields
            .entry("status")
            .or_insert_with(|| ArticleStatus::Published.as_str().into());

        let document = serde_json::Value::Object(fields);
        let article = Article::from_document(&id, &document)
            .with_context(|| format!("Seed entry {index} is not a valid article"))?;

        documents.push(IngestDocument {
            id,
            status: article.status.as_str().to_string(),
            published_at: article.published_at.timestamp_millis(),
            topics: article.topics,
            document,
        });
    }
    Ok(documents)
}

fn print_article(position: usize, article: &Article, now: chrono::DateTime<Utc>) {
    println!("{:>3}. {}", position, single_line(&article.title));
    println!(
        "     {} | {}",
        single_line(&article.source_name),
        relative_time(article.published_at, now)
    );
    let summary = single_line(&article.summary);
    if !summary.is_empty() {
        println!("     {}", truncate_summary(&summary, SUMMARY_CHARS));
    }
}

async fn run_precache(config: &Config, db: Database) -> Result<()> {
    let manifest_path = config
        .cache
        .precache_manifest
        .as_deref()
        .context("No precache_manifest set in the [cache] section")?;
    let manifest = PrecacheManifest::load(manifest_path)?;

    let app_origin = config
        .cache
        .app_origin_url()
        .context("Invalid cache.app_origin")?;
    let routes = config.cache.route_table().context("Invalid cache origin")?;
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = HttpFetcher::new(client).with_timeout(config.cache.network_timeout());
    let storage = CacheStorage::new(db, config.cache.quota_bytes);

    let router = CacheRouter::new(app_origin, routes, storage, Arc::new(fetcher))
        .context("Invalid cache.app_origin")?
        .with_fallbacks(&config.cache.offline_page, &config.cache.fallback_image)
        .context("Invalid offline fallback path")?;

    let summary = router
        .install(&manifest)
        .await
        .context("Precache install failed")?;
    let removed = router
        .cleanup_outdated()
        .await
        .context("Failed to clean up outdated precache entries")?;
    println!(
        "Precached {} assets ({} unchanged, {} fallbacks), removed {} outdated",
        summary.precached, summary.reused, summary.fallbacks, removed
    );

    for (cache, stats) in router.stats().await? {
        if stats.total_entries > 0 {
            println!(
                "  {:<18} {:>4} entries {:>10} bytes",
                cache.as_str(),
                stats.total_entries,
                stats.total_size_bytes
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // User-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let db_path = config_dir.join("swipefeed.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of swipefeed appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let store = LocalStore::from_database(db.clone());
    tracing::info!(installed = store.is_installed().await, "Opened local store");

    if let Some(seed_path) = &args.seed {
        let documents = load_seed(seed_path)?;
        let written = db
            .ingest_documents(&documents)
            .await
            .context("Failed to import seed articles")?;
        println!("Imported {} articles from {}", written, seed_path.display());
    }

    if args.precache {
        run_precache(&config, db.clone()).await?;
        db.close().await;
        return Ok(());
    }

    let source: Arc<dyn ArticleSource> = match &config.source.base_url {
        Some(base_url) => {
            let client = reqwest::Client::builder()
                .build()
                .context("Failed to build HTTP client")?;
            let api_key = config
                .source
                .api_key
                .clone()
                .or_else(|| std::env::var("SWIPEFEED_API_KEY").ok());
            let source = HttpSource::open(client, base_url, api_key)
                .with_context(|| format!("Invalid source.base_url: {base_url}"))?;
            Arc::new(source)
        }
        None => Arc::new(SqliteSource::new(db.clone())),
    };

    let client = PaginationClient::new(source)
        .with_timeout(config.feed.fetch_timeout())
        .with_has_more(config.feed.has_more);

    if args.topics {
        let topics = client.available_topics().await;
        if topics.is_empty() {
            println!("No topics available.");
        }
        for topic in topics {
            println!("{topic}");
        }
        client.close().await;
        db.close().await;
        return Ok(());
    }

    let mut controller = FeedController::new(Arc::new(client.clone()), config.feed.settings());
    match &args.topic {
        Some(topic) => controller.set_query(FeedQuery::Topic(topic.clone())),
        None => {
            controller.start();
        }
    }
    controller.settle().await;

    if controller.status() == FeedStatus::Error {
        eprintln!(
            "Error: {}",
            controller.error_message().unwrap_or("Failed to load the feed")
        );
        client.close().await;
        db.close().await;
        std::process::exit(1);
    }

    let now = Utc::now();
    let mut printed = 0;
    if controller.articles().is_empty() {
        println!("No articles for {}.", controller.query());
    }

    for cycle in 0..=args.pages {
        for article in &controller.articles()[printed..] {
            printed += 1;
            print_article(printed, article, now);
        }
        if cycle == args.pages || !controller.has_more() {
            break;
        }

        // Scroll to the last loaded card
        let last = controller.articles().len().saturating_sub(1);
        if !controller.report_visible(last) {
            break;
        }
        controller.settle().await;
        if let Some(error) = controller.background_error() {
            eprintln!("Warning: could not load more articles: {error}");
            break;
        }
    }

    if controller.status() == FeedStatus::Exhausted {
        println!("-- end of feed --");
    }

    client.close().await;
    db.close().await;
    Ok(())
}
