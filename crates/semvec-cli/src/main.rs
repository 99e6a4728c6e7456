//! semvec CLI - Command-line interface
//!
//! Usage:
//!   semvec demo
//!   semvec search <text> [--limit 3] [--output-fields pk,sentence]
//!   semvec insert <text>...
//!   semvec count
//!   semvec drop
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use clap::{Parser, Subcommand};
use semvec_core::{AppConfig, DropOutcome, Hit, LoggingConfig};
use semvec_vector::{create_embedder, create_vector_store, CollectionManager};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_CONFIG: &str = "semvec.toml";
const SAMPLE_QUERY: &str = "The quick brown fox jumps over the lazy dog.";
const SAMPLE_ENTRY: &str = "This is a new entry";
const LOG_FILE: &str = "semvec.log";

#[derive(Parser)]
#[command(name = "semvec")]
#[command(about = "Sentence embeddings in a vector database")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or attach, seed, search, insert and drop the collection
    Demo,
    /// Search the collection for similar sentences
    Search {
        /// Query text
        text: String,
        /// Maximum number of hits
        #[arg(short, long, default_value_t = 3)]
        limit: usize,
        /// Fields returned with each hit
        #[arg(long, value_delimiter = ',', default_value = "pk,sentence")]
        output_fields: Vec<String>,
    },
    /// Insert sentences, continuing the primary key sequence
    Insert {
        /// Sentences to insert
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Print the number of stored entities
    Count,
    /// Drop the collection
    Drop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    let store = create_vector_store(&config.store).await?;
    let embedder = create_embedder(&config.model)?;
    let mut manager = CollectionManager::new(store, embedder, config.store.clone());

    let result = run(&mut manager, &config, cli.command).await;

    // The session is released whether or not the command succeeded
    if let Err(e) = manager.close().await {
        tracing::warn!(error = %e, "Failed to close store session");
    }

    result
}

/// Load configuration; without `--config` a missing default file means defaults
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => AppConfig::from_file(DEFAULT_CONFIG)?,
        None => AppConfig::default(),
    };

    Ok(config.with_env_override()?)
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=error,reqwest=error,h2=error,tonic=error",
            logging.level
        ))
    });

    let stdout = fmt::layer()
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = if logging.json_format {
        vec![stdout.json().boxed()]
    } else {
        vec![stdout.boxed()]
    };

    if let Some(dir) = &logging.log_dir {
        let file = open_log_file(dir)?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    Ok(())
}

/// Open the log file in `dir` for appending, creating the directory if needed
fn open_log_file(dir: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let path = dir.join(LOG_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

async fn run(
    manager: &mut CollectionManager,
    config: &AppConfig,
    command: Commands,
) -> anyhow::Result<()> {
    manager
        .connect()
        .await
        .context("Failed to connect to vector store")?;

    match command {
        Commands::Demo => demo(manager, config).await,
        Commands::Search {
            text,
            limit,
            output_fields,
        } => {
            if !attach_existing(manager).await? {
                return Ok(());
            }
            manager.load().await?;

            let fields: Vec<&str> = output_fields.iter().map(String::as_str).collect();
            let hits = manager.search(&text, limit, &fields).await?;
            print_hits(&hits)?;
            Ok(())
        }
        Commands::Insert { texts } => {
            prepare(manager).await?;

            let result = manager.append(&texts).await?;
            println!("Inserted {} rows: {}", result.insert_count, result.ids.join(", "));
            Ok(())
        }
        Commands::Count => {
            if !attach_existing(manager).await? {
                return Ok(());
            }
            println!("{}", manager.entity_count().await?);
            Ok(())
        }
        Commands::Drop => {
            let name = manager.collection_name().to_string();
            report_drop(&name, manager.drop(&name).await?);
            Ok(())
        }
    }
}

/// Check existence, derive the schema and attach to or create the collection
async fn prepare(manager: &mut CollectionManager) -> anyhow::Result<()> {
    let name = manager.collection_name().to_string();
    let exists = manager.check_existence(&name).await?;
    let schema = manager.derive_schema()?;
    manager.attach_or_create(&name, schema, exists).await?;
    Ok(())
}

/// Attach to the collection without creating it; false when it is missing
async fn attach_existing(manager: &mut CollectionManager) -> anyhow::Result<bool> {
    let name = manager.collection_name().to_string();
    if !manager.check_existence(&name).await? {
        println!("Collection '{name}' does not exist");
        return Ok(false);
    }

    let schema = manager.derive_schema()?;
    manager.attach_or_create(&name, schema, true).await?;
    Ok(true)
}

async fn demo(manager: &mut CollectionManager, config: &AppConfig) -> anyhow::Result<()> {
    prepare(manager).await?;

    if manager.entity_count().await? == 0 {
        match &config.data {
            Some(path) => {
                let rows = read_rows(path)?;
                tracing::info!(path = %path.display(), rows = rows.len(), "Seeding collection");
                manager.insert(&rows, 0).await?;
            }
            None => tracing::warn!("Collection is empty and no data file is configured"),
        }
    }

    manager.load().await?;

    let hits = manager
        .search(SAMPLE_QUERY, 3, &["pk", "sentence"])
        .await?;
    print_hits(&hits)?;

    manager.append(&[SAMPLE_ENTRY]).await?;

    let name = manager.collection_name().to_string();
    report_drop(&name, manager.drop(&name).await?);
    Ok(())
}

/// Read the seed file, one row per non-blank line
fn read_rows(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn print_hits(hits: &[Hit]) -> anyhow::Result<()> {
    if hits.is_empty() {
        println!("No hits");
    }
    for hit in hits {
        println!("{}", serde_json::to_string(hit)?);
    }
    Ok(())
}

fn report_drop(name: &str, outcome: DropOutcome) {
    match outcome {
        DropOutcome::Dropped => println!("Dropped collection '{name}'"),
        DropOutcome::NotFound => println!("Collection '{name}' does not exist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_rows_skips_blank_lines() {
        let path = std::env::temp_dir().join(format!("semvec-rows-{}.txt", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "first line\n\n   \n  second line  ").unwrap();

        let rows = read_rows(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(rows, vec!["first line", "second line"]);
    }

    #[test]
    fn test_read_rows_missing_file() {
        assert!(read_rows(Path::new("/nonexistent/semvec/rows.txt")).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["semvec", "search", "hello"]);
        match cli.command {
            Commands::Search {
                text,
                limit,
                output_fields,
            } => {
                assert_eq!(text, "hello");
                assert_eq!(limit, 3);
                assert_eq!(output_fields, vec!["pk", "sentence"]);
            }
            _ => panic!("expected search"),
        }
        assert!(cli.config.is_none());
    }

    fn memory_config() -> AppConfig {
        AppConfig::from_toml_str(
            r#"
            [store]
            backend = "memory"

            [model]
            provider = "hashing"
            dimension = 32
            "#,
        )
        .unwrap()
    }

    async fn memory_manager(config: &AppConfig) -> CollectionManager {
        let store = create_vector_store(&config.store).await.unwrap();
        let embedder = create_embedder(&config.model).unwrap();
        CollectionManager::new(store, embedder, config.store.clone())
    }

    #[tokio::test]
    async fn test_read_commands_do_not_create_collection() {
        let config = memory_config();
        let mut manager = memory_manager(&config).await;

        run(&mut manager, &config, Commands::Count).await.unwrap();
        run(
            &mut manager,
            &config,
            Commands::Search {
                text: "hello".to_string(),
                limit: 3,
                output_fields: vec!["pk".to_string()],
            },
        )
        .await
        .unwrap();

        assert!(manager.collection().is_none());
        assert!(!manager.check_existence("sentences").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_attaches_to_existing_collection() {
        let config = memory_config();
        let mut manager = memory_manager(&config).await;

        let insert = Commands::Insert {
            texts: vec!["one".to_string(), "two".to_string()],
        };
        run(&mut manager, &config, insert).await.unwrap();
        run(&mut manager, &config, Commands::Count).await.unwrap();

        let handle = manager.collection().unwrap();
        assert!(!handle.created());
        assert_eq!(manager.entity_count().await.unwrap(), 2);
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let dir = std::env::temp_dir().join(format!("semvec-logs-{}", std::process::id()));
        let mut file = open_log_file(&dir).unwrap();
        writeln!(file, "line").unwrap();

        assert!(dir.join(LOG_FILE).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_demo_against_memory_store() {
        let config = memory_config();
        let mut manager = memory_manager(&config).await;

        run(&mut manager, &config, Commands::Demo).await.unwrap();
        assert!(manager.collection().is_none());
        assert!(!manager.check_existence("sentences").await.unwrap());
    }
}
