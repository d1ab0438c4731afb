//! # QueryDesk CLI
//!
//! Inspects a query catalog through the file-backed service.
//!
//! ## Usage
//!
//! ```bash
//! # List definitions matching "users", graph sources only
//! querydesk --catalog catalog.json definitions --search users --source graph
//!
//! # Run a query with parameters
//! querydesk run active-users -p dept=\"sales\" -p limit=10
//!
//! # Print the effective configuration
//! querydesk config
//! ```

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use clap::{Parser, Subcommand};
use querydesk::config::LoggingConfig;
use querydesk::{
    Config, DefinitionFilter, ExecuteOptions, FileQueryService, Parameters, QueryCore, SortKey,
    SortOrder, ViewPreferences,
};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(name = "querydesk", version, about = "Inspect and run catalog queries")]
struct Cli {
    /// Configuration file (defaults to querydesk.toml + querydesk.local.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Catalog file, overrides service.catalog_path
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List definitions
    Definitions {
        #[arg(long, default_value = "")]
        search: String,
        /// Exact data source tag
        #[arg(long)]
        source: Option<String>,
        /// name, category, data_source or id
        #[arg(long, default_value = "name", value_parser = parse_sort_key)]
        sort: SortKey,
        #[arg(long)]
        desc: bool,
        /// Also merge definitions from the graph provider
        #[arg(long)]
        graph: bool,
    },
    /// Execute a query and print its rows
    Run {
        query_id: String,
        /// Parameter as key=json (bare values are taken as strings)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
        #[arg(long)]
        no_cache: bool,
    },
    /// Check the service health
    Health,
    /// Print the effective configuration as TOML
    Config,
}

fn parse_sort_key(raw: &str) -> Result<SortKey, String> {
    match raw {
        "name" => Ok(SortKey::Name),
        "category" => Ok(SortKey::Category),
        "data_source" | "source" => Ok(SortKey::DataSource),
        "id" => Ok(SortKey::Id),
        other => Err(format!("unknown sort key '{other}'")),
    }
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {path}"))?,
        None => Config::load().context("loading configuration")?,
    };
    if let Some(catalog) = cli.catalog {
        config.service.catalog_path = catalog;
    }

    init_tracing(&config.logging);

    let service = FileQueryService::new(config.service.catalog_path.clone());
    let core = QueryCore::new(config, service);

    match cli.command {
        Command::Definitions {
            search,
            source,
            sort,
            desc,
            graph,
        } => {
            let filter = DefinitionFilter::default();
            core.refresh_definitions(&filter).await?;
            if graph {
                core.load_graph_definitions(&filter).await?;
            }

            let prefs = ViewPreferences {
                search_text: search,
                data_source: source,
                sort_by: sort,
                sort_order: if desc { SortOrder::Desc } else { SortOrder::Asc },
            };
            for def in core.filtered_definitions(&prefs) {
                println!("{:<24} {:<10} {:<12} {}", def.id, def.data_source, def.category, def.name);
            }
        }
        Command::Run {
            query_id,
            params,
            no_cache,
        } => {
            let parameters: Parameters = params.into_iter().collect();
            let options = ExecuteOptions {
                use_cache: !no_cache,
                ..Default::default()
            };
            let outcome = core.execute_query(&query_id, &parameters, options).await?;
            for row in &outcome.result.rows {
                println!("{row}");
            }
            eprintln!("{} rows ({:?})", outcome.result.row_count(), outcome.source);
        }
        Command::Health => {
            let health = core.check_health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Config => {
            print!("{}", toml::to_string(core.config())?);
        }
    }

    Ok(())
}

fn init_tracing(logging_config: &LoggingConfig) {
    // QUERYDESK_LOG takes precedence over the configured level
    let level = std::env::var("QUERYDESK_LOG").unwrap_or_else(|_| logging_config.level.clone());
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = logging_config.format == "json";

    let writer = match &logging_config.file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
                    return;
                }
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking)
        }
        None => tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr),
    };

    let base = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base.json().finish())
    } else {
        Box::new(base.compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
