use adgraph_analysis::config::AnalysisConfig;
use adgraph_analysis::database::Database;
use adgraph_analysis::graph_ops::fetch_node_by_object_id;
use adgraph_analysis::graph_store::GraphFixture;
use adgraph_analysis::logging::init_logging;
use adgraph_analysis::lookups::Lookup;
use adgraph_analysis::parallel_executor::{progress_channel, ParallelExecutor};
use adgraph_analysis::{run_analysis, AnalysisContext, AnalysisStatus, CancellationToken, GraphDatabase, MemoryGraph};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "adgraph", version, about = "Attack-path analysis over AD and Azure graphs")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Relational store path, overrides the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every analysis pass over a graph fixture
    Run {
        /// JSON graph fixture
        #[arg(short, long)]
        fixture: PathBuf,
    },
    /// Run one lookup from a node
    Query {
        #[arg(short, long)]
        fixture: PathBuf,
        #[arg(short, long, value_enum)]
        lookup: Lookup,
        /// objectid of the starting node
        #[arg(short, long)]
        object_id: String,
        /// Return justifying paths instead of nodes
        #[arg(long)]
        paths: bool,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        /// 0 means unlimited
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Show feature flags, optionally setting some first
    Flags {
        /// key=true|false, repeatable
        #[arg(long = "set")]
        set: Vec<String>,
    },
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}

fn load_graph(path: &Path) -> anyhow::Result<MemoryGraph> {
    let fixture =
        GraphFixture::from_path(path).with_context(|| format!("Failed to load fixture {}", path.display()))?;
    let graph = MemoryGraph::new();
    graph.load_fixture(&fixture)?;
    Ok(graph)
}

fn parse_flag(raw: &str) -> anyhow::Result<(&str, bool)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected key=value, got '{}'", raw))?;
    let enabled = value
        .trim()
        .parse::<bool>()
        .with_context(|| format!("Invalid value for flag {}", key))?;
    Ok((key.trim(), enabled))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AnalysisConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    let _guard = init_logging(&config)?;

    info!("=======================================================");
    info!("adgraph {} starting", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());
    info!("=======================================================");

    match cli.command {
        Command::Run { fixture } => {
            if config.disable_analysis {
                warn!("Analysis is disabled by configuration");
                return Ok(());
            }

            let database = Database::new(&config.database_path)?;
            config.flags.apply(&database)?;
            let graph = load_graph(&fixture)?;
            let (progress_tx, mut progress_rx) = progress_channel(256);
            let executor = ParallelExecutor::new(config.parallel_config()).with_progress(progress_tx);
            tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    debug!("{}: {} ({:.0}%)", update.operation, update.message, update.percentage);
                }
            });

            let token = CancellationToken::new();
            let mut ctx = AnalysisContext::with_token(token.clone());
            if let Some(timeout) = config.analysis_timeout() {
                ctx = ctx.with_timeout(timeout);
            }
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling analysis");
                    token.cancel();
                }
            });

            let outcome = run_analysis(&ctx, &graph, &database, &executor).await;
            print_json(&outcome, cli.pretty)?;
            if outcome.status == AnalysisStatus::Failed {
                return Err(anyhow!("Analysis failed: {} passes reported errors", outcome.errors.len()));
            }
        }
        Command::Query {
            fixture,
            lookup,
            object_id,
            paths,
            skip,
            limit,
        } => {
            let graph = load_graph(&fixture)?;
            let snapshot = graph.snapshot()?;
            let node = fetch_node_by_object_id(&snapshot, &object_id)?;
            let ctx = AnalysisContext::background();
            let result = lookup.run(&ctx, &snapshot, &node, paths, skip, limit)?;
            info!("{:?} from {}: {} results", lookup, object_id, result.len());
            print_json(&result, cli.pretty)?;
        }
        Command::Flags { set } => {
            let database = Database::new(&config.database_path)?;
            config.flags.apply(&database)?;
            for raw in &set {
                let (key, enabled) = parse_flag(raw)?;
                database.set_feature_flag(key, enabled)?;
                info!("Feature flag {} set to {}", key, enabled);
            }
            print_json(&database.feature_flags()?, cli.pretty)?;
        }
    }

    Ok(())
}
