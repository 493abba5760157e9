//! brick-agent CLI: natural-language questions over Brick building graphs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;

use brick_agent::agent::dispatch::dispatch;
use brick_agent::agent::{
    ActionKind, FallbackProposer, LlmProposer, LoopController, OllamaClient, Proposer,
};
use brick_agent::config::AppConfig;
use brick_agent::graph::BrickStore;

#[derive(Parser)]
#[command(
    name = "brick-agent",
    version,
    about = "Iterative natural-language to SPARQL agent for Brick building graphs"
)]
struct Cli {
    /// TOML configuration file (defaults to ./brick-agent.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Brick schema of the building, in Turtle.
    #[arg(long, global = true)]
    ttl: Option<PathBuf>,

    /// Timeseries CSV with a `Datetime` column and one column per sensor.
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    /// Number of trailing CSV rows to ingest.
    #[arg(long, global = true)]
    max_csv_rows: Option<usize>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with the reasoning loop.
    Ask {
        /// The question, e.g. "What is the room temperature?".
        question: String,

        /// Iteration budget for this run.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Propose actions with the Ollama model.
        #[arg(long)]
        llm: bool,

        /// Ollama model name.
        #[arg(long)]
        model: Option<String>,
    },

    /// Keyword search over entities.
    Search {
        text: String,
    },

    /// Show every property of an entity.
    Describe {
        /// Local name, prefixed name or full IRI.
        entity: String,
    },

    /// Show example usages of a property.
    Property {
        name: String,
    },

    /// Run a SPARQL query. Standard prefixes are added when none are declared.
    Sparql {
        query: String,
    },

    /// List sensor and point types in the graph.
    Sensors,

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(rows) = cli.max_csv_rows {
        config.store.max_csv_rows = rows;
    }

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Ask {
            question,
            max_iterations,
            llm,
            model,
        } => {
            if let Some(n) = max_iterations {
                config.agent.max_iterations = n;
            }
            if let Some(model) = model {
                config.llm.ollama.model = model;
            }
            config.llm.enabled |= llm;

            let store = Arc::new(open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?);
            let proposer = build_proposer(&config, &store);
            let max_rows = config.agent.max_result_rows;
            let mut controller = LoopController::new(store, proposer, config.agent);

            let outcome = controller.run(&question)?;
            for (i, action) in outcome.state.actions().iter().enumerate() {
                println!("--- step {} ---", i + 1);
                print!("{}", action.render(true));
            }
            println!();
            println!("Status: {}", outcome.status);
            match outcome.best() {
                Some(best) => {
                    println!("Final query:\n{}\n", best.query);
                    println!("{}", best.to_table(max_rows));
                }
                None => println!("No answer found."),
            }
        }

        Commands::Search { text } => {
            let store = open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?;
            print_primitive(&store, ActionKind::Search, &text, &config);
        }

        Commands::Describe { entity } => {
            let store = open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?;
            print_primitive(&store, ActionKind::DescribeEntity, &entity, &config);
        }

        Commands::Property { name } => {
            let store = open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?;
            print_primitive(&store, ActionKind::DescribeProperty, &name, &config);
        }

        Commands::Sparql { query } => {
            let store = open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?;
            let result = store.execute(&query);
            println!("Status: {} ({})", result.status, result.status.message());
            match &result.error {
                Some(error) => println!("{error}"),
                None => println!("{}", result.to_table(config.agent.max_result_rows)),
            }
        }

        Commands::Sensors => {
            let store = open_store(cli.ttl.as_deref(), cli.csv.as_deref(), &config)?;
            for ty in store.sensor_types()? {
                println!("{ty}");
            }
        }
    }

    Ok(())
}

fn open_store(ttl: Option<&Path>, csv: Option<&Path>, config: &AppConfig) -> Result<BrickStore> {
    let Some(ttl) = ttl else {
        return Err(miette::miette!(
            code = "brick::cli::no_schema",
            help = "Pass the building schema with `--ttl building.ttl`.",
            "no Brick schema given"
        ));
    };
    let store = BrickStore::in_memory(config.store.clone())?;
    let triples = store.load_turtle_file(ttl)?;
    if let Some(csv) = csv {
        let observations = store.ingest_timeseries_csv(csv)?;
        tracing::info!(observations, path = %csv.display(), "timeseries loaded");
    }
    tracing::debug!(triples, total = store.len()?, "store ready");
    Ok(store)
}

fn build_proposer(config: &AppConfig, store: &BrickStore) -> Box<dyn Proposer> {
    if !config.llm.enabled {
        return Box::new(FallbackProposer::new());
    }
    let mut client = OllamaClient::new(config.llm.ollama.clone());
    if !client.probe() {
        tracing::warn!(
            url = %config.llm.ollama.base_url,
            "Ollama unreachable, using the keyword proposer"
        );
        return Box::new(FallbackProposer::new());
    }
    if !client.has_model() {
        tracing::warn!(model = client.model(), "model not pulled locally; generation may fail");
    }
    Box::new(LlmProposer::new(client).with_context(store.prefixes()))
}

fn print_primitive(store: &BrickStore, kind: ActionKind, argument: &str, config: &AppConfig) {
    let out = dispatch(store, kind, argument, config.agent.max_result_rows);
    println!("[{}]", out.observation.status);
    println!("{}", out.observation.text);
}
