use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use veyra_core::config::AppConfig;
use veyra_core::traits::{IntentClassifier, ModelClient, StateStore};
use veyra_gateway::GatewayServer;
use veyra_router::{AgentRegistry, LlmClassifier, RouteDispatcher, TurnRequest};
use veyra_store::SqliteStateStore;
use veyra_tools::{register_builtins, IdentityWrapper, RecordStore, ToolCatalog};

#[derive(Parser)]
#[command(
    name = "veyra",
    version,
    about = "Intent-routed conversational agent backend"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "veyra.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve,
    /// Validate the configuration and agent graph, then exit
    Check,
    /// Run a single turn from the command line
    Turn {
        /// The user message
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
        /// Conversation thread to continue
        #[arg(long, default_value = "cli")]
        thread: String,
        /// Acting user id
        #[arg(long, default_value = "cli-user")]
        user: String,
    },
}

struct Runtime {
    dispatcher: Arc<RouteDispatcher>,
    store: Arc<SqliteStateStore>,
}

/// Wire the full dispatcher stack from a loaded config. All
/// configuration errors surface here, before any request is accepted.
fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let records = Arc::new(RecordStore::new());
    let mut catalog = ToolCatalog::new();
    register_builtins(&mut catalog, records);
    let catalog = Arc::new(catalog);

    let registry = Arc::new(AgentRegistry::build(
        &config.agents,
        &catalog,
        &config.model,
        config.router.node_max_turns,
    )?);

    let model: Arc<dyn ModelClient> = Arc::from(veyra_llm::create_client(&config.model));
    let classifier: Arc<dyn IntentClassifier> = Arc::new(LlmClassifier::new(
        model.clone(),
        config.model.clone(),
        registry
            .intent_types()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    ));

    let store = Arc::new(SqliteStateStore::open(std::path::Path::new(
        &config.store.path,
    ))?);

    let dispatcher = Arc::new(RouteDispatcher::new(
        registry,
        classifier,
        model,
        IdentityWrapper::new(catalog),
        store.clone() as Arc<dyn StateStore>,
        config.router.clone(),
        config.edges.clone(),
    )?);

    Ok(Runtime { dispatcher, store })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("veyra=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let runtime = build_runtime(&config)?;
            let server =
                GatewayServer::new(config.gateway.clone(), runtime.dispatcher, runtime.store);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Check => {
            build_runtime(&config)?;
            println!("Configuration OK");
            println!(
                "  model:  {} ({})",
                config.model.model_id, config.model.provider
            );
            println!("  agents: {}", config.agents.len());
            println!("  edges:  {}", config.edges.len());
            println!("  store:  {}", config.store.path);
        }
        Commands::Turn {
            message,
            thread,
            user,
        } => {
            let message = message.join(" ");
            if message.trim().is_empty() {
                anyhow::bail!("empty message");
            }
            let runtime = build_runtime(&config)?;
            let response = runtime
                .dispatcher
                .run_turn(TurnRequest {
                    message,
                    thread_id: thread,
                    user_id: user,
                    correlation_id: None,
                    prior_turns: vec![],
                    context: Default::default(),
                })
                .await?;
            println!("{}", response.reply);
        }
    }

    Ok(())
}
