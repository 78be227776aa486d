// GridOps Assistant - Main Entry Point
//
// The host layer of the triad:
// - `serve`: run the demo grid MCP server on stdio
// - `chat`: interactive client REPL with model switching and tool dispatch
// - `discover`: connect to a server, print its catalog, and exit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridops_assistant::config::Config;
use gridops_assistant::context::ConversationContext;
use gridops_assistant::mcp::{McpSession, RetryConfig, StdioTransport};
use gridops_assistant::metrics;
use gridops_assistant::orchestrator::{Orchestrator, OrchestratorError};
use gridops_assistant::provider::{ModelSelector, ProviderRouter};
use gridops_assistant::server::grid_demo_server;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// GridOps Assistant: MCP triad for grid operations analytics
#[derive(Parser, Debug)]
#[command(name = "gridops")]
#[command(author = "GridOps Assistant Contributors")]
#[command(version)]
#[command(about = "MCP host/client/server for grid operations", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file (default: ~/.config/gridops/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the grid operations MCP server on stdio
    Serve,

    /// Start the interactive client REPL
    Chat {
        /// Command to spawn the MCP server (default: from config)
        #[arg(long)]
        server_command: Option<String>,

        /// Arguments for the MCP server
        #[arg(long, num_args = 0.., value_delimiter = ' ', allow_hyphen_values = true)]
        server_args: Vec<String>,

        /// Initial model selector, `provider:model` (default: from config)
        #[arg(long)]
        model: Option<String>,
    },

    /// Connect to an MCP server, print its catalog, and exit
    Discover {
        /// Command to spawn the MCP server (default: from config)
        #[arg(long)]
        server_command: Option<String>,

        /// Arguments for the MCP server
        #[arg(long, num_args = 0.., value_delimiter = ' ', allow_hyphen_values = true)]
        server_args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr: stdout belongs to the JSON-RPC stream in serve mode
    // and to conversation output in chat mode
    let filter = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    if let Err(e) = metrics::init() {
        tracing::warn!("Metrics registration failed: {}", e);
    }

    match args.command {
        Some(Commands::Serve) => {
            info!("Starting grid operations MCP server on stdio...");
            serve().await?;
        }
        Some(Commands::Chat {
            server_command,
            server_args,
            model,
        }) => {
            info!("Starting interactive chat mode...");
            chat(config, server_command, server_args, model).await?;
        }
        Some(Commands::Discover {
            server_command,
            server_args,
        }) => {
            info!("Discovering server catalog...");
            discover(config, server_command, server_args).await?;
        }
        None => {
            info!("No command specified. Use \"gridops --help\" for usage.");
        }
    }

    Ok(())
}

/// Run the demo grid server over this process's stdin/stdout
async fn serve() -> Result<()> {
    let server = grid_demo_server().context("Failed to build grid demo catalog")?;
    server.serve_stdio().await
}

/// Resolve the server command line from CLI flags and config
fn server_command_line(
    config: &Config,
    command: Option<String>,
    args: Vec<String>,
) -> (String, Vec<String>) {
    match command {
        Some(command) => (command, args),
        None => (config.server.command.clone(), config.server.args.clone()),
    }
}

/// Build a connected orchestrator from the configuration
async fn connect_orchestrator(
    config: &Config,
    server_command: Option<String>,
    server_args: Vec<String>,
    model: Option<String>,
) -> Result<Orchestrator<StdioTransport>> {
    let (command, cmd_args) = server_command_line(config, server_command, server_args);

    let transport = StdioTransport::spawn(&command, &cmd_args)
        .await
        .with_context(|| format!("Failed to spawn MCP server '{command}'"))?;

    let mut session = McpSession::new(transport)
        .with_call_timeout(Duration::from_secs(config.server.call_timeout_secs));
    if config.server.retry {
        session = session.with_retry(RetryConfig::default());
    }

    let router = ProviderRouter::from_config(&config.providers);

    let selector: ModelSelector = model
        .unwrap_or_else(|| config.limits.default_model.clone())
        .parse()
        .context("Invalid model selector")?;
    if !router.has_provider(selector.provider()) {
        anyhow::bail!(
            "Model selector '{}' names unconfigured provider '{}'",
            selector,
            selector.provider()
        );
    }

    let context =
        ConversationContext::new(config.limits.effective_system_prompt(), selector);

    let mut orchestrator = Orchestrator::new(session, router, context)
        .with_max_tool_rounds(config.limits.max_tool_rounds);
    orchestrator
        .connect()
        .await
        .context("Failed to connect MCP session")?;

    Ok(orchestrator)
}

/// Interactive client REPL
async fn chat(
    config: Config,
    server_command: Option<String>,
    server_args: Vec<String>,
    model: Option<String>,
) -> Result<()> {
    let mut orchestrator =
        connect_orchestrator(&config, server_command, server_args, model).await?;

    println!(
        "\nConnected to grid operations server with {} tools",
        orchestrator.catalog().tools.len()
    );
    println!("Using model: {}", orchestrator.context().selector());
    println!("\nGrid Operations MCP Client Started!");
    println!(
        "Type your operational queries, 'model:<provider>:<model>' to change models, or 'quit' to exit."
    );
    println!("Type 'context' to view the conversation history, 'metrics' for loop metrics.");

    use std::io::Write;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nOperational Query: ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();

        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.eq_ignore_ascii_case("context") {
            println!("\nConversation History:");
            println!(
                "{}",
                serde_json::to_string_pretty(orchestrator.context().turns())?
            );
            continue;
        }
        if query.eq_ignore_ascii_case("metrics") {
            println!("\n{}", metrics::dump());
            continue;
        }
        if let Some(selector) = query.strip_prefix("model:") {
            match selector.parse::<ModelSelector>() {
                Ok(selector) => match orchestrator.switch_model(selector) {
                    Ok(()) => {
                        println!("Model changed to: {}", orchestrator.context().selector());
                    }
                    Err(e) => println!("Error: {e}"),
                },
                Err(e) => println!("Error: {e}"),
            }
            continue;
        }

        println!("\nProcessing your query...");
        match orchestrator.process_request(query).await {
            Ok(answer) => println!("\n{answer}"),
            Err(e @ OrchestratorError::Cancelled) => println!("\n{e}"),
            Err(e) => {
                // Infrastructure failure: this request is dead, the session
                // and history survive for a retry
                tracing::error!("Request failed: {}", e);
                println!("\nError: {e}");
            }
        }
    }

    println!("\nClient shutdown complete.");
    Ok(())
}

/// Print the connected server's catalog
async fn discover(
    config: Config,
    server_command: Option<String>,
    server_args: Vec<String>,
) -> Result<()> {
    let (command, cmd_args) = server_command_line(&config, server_command, server_args);

    let transport = StdioTransport::spawn(&command, &cmd_args)
        .await
        .with_context(|| format!("Failed to spawn MCP server '{command}'"))?;

    let mut session = McpSession::new(transport)
        .with_call_timeout(Duration::from_secs(config.server.call_timeout_secs));
    session.initialize().await?;
    let catalog = session.discover().await?;

    println!("Tools ({}):", catalog.tools.len());
    for tool in &catalog.tools {
        println!("  {} - {}", tool.name, tool.description);
    }
    println!("Resources ({}):", catalog.resources.len());
    for resource in &catalog.resources {
        println!("  {} [{}] - {}", resource.uri, resource.mime_type, resource.description);
    }

    Ok(())
}
