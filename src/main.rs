use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finchat::api::{self, AppState};
use finchat::config::{Config, config};
use finchat::logging;
use finchat::mcp::{McpCoordinator, McpManager, Tool, market_tools};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "finchat")]
#[command(version)]
#[command(about = "MCP bridge for the finance chat assistant")]
struct Args {
    /// Write debug lines to the log file
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Start the MCP server and list its tools and the agent's market tools
    Tools,

    /// Run one tool call and print its result
    Call {
        /// Tool name as advertised by the server
        tool: String,
        /// JSON arguments
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Start the MCP server and print the status snapshot
    Status,
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Serve { .. } => "serve",
            Command::Tools => "tools",
            Command::Call { .. } => "call",
            Command::Status => "status",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();
    logging::cleanup_old_logs();
    if args.trace {
        logging::set_trace(true);
    }
    logging::set_context(args.command.label());
    logging::info("finchat starting");

    if let Err(e) = run_main(args).await {
        logging::error(&format!("{:?}", e));
        return Err(e);
    }
    Ok(())
}

fn coordinator(config: &Config) -> Arc<McpCoordinator<McpManager>> {
    let mcp = config.mcp.clone();
    Arc::new(McpCoordinator::new(move || McpManager::new(mcp.clone())))
}

async fn run_main(args: Args) -> Result<()> {
    let config = config();
    let coordinator = coordinator(config);

    match args.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address '{}'", bind))?;
            eprintln!("finchat listening on http://{}", addr);
            api::serve(addr, AppState::new(coordinator)).await?;
        }
        Command::Tools => {
            let manager = coordinator.get_or_create().await?;
            for tool in manager.tools() {
                match tool.description {
                    Some(description) => println!("{}: {}", tool.name, description),
                    None => println!("{}", tool.name),
                }
            }
            println!();
            println!("Agent tools:");
            for tool in market_tools(&coordinator) {
                println!("{}: {}", tool.name(), tool.description());
            }
            coordinator.reset().await;
        }
        Command::Call { tool, params } => {
            let params: Value = serde_json::from_str(&params)
                .with_context(|| format!("params for '{}' are not valid JSON", tool))?;
            let manager = coordinator.get_or_create().await?;
            let outcome = manager.call_tool(&tool, params).await;
            coordinator.reset().await;
            let result = outcome.with_context(|| format!("tool '{}' failed", tool))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Status => {
            eprintln!("{}", config.display_string());
            if let Some(path) = logging::log_path() {
                eprintln!("Log file: {}", path.display());
            }
            let manager = coordinator.get_or_create().await?;
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
            coordinator.reset().await;
        }
    }

    Ok(())
}
