mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Routes natural-language queries across a registry of worker agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.switchboard/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (long-running daemon)
    Serve {
        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a single query and exit
    Query {
        /// Query text
        text: String,

        /// User id attached to the request context
        #[arg(short, long)]
        user: Option<String>,

        /// Include per-step results
        #[arg(short, long)]
        debug: bool,

        /// Print the raw response JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect registered agents
    Agents {
        #[command(subcommand)]
        command: AgentsCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum AgentsCommands {
    /// List registered agents
    List,
    /// Check every agent's healthcheck
    Check,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (API keys masked)
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let (plain, json) = if cli.json_logs {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();

    let config_path = commands::config_path(cli.config);

    match cli.command {
        Commands::Serve { host, port } => {
            let config = commands::load_config(&config_path)?;
            commands::serve::run(config, host, port).await?;
        }
        Commands::Query { text, user, debug, json } => {
            let config = commands::load_config(&config_path)?;
            commands::query::run(&config, &text, user, debug, json).await?;
        }
        Commands::Agents { command } => {
            let config = commands::load_config(&config_path)?;
            match command {
                AgentsCommands::List => commands::agents::list(&config)?,
                AgentsCommands::Check => commands::agents::check(&config).await?,
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(&config_path)?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(&config_path, force)?;
            }
        },
    }

    Ok(())
}
