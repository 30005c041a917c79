use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check::CheckArgs, serve::ServeArgs, token::TokenCommand};

#[derive(Parser, Debug)]
#[command(name = "sqlgate", version, about = "MCP gateway for stored SQL tools and resources")]
struct Cli {
    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, global = true, env = "SQLGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP gateway over stdio or HTTP.
    Serve(ServeArgs),

    /// Mint and hash MCP credentials.
    Token {
        #[command(subcommand)]
        cmd: TokenCommand,
    },

    /// Inspect the metadata store for records the gateway cannot serve.
    Check(CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries protocol frames; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Token { cmd } => match cmd {
            TokenCommand::Mint(args) => commands::token::mint(args).await,
            TokenCommand::Hash { credential } => {
                commands::token::hash(&credential);
                Ok(())
            }
        },
        Command::Check(args) => commands::check::run(args).await,
    }
}
