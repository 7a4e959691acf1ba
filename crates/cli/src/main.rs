mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reflex_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { rules_dir, host, port } => {
            commands::serve::run(rules_dir, host, port).await
        }
        Command::Validate { path } => commands::validate::run(&path),
        Command::Template { file, params } => commands::template::run(&file, &params),
    }
}
