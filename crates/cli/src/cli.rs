use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reflex", about = "Reactive rule engine", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine with the HTTP API.
    Serve {
        /// Directory of rule files loaded and hot-reloaded at runtime.
        #[arg(long, env = "REFLEX_RULES_DIR")]
        rules_dir: Option<PathBuf>,
        /// HTTP listen host.
        #[arg(long, env = "REFLEX_HOST")]
        host: Option<String>,
        /// HTTP listen port.
        #[arg(long, env = "REFLEX_PORT")]
        port: Option<u16>,
    },
    /// Validate rule files without starting the engine.
    Validate {
        /// A rule file or a directory of rule files.
        path: PathBuf,
    },
    /// Instantiate a rule template and print the resulting rule as JSON.
    Template {
        /// Template document (`{ template: {...} }`).
        file: PathBuf,
        /// Parameter values as a JSON object, e.g. '{"topic":"order.created"}'.
        #[arg(long, default_value = "{}")]
        params: String,
    },
}
