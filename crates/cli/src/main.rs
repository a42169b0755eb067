//! codeloop CLI, the main entry point.
//!
//! Commands:
//! - `chat`    Interactive chat or single-message mode (the default)
//! - `config`  Show the resolved configuration

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "codeloop",
    about = "codeloop: a chat assistant that writes and runs code on your machine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat(ChatArgs),

    /// Print the resolved configuration
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,

        /// Print the config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Args, Clone, Default)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// Override the configured model
    #[arg(long)]
    pub model: Option<String>,

    /// Run code without asking for confirmation
    #[arg(short = 'y', long)]
    pub auto_run: bool,

    /// Do not nudge the model to keep going until the task is done
    #[arg(long)]
    pub no_loop: bool,

    /// Stop calling the model once the session has cost this many USD
    #[arg(long, value_name = "USD")]
    pub max_budget: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with streamed replies
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Some(Commands::Chat(args)) => commands::chat::run(args, cli.verbose).await?,
        Some(Commands::Config { default, path }) => {
            if path {
                commands::config_cmd::path()?
            } else if default {
                commands::config_cmd::defaults()?
            } else {
                commands::config_cmd::show()?
            }
        }
        None => commands::chat::run(cli.chat, cli.verbose).await?,
    }

    Ok(())
}
