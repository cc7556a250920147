//! Delve CLI: terminal host for the Delve research engine.
//!
//! Runs a research session on a topic and prints the final report.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delve: iterative web research with an LLM in the loop
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a topic and print the final report
    Research(ResearchArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ResearchArgs {
    /// Topic to research
    topic: String,

    /// Main-loop iterations
    #[arg(long, allow_negative_numbers = true)]
    loops: Option<i32>,

    /// Maximum results requested per search
    #[arg(long)]
    max_sources: Option<usize>,

    /// Raw content budget per source, in characters
    #[arg(long)]
    max_chars: Option<usize>,

    /// Retries allowed when a search returns nothing
    #[arg(long)]
    retries: Option<u32>,

    /// Consolidate every gathered summary into the final report
    #[arg(long)]
    consolidate: bool,

    /// Completion model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Print the result as JSON instead of markdown
    #[arg(long)]
    json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,delve_core=info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.quiet).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_research_flags() {
        let cli = Cli::parse_from([
            "delve",
            "-vv",
            "research",
            "fusion power",
            "--loops",
            "-1",
            "--max-sources",
            "8",
            "--consolidate",
            "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Research(args) => {
                assert_eq!(args.topic, "fusion power");
                assert_eq!(args.loops, Some(-1));
                assert_eq!(args.max_sources, Some(8));
                assert_eq!(args.max_chars, None);
                assert!(args.consolidate);
                assert!(args.json);
            }
            other => panic!("Expected research command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::parse_from(["delve", "--quiet", "config", "show"]);
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
