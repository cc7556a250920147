//! CLI subcommand handlers.

use crate::render;
use crate::{Commands, ConfigAction, ResearchArgs};
use delve_core::config::DelveConfig;
use delve_core::research::ChannelReporter;
use delve_core::{ResearchEngine, ResearchError, TavilySearchProvider, create_provider};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Research(args) => handle_research(args, workspace, quiet).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

impl ResearchArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut DelveConfig) {
        if let Some(loops) = self.loops {
            config.research.max_research_loops = loops;
        }
        if let Some(max_sources) = self.max_sources {
            config.research.max_source_count_per_search = max_sources;
        }
        if let Some(max_chars) = self.max_chars {
            config.research.max_characters_per_source = max_chars;
        }
        if let Some(retries) = self.retries {
            config.research.max_search_retry_attempts = retries;
        }
        if self.consolidate {
            config.research.enable_summary_consolidation = true;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
    }
}

async fn handle_research(args: ResearchArgs, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    let mut config = delve_core::config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    args.apply(&mut config);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let llm = create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to create completion provider: {}", e))?;
    let search = TavilySearchProvider::new(&config.search)
        .map_err(|e| anyhow::anyhow!("Failed to create search provider: {}", e))?;
    let engine = ResearchEngine::new(llm, Arc::new(search), config.research.clone())
        .with_temperature(config.llm.temperature);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping research...");
                cancel.cancel();
            }
        }
    });

    let (tx, mut rx) = mpsc::channel(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !quiet {
                eprintln!("{}", render::event_line(&event));
            }
        }
    });

    let outcome = engine
        .run(&args.topic, Arc::new(ChannelReporter::new(tx)), cancel)
        .await;
    interrupt.abort();
    let _ = printer.await;

    let result = match outcome {
        Ok(result) => result,
        Err(ResearchError::Cancelled) => anyhow::bail!("Research cancelled"),
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render::report_markdown(&result));
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".delve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = DelveConfig::default().to_toml()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = delve_core::config::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", config.to_toml()?);
            for warning in config.validate() {
                eprintln!("warning: {}", warning);
            }
            Ok(())
        }
    }
}
