//! CLI entry point for sigbridge

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use sigbridge_agent::{Outcome, SessionRouter};
use sigbridge_channels::ChannelManager;
use sigbridge_core::bus::MessageBus;
use sigbridge_core::config::{validate_for_gateway, Config, ConfigLoader, LoggingConfig};
use sigbridge_core::logging::{init_logging, WorkerGuard};
use sigbridge_core::utils::expand_tilde;
use sigbridge_providers::{CompletionGateway, PrivateModeClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sigbridge")]
#[command(about = "Signal assistant bridge for a PrivateMode completion service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
    /// Run the Signal gateway until Ctrl+C
    Gateway,
    /// Route one message through the router and print the reply
    Chat {
        /// Message text, commands included (e.g. "!models")
        #[arg(short, long)]
        message: String,
        /// Sender id the conversation history is kept under
        #[arg(short, long, default_value = "cli")]
        sender: String,
    },
    /// List the models offered by the completion service
    Models,
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let loader = match cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };

    match cli.command {
        Commands::Init { force } => run_init(&loader, force),
        Commands::Gateway => {
            let (config, _guard) = setup(&loader)?;
            info!("Starting gateway");
            run_gateway(config).await
        }
        Commands::Chat { message, sender } => {
            let (config, _guard) = setup(&loader)?;
            run_chat(&config, &sender, &message).await
        }
        Commands::Models => {
            let (config, _guard) = setup(&loader)?;
            run_models(&config).await
        }
        Commands::Status => {
            let (config, _guard) = setup(&loader)?;
            run_status(&loader, &config)
        }
    }
}

/// Load configuration and start logging
fn setup(loader: &ConfigLoader) -> Result<(Config, WorkerGuard)> {
    let config = loader.load().with_context(|| {
        format!(
            "Failed to load configuration from {}",
            loader.config_path().display()
        )
    })?;
    let guard = init_logging(&resolve_logging(loader, &config.logging));
    Ok((config, guard))
}

/// Relative log directories live under the config directory
fn resolve_logging(loader: &ConfigLoader, logging: &LoggingConfig) -> LoggingConfig {
    let mut resolved = logging.clone();
    let dir = expand_tilde(&logging.dir);
    let dir = if dir.is_relative() {
        loader.config_dir().join(dir)
    } else {
        dir
    };
    resolved.dir = dir.to_string_lossy().into_owned();
    resolved
}

fn build_gateway(config: &Config) -> Arc<dyn CompletionGateway> {
    Arc::new(PrivateModeClient::from_config(&config.privatemode))
}

fn run_init(loader: &ConfigLoader, force: bool) -> Result<()> {
    let config_path = loader.config_path();
    if config_path.exists() && !force {
        println!(
            "Configuration already exists at {} (use --force to overwrite).",
            config_path.display()
        );
        return Ok(());
    }

    loader.save(&Config::default())?;

    println!(
        "{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nSet signal.phone_number (or SIGNAL_PHONE_NUMBER), then run:");
    println!("  {} - Start the gateway", style("sigbridge gateway").cyan());
    println!(
        "  {} - Send a test message",
        style("sigbridge chat --message 'Hello!'").cyan()
    );

    Ok(())
}

async fn run_gateway(config: Config) -> Result<()> {
    validate_for_gateway(&config)?;

    println!("{}", style("Starting sigbridge gateway...").bold().cyan());
    println!("Signal service: {}", config.signal.service);
    println!("Account: {}", config.signal.phone_number);
    println!("Completion service: {}", config.privatemode.api_base);
    println!(
        "Model: {}",
        config
            .privatemode
            .model
            .as_deref()
            .unwrap_or("first available")
    );

    let bus = MessageBus::new();
    let router = Arc::new(SessionRouter::from_config(&config, build_gateway(&config)));

    let channel_manager = ChannelManager::new(config.clone());
    channel_manager.initialize().await?;
    channel_manager.attach(&bus).await;

    let bus_for_outbound_dispatch = bus.clone();
    let outbound_dispatch_handle = tokio::spawn(async move {
        bus_for_outbound_dispatch.dispatch_outbound_loop().await;
    });

    channel_manager.start_all().await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router_handle = tokio::spawn(Arc::clone(&router).run(bus.clone(), async move {
        let _ = shutdown_rx.await;
    }));

    println!(
        "\n{}",
        style("Gateway is running. Press Ctrl+C to stop.").green()
    );

    tokio::signal::ctrl_c().await?;
    println!("\n{}", style("Shutting down...").yellow());

    if let Err(e) = channel_manager.stop_all().await {
        error!("Failed to stop channels: {}", e);
    }

    let _ = shutdown_tx.send(());
    match router_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Session router error: {}", e),
        Err(e) => error!("Session router task failed: {}", e),
    }

    bus.stop().await;
    let _ = outbound_dispatch_handle.await;

    println!("{}", style("Gateway stopped.").green());
    Ok(())
}

async fn run_chat(config: &Config, sender: &str, message: &str) -> Result<()> {
    let router = SessionRouter::from_config(config, build_gateway(config));
    let reply = router.on_message(sender, message).await;

    println!("{}", reply.text);
    if let Outcome::Failed(kind) = reply.outcome {
        eprintln!("{}", style(format!("completion failed: {}", kind)).red());
    }

    Ok(())
}

async fn run_models(config: &Config) -> Result<()> {
    let models = build_gateway(config)
        .list_models()
        .await
        .context("Failed to list models")?;

    if models.is_empty() {
        println!("{}", config.replies.models_unavailable);
        return Ok(());
    }

    println!("{}", style(&config.replies.models_header).bold());
    for model in models {
        println!("  • {}", model);
    }

    Ok(())
}

fn run_status(loader: &ConfigLoader, config: &Config) -> Result<()> {
    println!("{}", style("sigbridge Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    let configured = |set: bool| {
        if set {
            style("configured").green()
        } else {
            style("not configured").red()
        }
    };

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    println!(
        "  Config file: {}",
        if loader.config_path().exists() {
            style("present").green()
        } else {
            style("missing (defaults in use)").yellow()
        }
    );
    println!();

    println!("{}", style("Signal:").bold());
    println!("  Service: {}", config.signal.service);
    println!(
        "  Account: {}",
        configured(!config.signal.phone_number.is_empty())
    );
    if config.signal.allow_from.is_empty() {
        println!("  Allowed senders: everyone");
    } else {
        println!("  Allowed senders: {}", config.signal.allow_from.len());
    }
    println!();

    println!("{}", style("Completion service:").bold());
    println!("  API base: {}", config.privatemode.api_base);
    println!(
        "  Model: {}",
        config
            .privatemode
            .model
            .as_deref()
            .unwrap_or("first available")
    );
    println!(
        "  API key: {}",
        configured(!config.privatemode.api_key.is_empty())
    );
    println!("  Timeout: {}s", config.privatemode.timeout_secs);
    println!();

    println!("{}", style("Session:").bold());
    println!(
        "  History bound: {} messages",
        config.session.max_history_messages
    );
    println!(
        "  Logging: {} ({})",
        config.logging.level, config.logging.format
    );

    Ok(())
}
