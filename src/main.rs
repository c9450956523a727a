use std::path::Path;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gameserver_proxy::{
    HttpHandler,
    config::{ProxyConfig, ProxyConfigValidator, load_config},
    core::route::RouteScheme,
    metrics, tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file; environment variables prefixed with GAMESERVER_PROXY__ override it
    #[clap(short, long)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration
    Validate {
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Write a starter configuration file
    Init {
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the proxy (default)
    Serve {
        #[clap(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(config.as_deref()).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(config.or(args.config).as_deref()).await,
        None => serve(args.config.as_deref()).await,
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = load_validated_config(config_path).await?;

    tracing_setup::init_tracing_with_config(
        &config.logging.level,
        config.logging.json,
        config.logging.include_spans,
    )
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics()?;

    tracing::info!(config = ?config_path, "Configuration loaded");

    let handler = HttpHandler::from_config(&config)
        .await
        .context("Failed to build proxy pipeline")?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    let local_addr = listener.local_addr().context("Failed to read listen address")?;
    tracing::info!(%local_addr, scheme = %config.route_scheme, "Game server proxy listening");

    let shutdown = GracefulShutdown::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "Signal handler failed");
            }
        })
    };

    axum::serve(listener, handler.router())
        .with_graceful_shutdown(async move {
            let reason = shutdown.wait().await;
            tracing::info!(?reason, "Draining in-flight requests");
        })
        .await
        .context("Server error")?;

    signal_task.abort();
    tracing::info!("Game server proxy stopped");
    Ok(())
}

async fn load_validated_config(config_path: Option<&str>) -> Result<ProxyConfig> {
    if let Some(path) = config_path.filter(|path| !Path::new(path).exists()) {
        return Err(eyre!("Configuration file '{path}' not found"));
    }

    let config = load_config(config_path).await?;
    ProxyConfigValidator::validate(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Validate configuration and print a summary
async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    println!(
        "Validating configuration: {}",
        config_path.unwrap_or("<environment only>")
    );

    match load_validated_config(config_path).await {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen address:   {}", config.listen_addr);
            println!("  route scheme:     {}", config.route_scheme);
            match config.route_scheme {
                RouteScheme::BuildSessionRegion => {
                    println!("  directory:        {}", config.directory.api_base_url());
                    println!("  port selection:   {}", config.endpoint.port_selection);
                }
                RouteScheme::MatchId => {
                    println!("  match entries:    {}", config.match_servers.len());
                }
            }
            println!(
                "  activity timeout: {}s",
                config.forwarding.activity_timeout_secs
            );
            println!("  cors:             {}", config.cors.enabled);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration is invalid:");
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Game server proxy configuration

listen_addr = "0.0.0.0:8080"

# build_session_region: /{buildId}/{sessionId}/{region}/{rest}
# match_id:             /{matchId}/{rest}
route_scheme = "build_session_region"

[forwarding]
activity_timeout_secs = 5
connect_timeout_secs = 5

[endpoint]
scheme = "http"
# Pick the port by name instead of taking the first one listed:
# port_selection = { policy = "named", name = "game_port" }
port_selection = { policy = "first" }

[directory]
title_id = "YOUR_TITLE_ID"
# Prefer GAMESERVER_PROXY__DIRECTORY__SECRET_KEY in the environment
secret_key = ""
request_timeout_secs = 10
token_refresh_margin_secs = 300

# Used when route_scheme = "match_id"
[match_servers]
# "m-42" = "http://10.0.0.5:30201"

[cors]
enabled = true

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("Run 'gameserver-proxy serve --config {config_path}' to start the proxy");
    Ok(())
}
