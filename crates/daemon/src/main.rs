//! TermBridge Daemon
//!
//! Shares interactive command sessions with WebSocket clients.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::{SessionRegistry, ShellEngine, TermServer};
use tokio_util::sync::CancellationToken;

/// TermBridge Daemon - shares interactive command sessions over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "termbridge-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the server and run until Ctrl-C
    Start {
        /// Address to bind, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Port to bind, overriding the configuration
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    let command = cli.command.unwrap_or(Commands::Start {
        bind: None,
        port: None,
    });

    if let Commands::Start { bind, port } = &command {
        if let Some(bind) = bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &cli.config {
        tracing::info!("Using config file: {:?}", path);
    }

    // Validate configuration
    config.validate()?;

    match command {
        Commands::Start { .. } => run_server(config).await?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

/// Runs the server until Ctrl-C.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let engine = Arc::new(ShellEngine::new(config.session.shell.clone()));
    let registry = Arc::new(SessionRegistry::new(engine, config.session.settings()));

    let server = TermServer::bind(&config, registry).await?;
    let addr = server.local_addr()?;
    tracing::info!(
        addr = %addr,
        shell = %config.session.shell,
        "TermBridge daemon listening"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        signal_token.cancel();
    });

    server.run(shutdown).await.context("Server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_defaults_to_start() {
        let cli = Cli::try_parse_from(["termbridge-daemon"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_start_with_overrides() {
        let cli = Cli::try_parse_from([
            "termbridge-daemon",
            "start",
            "--bind",
            "0.0.0.0",
            "--port",
            "9000",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Start {
                bind: Some("0.0.0.0".to_string()),
                port: Some(9000),
            })
        );
    }

    #[test]
    fn test_config_command_with_global_flags() {
        let cli = Cli::try_parse_from([
            "termbridge-daemon",
            "config",
            "--config",
            "/etc/termbridge.toml",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/termbridge.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["termbridge-daemon", "start", "--port", "70000"]).is_err());
    }
}
