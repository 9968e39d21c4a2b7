//! msbuild-bridge: MCP server that runs MSBuild targets for an IDE
//!
//! Builds are executed by the `dotnet msbuild` command line, one at a time,
//! from a single dedicated build thread.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use msbuild_bridge::build::{BuildEngine, DotnetEngine};
use msbuild_bridge::config;
use msbuild_bridge::mcp::{McpServer, ToolOptions};

/// MCP server that runs MSBuild targets on behalf of an IDE.
///
/// Keeps projects loaded between requests, builds unsaved editor content,
/// and reports errors and warnings as structured results.
#[derive(Parser, Debug)]
#[command(name = "msbuild-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments, then the config file.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => config_level.trim().parse().unwrap_or(Level::WARN),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

/// The GPLv3 section 5d notice shown on startup.
fn license_notice() -> String {
    format!(
        "msbuild-bridge {}  Copyright (C) 2026  The Embedded Society\n\
         This program comes with ABSOLUTELY NO WARRANTY.\n\
         This is free software, licensed under GPL-3.0-or-later.\n\
         Source: {}\n",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY"),
    )
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(get_log_level(args.verbose, args.quiet, &cfg.logging.level));

    eprintln!("{}", license_notice());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        program = %cfg.engine.program,
        arguments = ?cfg.engine.arguments,
        "Starting msbuild-bridge"
    );
    if cfg.allowed_paths.is_empty() {
        info!("No allowed paths configured, any absolute project path is accepted");
    } else {
        info!(allowed_paths = ?cfg.allowed_paths, "Allowed paths configured");
    }

    let engine = match BuildEngine::start(DotnetEngine::new(
        cfg.engine.program,
        cfg.engine.arguments,
    )) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Failed to start build thread");
            return ExitCode::FAILURE;
        }
    };

    let options = ToolOptions {
        allowed_paths: cfg.allowed_paths,
        default_verbosity: cfg.build.default_verbosity,
    };
    let mut server = McpServer::new(engine, options);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!("MCP server ready, waiting for client connection...");
    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
