mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use mr_av::ToolRegistry;
use mr_core::config::Config;

fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env();
    config
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path);

    // CLI flags win over PORT and the config file.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        capacity = config.jobs.capacity,
        transcoder = %config.tools.transcoder,
        "Starting mediarelay"
    );

    mr_server::start(config)
        .await
        .context("mediarelay stopped with a fatal error")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediarelay=trace,mr_server=trace,mr_jobs=trace,mr_av=trace,mr_core=debug,tower_http=debug"
                .to_string()
        } else {
            "mediarelay=info,mr_server=debug,mr_jobs=debug,mr_av=info,mr_core=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    // An `Err` here exits with status 1.
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command.unwrap_or(Commands::Start {
        host: None,
        port: None,
    }) {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
            rt.block_on(start_server(host, port, config_path.as_deref()))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
            rt.block_on(check_tools(config_path.as_deref()))
        }
        Commands::Validate { config } => validate_config(config.or(config_path).as_deref()),
        Commands::Version => {
            println!("mediarelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all().await {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if !all_ok {
        anyhow::bail!("{} is not usable; the server would report unhealthy", config.tools.transcoder);
    }
    println!("All required tools are available!");
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            Config::load(p).with_context(|| format!("failed to load {}", p.display()))?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    config.check().context("configuration is invalid")?;

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Transcoder: {}", config.tools.transcoder);
    println!(
        "  Slots: {} (+{} queued)",
        config.jobs.capacity, config.jobs.max_queue
    );
    println!(
        "  Timeout: {}s default, {}s max",
        config.jobs.default_timeout_secs, config.jobs.max_timeout_secs
    );

    for warning in config.validate() {
        println!("  ⚠ {warning}");
    }

    Ok(())
}
