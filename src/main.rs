//! Authorization gateway - bearer token verification, scope policy, and
//! machine-to-machine client provisioning.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use auth_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate the configuration and print a summary
fn run_check(cli: &Cli) -> ExitCode {
    match load_config(cli) {
        Ok(config) => {
            println!("✅ Configuration valid");
            println!("   Issuer:     {}", config.auth.issuer);
            println!("   Audience:   {}", config.auth.audience);
            println!("   JWKS:       {}", config.auth.jwks_endpoint());
            println!("   Management: {}", config.management.base_url);
            println!(
                "   Listen:     {}:{}",
                config.server.host, config.server.port
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting auth gateway"
    );

    if let Err(e) = Gateway::new(config).run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> auth_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}
