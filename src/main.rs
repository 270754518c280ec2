//! RouterOS MCP auth - operator diagnostics for the identity and access-control core.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error};

use routeros_mcp_auth::{
    Error, Result,
    authz::{AuthorizationEngine, Device, InMemoryDeviceRegistry, ToolTier},
    cli::{Cli, Command},
    config::Config,
    identity::TokenValidator,
    oauth::{AuthorizationRequest, PkceParams},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Pkce { length } => run_pkce(length),
        Command::LoginUrl {
            redirect_uri,
            state,
            scope,
        } => run_login_url(cli.config.as_deref(), redirect_uri, state, scope),
        Command::Validate { token } => run_validate(cli.config.as_deref(), &token).await,
        Command::Authorize {
            token,
            tool,
            tier,
            devices,
            device_ids,
        } => {
            run_authorize(
                cli.config.as_deref(),
                &token,
                &tool,
                tier,
                &devices,
                &device_ids,
            )
            .await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path)?;
    config.validate()?;
    debug!(environment = %config.environment, issuer = %config.oidc.provider_url, "Configuration loaded");
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_pkce(length: usize) -> Result<ExitCode> {
    print_json(&PkceParams::generate(length)?)?;
    Ok(ExitCode::SUCCESS)
}

fn run_login_url(
    config_path: Option<&Path>,
    redirect_uri: Option<String>,
    state: Option<String>,
    scope: Option<String>,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let oidc = &config.oidc;

    let redirect_uri = redirect_uri
        .or_else(|| oidc.redirect_uri.clone())
        .ok_or_else(|| {
            Error::InvalidInput("--redirect-uri or oidc.redirect_uri is required".to_string())
        })?;

    let mut request = AuthorizationRequest::new(&oidc.provider_url, &oidc.client_id, redirect_uri)
        .scope(scope.unwrap_or_else(|| oidc.scope()));
    if let Some(state) = state {
        request = request.state(state);
    }

    print_json(&request.build()?)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_validate(config_path: Option<&Path>, token: &str) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let validator = TokenValidator::new(&config.oidc, config.environment)?;

    match validator.validate(token).await {
        Ok(user) => {
            print_json(&user)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("❌ {} (HTTP {}): {e}", e.public_message(), e.status_code());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_authorize(
    config_path: Option<&Path>,
    token: &str,
    tool: &str,
    tier: ToolTier,
    devices_file: &Path,
    device_ids: &[String],
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let validator = TokenValidator::new(&config.oidc, config.environment)?;

    let user = match validator.validate(token).await {
        Ok(user) => user,
        Err(e) => {
            eprintln!("❌ {} (HTTP {}): {e}", e.public_message(), e.status_code());
            return Ok(ExitCode::FAILURE);
        }
    };

    let devices: Vec<Device> = serde_yaml::from_str(&tokio::fs::read_to_string(devices_file).await?)
        .map_err(|e| {
            Error::Config(format!(
                "Failed to parse device list {}: {e}",
                devices_file.display()
            ))
        })?;
    let registry: InMemoryDeviceRegistry = devices.into_iter().collect();

    let engine = AuthorizationEngine::new(config.environment);
    let results = engine
        .authorize_batch(&registry, &user, tool, tier, device_ids)
        .await;

    print_json(&results)?;

    if results.values().all(Option::is_none) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
