//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::authz::ToolTier;
use crate::oauth::pkce::MIN_VERIFIER_LEN;

/// RouterOS MCP auth diagnostics - validate tokens, build login URLs, check tool authorization
#[derive(Parser, Debug)]
#[command(name = "routeros-mcp-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ROUTEROS_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "ROUTEROS_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ROUTEROS_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a PKCE verifier and challenge
    Pkce {
        /// Verifier length (43-128)
        #[arg(short, long, default_value_t = MIN_VERIFIER_LEN)]
        length: usize,
    },

    /// Build an authorization URL for the configured provider
    LoginUrl {
        /// Redirect URI (defaults to `oidc.redirect_uri`)
        #[arg(long)]
        redirect_uri: Option<String>,

        /// Explicit state value (random if omitted)
        #[arg(long)]
        state: Option<String>,

        /// Requested scope (defaults to `oidc.scopes`)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Validate a bearer token and print the normalized user
    Validate {
        /// Raw bearer token
        #[arg(required = true)]
        token: String,
    },

    /// Validate a token and check a tool against one or more devices
    Authorize {
        /// Raw bearer token
        #[arg(long, env = "ROUTEROS_MCP_TOKEN", hide_env_values = true)]
        token: String,

        /// Tool name
        #[arg(long)]
        tool: String,

        /// Tool tier
        #[arg(long, value_enum)]
        tier: ToolTier,

        /// YAML file with the device list
        #[arg(long)]
        devices: PathBuf,

        /// Device ids to check
        #[arg(required = true)]
        device_ids: Vec<String>,
    },
}
