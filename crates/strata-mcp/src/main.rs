//! Strata MCP server binary.
//!
//! Serves an in-memory document store over stdio.
//!
//! Usage:
//!   cargo run -p strata-mcp
//!   cargo run -p strata-mcp -- --config strata.rhai --copy-step-delay-ms 200
//!
//! Test with MCP inspector:
//!   npx @modelcontextprotocol/inspector cargo run -p strata-mcp

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::{EnvFilter, fmt};

use strata_kernel::{Kernel, StrataConfig, load_config_file};
use strata_mcp::StrataMcp;

/// MCP server for the strata document store.
#[derive(Parser, Debug)]
#[command(name = "strata-mcp")]
#[command(about = "MCP server for an in-memory hierarchical document store")]
struct Args {
    /// Rhai config script
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address scheme, e.g. `mem` for mem://docs/readme.md
    #[arg(long)]
    scheme: Option<String>,

    /// Seconds to wait for a confirmation answer
    #[arg(long)]
    confirm_timeout_secs: Option<u64>,

    /// Default progress steps for copy-with-progress
    #[arg(long)]
    copy_steps: Option<u32>,

    /// Default pause between copy steps, in milliseconds
    #[arg(long)]
    copy_step_delay_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<StrataConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => StrataConfig::default(),
        };
        if let Some(scheme) = self.scheme {
            config.scheme = scheme;
        }
        if let Some(secs) = self.confirm_timeout_secs {
            config.confirmation_timeout_secs = secs;
        }
        if let Some(steps) = self.copy_steps {
            config.copy_steps = steps;
        }
        if let Some(ms) = self.copy_step_delay_ms {
            config.copy_step_delay_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing goes to stderr; stdout carries the protocol.
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(
        scheme = %config.scheme,
        seeded = config.seed.len(),
        "starting with in-memory store"
    );
    let kernel = Kernel::new(config)?;

    let service = StrataMcp::new(kernel)
        .serve(stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("MCP server error: {:?}", e);
        })?;

    tracing::info!("strata-mcp server ready");

    service.waiting().await?;

    tracing::info!("strata-mcp server shutting down");
    Ok(())
}
