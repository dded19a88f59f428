//! CLI entry point for PromptBench.
//!
//! This binary provides the `promptbench` command with subcommands for
//! serving the HTTP API, running a single conversation from the terminal,
//! and listing the built-in tools.

mod cli;
mod helpers;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use promptbench_agent::{
    AppConfig, ConversationRequest, GatewayError, OpenRouterClient, Orchestrator, StreamEvent,
};
use promptbench_web::{AppState, WebServer};

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("warning: failed to load .env: {e}");
    }

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.json_logs {
        config.logging.json = true;
    }
    helpers::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind, port } => cmd_serve(config, bind, port).await,
        Commands::Chat {
            model,
            system,
            tools_builtin,
            tool_choice,
            max_iterations,
            prompt,
        } => {
            let mut request = ConversationRequest::new(model, prompt);
            if let Some(system) = system {
                request = request.with_system(system);
            }
            if tools_builtin {
                request = request.with_tools(promptbench_tools::builtin_registry(&config).schemas());
            }
            if let Some(choice) = tool_choice {
                request = request.with_tool_choice(choice);
            }
            if let Some(max) = max_iterations {
                request = request.with_max_iterations(max);
            }
            cmd_chat(config, request).await
        }
        Commands::Tools => cmd_tools(&config),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: AppConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::from_config(config).context("failed to initialise server state")?;
    let server = WebServer::new(state);
    println!("  PromptBench listening on http://{}", server.addr());

    server.start().await.context("web server failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(config: AppConfig, request: ConversationRequest) -> Result<()> {
    let mut stdout = std::io::stdout();

    let client = match OpenRouterClient::new(config.gateway.clone()) {
        Ok(client) => client,
        Err(GatewayError::MissingApiKey) => {
            for event in [StreamEvent::missing_api_key(), StreamEvent::done()] {
                write!(stdout, "{}", event.to_frame())?;
            }
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to create gateway client"),
    };

    let registry = Arc::new(promptbench_tools::builtin_registry(&config));
    let orchestrator = Orchestrator::new(
        Arc::new(client),
        registry,
        Arc::new(config.guardrail_policy()),
        config.orchestrator.clone(),
    );

    info!(model = %request.model, tools = request.tools.len(), "running conversation");
    let mut events = orchestrator.start(request);
    while let Some(event) = events.recv().await {
        write!(stdout, "{}", event.to_frame())?;
        stdout.flush()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools(config: &AppConfig) -> Result<()> {
    let registry = promptbench_tools::builtin_registry(config);
    let schemas: Vec<_> = registry.schemas().iter().map(|s| s.as_value().clone()).collect();
    let json = serde_json::to_string_pretty(&schemas).context("failed to serialize schemas")?;
    println!("{json}");
    Ok(())
}
