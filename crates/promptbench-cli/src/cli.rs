//! CLI argument definitions for PromptBench.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PromptBench -- streaming tool-calling playground for hosted LLMs.
#[derive(Debug, Parser)]
#[command(
    name = "promptbench",
    version,
    about = "PromptBench -- streaming tool-calling playground for hosted LLMs",
    long_about = "Runs multi-turn tool-calling conversations against an OpenAI-compatible \
                  model gateway and streams every step as server-sent events."
)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./promptbench.toml if present).
    #[arg(long, global = true, env = "PROMPTBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run one conversation and print each event frame to stdout.
    Chat {
        /// Model identifier, e.g. `openai/gpt-4o`.
        #[arg(long, short)]
        model: String,

        /// System prompt.
        #[arg(long, short)]
        system: Option<String>,

        /// Declare the built-in tools to the model.
        #[arg(long)]
        tools_builtin: bool,

        /// `auto`, `none`, `required`, or a tool name.
        #[arg(long)]
        tool_choice: Option<String>,

        /// Override the iteration cap.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
        max_iterations: Option<u32>,

        /// The user prompt.
        prompt: String,
    },

    /// Print the built-in tool schemas as JSON.
    Tools,
}
