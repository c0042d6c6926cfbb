//! # opskills-cli
//!
//! Command-line interface for OpsSkills.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opskills_core::Config;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
}

/// OpsSkills - run operations skills locally or through MCP servers
#[derive(Parser)]
#[command(name = "opskills")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (replaces the user and project files)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skills directory (overrides general.skills_dir)
    #[arg(long, global = true, value_name = "DIR")]
    skills_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a skill
    Run {
        /// Skill name
        skill: String,
        /// Parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        param: Vec<String>,
        /// Parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Skill management
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },
    /// Serve skills as an MCP server on stdin/stdout
    Serve {
        /// Only serve these skills (repeatable)
        #[arg(long = "skill", value_name = "NAME")]
        skills: Vec<String>,
    },
    /// External MCP server inspection
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SkillsAction {
    /// List available skills
    List,
}

#[derive(Subcommand)]
enum McpAction {
    /// List configured MCP servers
    List,
    /// List the tools a server offers
    Tools {
        /// Server name
        server: String,
    },
    /// List the resources a server offers
    Resources {
        /// Server name
        server: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the configuration
    Validate,
}

fn init_logging(verbose: bool) {
    // stdout carries protocol traffic in serve mode; logs go to stderr.
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>, skills_dir: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(dir) = skills_dir {
        config.general.skills_dir = dir;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Version = cli.command {
        println!("opskills {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_ref(), cli.skills_dir)?;
    let ctx = AppContext { config };

    let code = match cli.command {
        Commands::Run {
            skill,
            param,
            params,
            json,
        } => commands::run::run(&ctx, &skill, &param, params.as_deref(), json).await?,
        Commands::Skills { action } => {
            commands::skills::handle(action, &ctx)?;
            ExitCode::SUCCESS
        }
        Commands::Serve { skills } => {
            commands::serve::run(&ctx, &skills).await?;
            ExitCode::SUCCESS
        }
        Commands::Mcp { action } => {
            commands::mcp::handle(action, &ctx).await?;
            ExitCode::SUCCESS
        }
        Commands::Config { action } => commands::config::handle(action, &ctx)?,
        Commands::Version => ExitCode::SUCCESS,
    };

    Ok(code)
}
