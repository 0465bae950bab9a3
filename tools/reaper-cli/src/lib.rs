//! `tamesdk` — command-line client for the enforcement (`reaper-agent`) and
//! control-plane (`reaper-platform`) services. Talks HTTP, nothing more;
//! all policy and audit logic lives behind the services it calls.
//!
//! Split into a library so the argument parsing and exit-code contract can
//! be exercised directly in tests without a live service on the other end
//! of `ReaperClient`.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use reaper_core::client::{ClientConfig, EnforceRequest, ReaperClient};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "tamesdk")]
#[command(about = "Command-line client for the Reaper enforcement and platform services")]
#[command(version = reaper_core::VERSION)]
pub struct Cli {
    /// Base URL of the service to talk to. Defaults to TAME_API_URL or http://localhost:8080.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show service health and the active policy version.
    Status,
    /// Dry-run a tool call against the active policy without logging it.
    Test {
        tool: String,
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        context: Option<String>,
    },
    /// Submit a tool call for enforcement (evaluates, logs, and returns a decision).
    Enforce {
        #[arg(long)]
        tool: String,
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long, env = "TAME_SESSION_ID")]
        session: Option<String>,
        #[arg(long, env = "TAME_AGENT_ID")]
        agent: Option<String>,
        #[arg(long, env = "TAME_USER_ID")]
        user: Option<String>,
    },
    /// Policy lifecycle operations.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Read-eval-print loop: repeatedly prompts for a tool call and prints the decision.
    Interactive,
}

#[derive(Subcommand)]
pub enum PolicyAction {
    /// Show the currently active policy version.
    Current,
    /// Validate a policy document without publishing it.
    Validate {
        #[arg(long)]
        file: String,
    },
    /// Publish a new policy version, optionally activating it immediately.
    Create {
        #[arg(long)]
        file: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        activate: bool,
    },
    /// Reload the active bundle from disk.
    Reload,
}

/// Resolves the base URL and bearer token the same way for every
/// subcommand: an explicit `--api-url` flag wins, then `TAME_API_URL`,
/// then the localhost default. `TAME_API_KEY` is read fresh on every
/// call rather than cached, so a shell export takes effect immediately.
pub fn client_for(cli: &Cli) -> anyhow::Result<ReaperClient> {
    let base_url = cli
        .api_url
        .clone()
        .or_else(|| std::env::var("TAME_API_URL").ok())
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let api_key = std::env::var("TAME_API_KEY").ok();
    Ok(ReaperClient::new(ClientConfig {
        base_url,
        api_key,
        timeout: std::time::Duration::from_secs(10),
    })?)
}

pub fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

/// The exit-code contract every subcommand that returns a decision shares:
/// `allow` exits clean, `deny`/`approve` are distinguishable nonzero codes
/// a calling script can branch on, anything else is an unexpected failure.
pub fn exit_code_for_decision(decision: &str) -> ExitCode {
    match decision {
        "allow" => ExitCode::from(0),
        "deny" => ExitCode::from(2),
        "approve" => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

pub async fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::Status => status(cli).await,
        Commands::Test { tool, args, context } => test(cli, tool, args, context.as_deref()).await,
        Commands::Enforce {
            tool,
            args,
            metadata,
            session,
            agent,
            user,
        } => enforce(cli, tool, args, metadata.as_deref(), session.as_deref(), agent.as_deref(), user.as_deref()).await,
        Commands::Policy { action } => policy(cli, action).await,
        Commands::Interactive => interactive(cli).await,
    }
}

async fn status(cli: &Cli) -> anyhow::Result<ExitCode> {
    let client = client_for(cli)?;
    let health = client.health().await?;
    print_json(&health);

    match client.policy_current().await {
        Ok(policy) => print_json(&policy),
        Err(e) => eprintln!("(policy unavailable: {e})"),
    }

    let dev_mode = health.get("dev_mode").and_then(Value::as_bool).unwrap_or(false);
    if dev_mode {
        println!("development mode: no bearer token configured, all callers are accepted");
    }
    Ok(ExitCode::SUCCESS)
}

async fn test(cli: &Cli, tool: &str, args: &str, context: Option<&str>) -> anyhow::Result<ExitCode> {
    let client = client_for(cli)?;
    let tool_args: Value = serde_json::from_str(args)?;
    let session_context: Value = match context {
        Some(c) => serde_json::from_str(c)?,
        None => serde_json::json!({}),
    };
    let result = client.policy_test(tool, &tool_args, &session_context).await?;
    print_json(&result);
    let decision = result
        .get("decision")
        .and_then(|d| d.get("action"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    Ok(exit_code_for_decision(decision))
}

#[allow(clippy::too_many_arguments)]
async fn enforce(
    cli: &Cli,
    tool: &str,
    args: &str,
    metadata: Option<&str>,
    session: Option<&str>,
    agent: Option<&str>,
    user: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let client = client_for(cli)?;
    let tool_args: Value = serde_json::from_str(args)?;
    let metadata: Option<Value> = metadata.map(serde_json::from_str).transpose()?;

    let request = EnforceRequest {
        tool_name: tool.to_string(),
        tool_args,
        session_id: session.map(str::to_string),
        agent_id: agent.map(str::to_string),
        user_id: user.map(str::to_string),
        metadata,
        context: None,
    };
    let response = client.enforce(&request).await?;
    print_json(&serde_json::to_value(&response)?);
    Ok(exit_code_for_decision(&response.decision))
}

async fn policy(cli: &Cli, action: &PolicyAction) -> anyhow::Result<ExitCode> {
    let client = client_for(cli)?;
    let result = match action {
        PolicyAction::Current => client.policy_current().await?,
        PolicyAction::Validate { file } => {
            let content = std::fs::read_to_string(file)?;
            client.policy_validate(&content).await?
        }
        PolicyAction::Create {
            file,
            version,
            description,
            activate,
        } => {
            let content = std::fs::read_to_string(file)?;
            client
                .policy_create(&content, version, description.as_deref(), *activate)
                .await?
        }
        PolicyAction::Reload => client.policy_reload().await?,
    };
    print_json(&result);
    Ok(ExitCode::SUCCESS)
}

async fn interactive(cli: &Cli) -> anyhow::Result<ExitCode> {
    let client = client_for(cli)?;
    let bypass = std::env::var("TAME_BYPASS_MODE").map(|v| v == "1" || v == "true").unwrap_or(false);
    if bypass {
        println!("TAME_BYPASS_MODE is set; calls made from this shell will not be evaluated against the policy.");
    }
    println!("tamesdk interactive — enter \"<tool> <json args>\", or \"quit\" to exit.");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let (tool, args) = match line.split_once(' ') {
            Some((t, a)) => (t, a.trim()),
            None => (line, "{}"),
        };
        let tool_args: Value = match serde_json::from_str(args) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("invalid JSON arguments: {e}");
                continue;
            }
        };

        let request = EnforceRequest {
            tool_name: tool.to_string(),
            tool_args,
            session_id: std::env::var("TAME_SESSION_ID").ok(),
            agent_id: std::env::var("TAME_AGENT_ID").ok(),
            user_id: std::env::var("TAME_USER_ID").ok(),
            metadata: None,
            context: None,
        };
        match client.enforce(&request).await {
            Ok(response) => print_json(&serde_json::to_value(&response)?),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}
