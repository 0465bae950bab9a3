//! Exercises the argument-resolution and exit-code contract `tamesdk`
//! owns, without a live `reaper-agent`/`reaper-platform` on the other end
//! of `ReaperClient`. Scenarios mutate `TAME_API_URL`/`TAME_SESSION_ID`,
//! so this suite is pinned to one scenario at a time in `main` below.

use clap::Parser;
use cucumber::{given, then, when, World};
use reaper_cli::{client_for, exit_code_for_decision, Cli, Commands};

#[derive(World)]
#[world(init = Self::new)]
struct CliWorld {
    exit_code: Option<std::process::ExitCode>,
    parsed: Option<Result<Cli, String>>,
    resolved_base_url: Option<String>,
}

impl std::fmt::Debug for CliWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliWorld").finish()
    }
}

impl CliWorld {
    fn new() -> Self {
        Self {
            exit_code: None,
            parsed: None,
            resolved_base_url: None,
        }
    }
}

fn shell_split(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

#[given(regex = r#"^no TAME_API_URL environment variable is set$"#)]
async fn no_api_url(_world: &mut CliWorld) {
    std::env::remove_var("TAME_API_URL");
}

#[given(regex = r#"^the TAME_API_URL environment variable is set to "([^"]+)"$"#)]
async fn set_api_url(_world: &mut CliWorld, value: String) {
    std::env::set_var("TAME_API_URL", value);
}

#[given(regex = r#"^the TAME_SESSION_ID environment variable is set to "([^"]+)"$"#)]
async fn set_session_id(_world: &mut CliWorld, value: String) {
    std::env::set_var("TAME_SESSION_ID", value);
}

#[when(regex = r#"^the decision "([^"]+)" is mapped to an exit code$"#)]
async fn map_decision(world: &mut CliWorld, decision: String) {
    world.exit_code = Some(exit_code_for_decision(&decision));
}

#[when(regex = r#"^"([^"]+)" is parsed with no --api-url flag$"#)]
async fn parse_and_resolve(world: &mut CliWorld, line: String) {
    let args = shell_split(&line);
    let cli = Cli::try_parse_from(args).expect("command line should parse");
    let base_url = client_for(&cli).expect("client should build").base_url().to_string();
    world.resolved_base_url = Some(base_url);
}

#[when(regex = r#"^"([^"]+)" is parsed$"#)]
async fn parse(world: &mut CliWorld, line: String) {
    let args = shell_split(&line);
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            world.resolved_base_url = client_for(&cli).ok().map(|c| c.base_url().to_string());
            world.parsed = Some(Ok(cli));
        }
        Err(e) => world.parsed = Some(Err(e.to_string())),
    }
}

#[then(regex = r#"^the exit code is (\d+)$"#)]
async fn exit_code_is(world: &mut CliWorld, expected: u8) {
    let code = world.exit_code.take().expect("a decision must have been mapped");
    assert_eq!(format!("{code:?}"), format!("{:?}", std::process::ExitCode::from(expected)));
}

#[then(regex = r#"^the resolved base URL is "([^"]+)"$"#)]
async fn base_url_is(world: &mut CliWorld, expected: String) {
    assert_eq!(world.resolved_base_url.as_deref(), Some(expected.as_str()));
}

#[then(regex = r#"^the parsed enforce session is "([^"]+)"$"#)]
async fn enforce_session_is(world: &mut CliWorld, expected: String) {
    let parsed = world.parsed.take().expect("a command must have been parsed");
    let cli = parsed.expect("parsing should have succeeded");
    match cli.command {
        Commands::Enforce { session, .. } => assert_eq!(session.as_deref(), Some(expected.as_str())),
        _ => panic!("expected an enforce subcommand"),
    }
}

#[then("parsing succeeds")]
async fn parsing_succeeds(world: &mut CliWorld) {
    let parsed = world.parsed.take().expect("a command must have been parsed");
    assert!(parsed.is_ok(), "expected parsing to succeed");
}

#[then("parsing fails")]
async fn parsing_fails(world: &mut CliWorld) {
    let parsed = world.parsed.take().expect("a command must have been parsed");
    assert!(parsed.is_err(), "expected parsing to fail but got a parsed command");
}

#[tokio::main]
async fn main() {
    // Scenarios mutate process environment variables (TAME_API_URL,
    // TAME_SESSION_ID); run them one at a time to avoid cross-scenario
    // interference.
    CliWorld::cucumber()
        .max_concurrent_scenarios(1)
        .run("tests/features")
        .await;
}
