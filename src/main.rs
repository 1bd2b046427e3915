//! kodegen-acp-bridge - run prompts against an ACP agent from the terminal
//!
//! Assistant text goes to stdout; reasoning, tool calls and permission
//! decisions go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # One prompt
//! kodegen-acp-bridge --agent claude-code-acp "Summarize src/lib.rs"
//!
//! # Read prompts from stdin, one turn per line, in one conversation
//! kodegen-acp-bridge --agent gemini --agent-arg=--experimental-acp --cwd ~/project
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use kodegen_acp_bridge::{
    AgentConfig, AgentProvider, AllowedWorkspaces, BridgeOptions, ChatRequest,
    InMemorySessionStore, JsonFileSessionStore, ModelProvider, ProcessManager, SessionManager,
    SessionStore, StreamEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PermissionPolicy {
    /// Grant every request
    Allow,
    /// Deny every request
    Deny,
}

#[derive(Parser, Debug)]
#[command(name = "kodegen-acp-bridge", version, about = "Stream prompts through an ACP agent")]
struct Args {
    /// Agent executable
    #[arg(long)]
    agent: String,

    /// Argument passed to the agent (repeatable)
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    agent_args: Vec<String>,

    /// Working directory for the session
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Conversation id, reused across turns
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Answer to permission requests
    #[arg(long, value_enum, default_value_t = PermissionPolicy::Deny)]
    permissions: PermissionPolicy,

    /// File persisting session metadata, enabling resume across runs
    #[arg(long)]
    sessions: Option<PathBuf>,

    /// Handshake timeout in seconds
    #[arg(long, default_value_t = 30)]
    handshake_timeout: u64,

    /// Prompt; read from stdin line by line when omitted
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut builder = BridgeOptions::builder()
        .handshake_timeout(std::time::Duration::from_secs(args.handshake_timeout));
    if let Some(cwd) = &args.cwd {
        builder = builder.default_workdir(cwd.clone());
    }
    let processes = ProcessManager::new(builder.build());

    let store: Arc<dyn SessionStore> = match &args.sessions {
        Some(path) => Arc::new(
            JsonFileSessionStore::open(path)
                .await
                .with_context(|| format!("Failed to open session store {}", path.display()))?,
        ),
        None => Arc::new(InMemorySessionStore::new()),
    };
    let sessions =
        SessionManager::with_collaborators(processes, store, Arc::new(AllowedWorkspaces::new()));
    let provider = AgentProvider::new(sessions);

    let agent =
        AgentConfig::new(agent_id(&args.agent), args.agent.clone()).args(args.agent_args.clone());

    let outcome = if args.prompt.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut outcome = Ok(());
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            outcome = run_turn(&provider, &args, &agent, line).await;
            if outcome.is_err() {
                break;
            }
        }
        outcome
    } else {
        run_turn(&provider, &args, &agent, &args.prompt.join(" ")).await
    };

    provider.shutdown().await;
    outcome
}

async fn run_turn(
    provider: &AgentProvider,
    args: &Args,
    agent: &AgentConfig,
    prompt: &str,
) -> Result<()> {
    let mut request = ChatRequest::new(args.conversation.as_str(), agent.clone(), prompt);
    request.workdir = args.cwd.clone();

    let mut stream = provider.stream(request);
    let mut failure = None;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Text { text } => print!("{text}"),
            StreamEvent::Reasoning { text } => eprintln!("{text}"),
            StreamEvent::ToolCallStart { name, .. } => eprintln!("> {name}"),
            StreamEvent::ToolCallChunk { .. } => {}
            StreamEvent::ToolCallEnd { arguments, .. } => eprintln!("  {arguments}"),
            StreamEvent::PermissionRequested(prompt) => {
                let granted = args.permissions == PermissionPolicy::Allow;
                let outcome = provider.resolve_permission_request(&prompt.request_id, granted)?;
                eprintln!("? {} -> {outcome:?}", prompt.title);
            }
            StreamEvent::Usage(usage) => log::info!(
                "Usage: {} in / {} out",
                usage.input_tokens,
                usage.output_tokens
            ),
            StreamEvent::Stop { reason } => {
                println!();
                log::info!("Turn stopped: {}", reason.as_str());
            }
            StreamEvent::Error { message } => failure = Some(message),
        }
    }

    match failure {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => Ok(()),
    }
}

/// Agent id derived from the executable's file name
fn agent_id(command: &str) -> String {
    std::path::Path::new(command)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(command)
        .to_string()
}
