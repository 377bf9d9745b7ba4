use clap::Parser;
use polyglot_lsp::backend::{BackendError, BackendProfile, BackendSession, SessionConfig};
use polyglot_lsp::logging::{LogConfig, init_logging};
use polyglot_lsp::template::InitializeTemplate;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// CLI arguments for the polyglot LSP client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in backend profile (phpactor, gopls)
    #[arg(long, value_name = "NAME", default_value = "phpactor")]
    backend: String,

    /// Initialize template file; replaces the profile's built-in template
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Backend executable; replaces the profile's command
    #[arg(long, value_name = "CMD")]
    command: Option<String>,

    /// Arguments for --command
    #[arg(last = true, value_name = "ARGS")]
    command_args: Vec<String>,

    /// Attach to a backend listening on this TCP address instead of spawning one
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "command")]
    connect: Option<String>,

    /// Workspace root (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,

    /// Send this request after the handshake and print its result
    #[arg(long, value_name = "METHOD")]
    probe: Option<String>,

    /// JSON params for --probe
    #[arg(long, value_name = "JSON", requires = "probe")]
    probe_params: Option<String>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides POLYGLOT_LSP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Build the backend profile from the built-in name plus CLI overrides
fn build_profile(args: &Args) -> Result<BackendProfile, BackendError> {
    let mut profile = match BackendProfile::builtin(&args.backend) {
        Ok(profile) => profile,
        // Unknown names are custom backends when both template and command are given
        Err(unknown) => match (&args.template, &args.command) {
            (Some(template), Some(command)) => {
                let profile = BackendProfile::custom(&args.backend, &args.backend, command, template)?;
                return Ok(profile.with_args(args.command_args.iter().cloned()));
            }
            _ => return Err(unknown),
        },
    };

    if let Some(template) = &args.template {
        profile = profile.with_template(InitializeTemplate::from_path(template)?);
    }
    if let Some(command) = &args.command {
        profile = profile
            .with_command(command)
            .with_args(args.command_args.iter().cloned());
    }
    Ok(profile)
}

fn build_config(args: &Args) -> Result<SessionConfig, BackendError> {
    let mut builder = SessionConfig::builder();
    if let Some(ms) = args.request_timeout_ms {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }
    Ok(builder.build()?)
}

async fn run(args: Args) -> Result<(), BackendError> {
    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().map_err(|source| BackendError::InvalidWorkspaceRoot {
            path: PathBuf::from("."),
            source,
        })?,
    };
    let profile = build_profile(&args)?;
    let config = build_config(&args)?;

    let session = match &args.connect {
        Some(addr) => BackendSession::attach(profile, config, &root, addr.as_str()).await?,
        None => BackendSession::start(profile, config, &root).await?,
    };

    let registry = session.session().capabilities()?;
    let summary = json!({
        "backend": session.profile().name(),
        "server": session.server_name(),
        "root": session.root(),
        "capabilities": registry.negotiated(),
        "commands": registry.commands(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(method) = &args.probe {
        let params = args
            .probe_params
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;
        match session.session().call(method, params).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => error!("Probe {} failed: {}", method, e),
        }
    }

    info!("Session uptime: {:?}", session.uptime());
    session.close().await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        eprintln!("polyglot-lsp: {e}");
        std::process::exit(1);
    }
}
