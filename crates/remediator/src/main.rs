//! Remediation orchestrator CLI.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remediator::advisor::{OpenAiAdvisor, RemediationAdvisor};
use remediator::executor::{CommandExecutor, LocalExecutor, SshAuth, SshExecutor, SshTarget};
use remediator::procedures::{
    DirectoryProcedureRepository, GitHubProcedureRepository, ProcedureRepository,
};
use remediator::registry::{InMemoryRegistry, RemediationRegistry};
use remediator::report::CallbackBase;
use remediator::server::{self, ServerState};
use remediator::{RemediationPolicy, RemediationWorkflow};

const DEFAULT_LOG_FILTER: &str = "remediator=info,notify=info,tower_http=info";

/// Approval-gated incident remediation
#[derive(Parser)]
#[command(name = "remediator")]
#[command(about = "Turns alerts into vetted or AI-suggested fixes and runs them once approved")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (alert intake, approval callbacks)
    Serve(Box<ServeArgs>),

    /// Read advisor text on stdin and print the commands the filter keeps
    Extract {
        /// Policy file supplying `command_patterns`
        #[arg(long, env = "REMEDIATOR_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// JSON policy file
    #[arg(long, env = "REMEDIATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Externally reachable base URL of this service (approval buttons post here)
    #[arg(long, env = "CALLBACK_BASE_URL")]
    callback_base_url: String,

    /// GitHub contents API directory holding `{incident}.json` procedures
    #[arg(long, env = "SOP_GITHUB_API")]
    sop_github_api: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Local directory holding `{incident}.json` procedures
    #[arg(long, env = "SOP_DIR", conflicts_with = "sop_github_api")]
    sop_dir: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL")]
    openai_model: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    /// Remediation target host; commands run locally when unset
    #[arg(long, env = "VM_HOST")]
    vm_host: Option<String>,

    #[arg(long, env = "VM_PORT", default_value_t = 22)]
    vm_port: u16,

    #[arg(long, env = "VM_USER", default_value = "azureuser")]
    vm_user: String,

    #[arg(long, env = "VM_PASSWORD", hide_env_values = true)]
    vm_password: Option<String>,

    /// Private key file for the target
    #[arg(long, env = "VM_PRIVATE_KEY")]
    vm_private_key: Option<PathBuf>,

    /// Shared registry store (requires the `postgres` feature)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve(args) => run_serve_command(*args).await,
        Commands::Extract { config } => run_extract_command(config.as_deref()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_policy(path: Option<&std::path::Path>) -> Result<RemediationPolicy> {
    match path {
        Some(path) => RemediationPolicy::from_file(path).context("Failed to load policy file"),
        None => Ok(RemediationPolicy::default()),
    }
}

fn run_extract_command(config: Option<&std::path::Path>) -> Result<()> {
    let policy = load_policy(config)?;
    let filter = policy.command_filter()?;

    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read advisor text from stdin")?;

    let commands = filter.extract(&text);
    if commands.is_empty() {
        eprintln!("{}", "No actionable commands".yellow());
    }
    for command in commands {
        println!("{command}");
    }
    Ok(())
}

async fn build_registry(args: &ServeArgs) -> Result<Arc<dyn RemediationRegistry>> {
    match &args.database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let registry = remediator::registry::PostgresRegistry::connect(url)
                .await
                .context("Failed to connect registry database")?;
            Ok(Arc::new(registry))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => bail!("DATABASE_URL is set but this build lacks the `postgres` feature"),
        None => {
            warn!("Using in-memory registry; run a single instance only");
            Ok(Arc::new(InMemoryRegistry::new()))
        }
    }
}

fn build_executor(
    args: &ServeArgs,
    policy: &RemediationPolicy,
) -> Result<Arc<dyn CommandExecutor>> {
    let Some(host) = &args.vm_host else {
        warn!("VM_HOST not set, commands will run on this host");
        return Ok(Arc::new(LocalExecutor::new()));
    };

    let auth = match (&args.vm_private_key, &args.vm_password) {
        (Some(path), _) => SshAuth::KeyFile {
            path: path.clone(),
            passphrase: None,
        },
        (None, Some(password)) => SshAuth::Password(password.clone()),
        (None, None) => bail!("VM_HOST is set but neither VM_PASSWORD nor VM_PRIVATE_KEY is"),
    };

    Ok(Arc::new(SshExecutor::new(
        SshTarget {
            host: host.clone(),
            port: args.vm_port,
            user: args.vm_user.clone(),
            auth,
        },
        policy.execution_timeout(),
    )))
}

fn build_procedures(
    args: &ServeArgs,
    policy: &RemediationPolicy,
) -> Option<Arc<dyn ProcedureRepository>> {
    if let Some(api) = &args.sop_github_api {
        return Some(Arc::new(GitHubProcedureRepository::new(
            api.clone(),
            args.github_token.clone(),
            policy.lookup_timeout(),
        )));
    }
    args.sop_dir
        .as_ref()
        .map(|dir| Arc::new(DirectoryProcedureRepository::new(dir)) as Arc<dyn ProcedureRepository>)
}

async fn run_serve_command(args: ServeArgs) -> Result<()> {
    let policy = load_policy(args.config.as_deref())?;
    let callback =
        CallbackBase::parse(&args.callback_base_url).context("Invalid CALLBACK_BASE_URL")?;

    let registry = build_registry(&args).await?;
    let executor = build_executor(&args, &policy)?;
    let procedures = build_procedures(&args, &policy);
    let advisor = OpenAiAdvisor::new(
        args.openai_api_key.clone(),
        args.openai_model.clone(),
        args.openai_base_url.clone(),
        policy.advisor_timeout(),
    )
    .context("Failed to build advisor")?;
    let notifier = notify::Notifier::from_env(policy.notify_timeout());

    println!("{}", "═".repeat(60).cyan());
    println!("{}", "REMEDIATION ORCHESTRATOR".cyan().bold());
    println!("{}", "═".repeat(60).cyan());
    println!();
    println!("  Address:       {}", args.addr.green());
    println!("  Callback:      {}", callback.decision_url().green());
    println!("  Target:        {}", executor.target().green());
    println!("  Vetted policy: {}", policy.vetted_policy.as_str().cyan());
    println!(
        "  Procedures:    {}",
        if procedures.is_some() { "enabled".green() } else { "disabled".yellow() }
    );
    println!(
        "  Advisor:       {}",
        if advisor.is_configured() { "enabled".green() } else { "disabled".yellow() }
    );
    println!("  Channels:      {}", notifier.channel_count());
    println!("  Approval TTL:  {}s", policy.request_ttl_secs);
    println!();

    let mut workflow =
        RemediationWorkflow::new(policy, callback, registry, executor, Arc::new(notifier))
            .context("Invalid remediation policy")?
            .with_advisor(Arc::new(advisor) as Arc<dyn RemediationAdvisor>);
    if let Some(procedures) = procedures {
        workflow = workflow.with_procedures(procedures);
    }

    let state = Arc::new(ServerState::new(Arc::new(workflow)));
    info!(addr = %args.addr, "Starting remediation server");
    server::run_server(state, &args.addr).await
}
