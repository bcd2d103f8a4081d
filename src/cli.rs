use crate::catalog::{ProblemCatalog, StaticCatalog};
use crate::config::loader::TutorboxConfig;
use crate::config::validator::{check_system_capabilities, validate_config};
use crate::exec::sandbox::Sandbox;
use crate::identity::StaticTokenProvider;
use crate::kernel::signal::{CancelToken, SignalHandler};
use crate::orchestrator::{HintRequest, Operation, Orchestrator, Request, Response, Submission};
use crate::tutor::reasoning::OpenAiReasoningClient;
use crate::tutor::session::Exchange;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Sandboxed C++ judge with a Socratic tutor", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./tutorbox.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Problem catalog, overriding `catalog_path`
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Fail instead of degrading when an isolation control is unavailable
    #[arg(long, global = true)]
    strict: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SubmitArgs {
    /// Caller token
    #[arg(long, env = "TUTORBOX_TOKEN", hide_env_values = true)]
    token: String,
    /// Problem id from the catalog
    #[arg(long)]
    problem: String,
    /// C++ source file, or `-` for stdin
    #[arg(long)]
    source: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a submission against the problem's first input
    Run(SubmitArgs),
    /// Compile once and run every test case of the problem
    Test(SubmitArgs),
    /// Run a submission and ask the tutor for the next hint
    Hint {
        #[command(flatten)]
        submit: SubmitArgs,
        /// Output the learner saw on an earlier attempt
        #[arg(long)]
        prior_output: Option<String>,
        /// JSON file with the conversation so far (the `history` of a previous response)
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Serve JSON-lines requests on stdin/stdout
    Serve,
    /// Check that the compiler and isolation controls are available
    CheckDeps {
        /// Print the full report as JSON
        #[arg(long)]
        verbose: bool,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(target_os = "linux") {
        anyhow::bail!("tutorbox requires Linux for process isolation");
    }

    let cli = Cli::parse();
    SignalHandler::init().map_err(|e| anyhow::anyhow!("cannot install signal handlers: {}", e))?;

    let mut config = TutorboxConfig::load_or_default(cli.config.as_deref())?;
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    if cli.strict {
        config.sandbox.strict_mode = true;
    }

    let validation = validate_config(&config)?;
    if !validation.is_valid() {
        log::warn!(
            "Continuing with {} configuration error(s) in permissive mode",
            validation.errors.len()
        );
    }
    crate::observability::audit::init_audit_logger(config.audit_log.as_deref())?;

    match cli.command {
        Commands::CheckDeps { verbose } => check_dependencies(&config, verbose),
        Commands::Serve => {
            let (orchestrator, sandbox) = build_orchestrator(&config)?;
            let swept = sandbox.sweep_stale()?;
            if swept > 0 {
                log::info!("Removed {} stale run directories", swept);
            }
            let summary = crate::server::serve(
                orchestrator,
                BufReader::new(std::io::stdin()),
                std::io::stdout(),
                &config.service,
            )?;
            log::info!("serve summary: {:?}", summary);
            Ok(())
        }
        Commands::Run(submit) => {
            let operation = Operation::Run(submission(&submit)?);
            one_shot(&config, operation)
        }
        Commands::Test(submit) => {
            let operation = Operation::Test(submission(&submit)?);
            one_shot(&config, operation)
        }
        Commands::Hint {
            submit,
            prior_output,
            history,
        } => {
            let conversation_history = history.as_deref().map(read_history).transpose()?;
            let operation = Operation::Hint(HintRequest {
                submission: submission(&submit)?,
                prior_output,
                conversation_history,
            });
            one_shot(&config, operation)
        }
    }
}

fn build_orchestrator(config: &TutorboxConfig) -> Result<(Arc<Orchestrator>, Arc<Sandbox>)> {
    if config.catalog_path.as_os_str().is_empty() {
        anyhow::bail!("no problem catalog configured; set catalog_path or pass --catalog");
    }
    let catalog = StaticCatalog::load_from_file(&config.catalog_path)
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;
    log::info!("Loaded {} problems", catalog.len());

    let sandbox = Arc::new(Sandbox::new(config.sandbox.clone(), config.toolchain.clone())?);
    let reasoning = OpenAiReasoningClient::from_config(&config.reasoning)?;
    if !reasoning.is_configured() {
        log::warn!(
            "{} is not set; hint requests will fail",
            config.reasoning.api_key_env
        );
    }

    let orchestrator = Orchestrator::new(
        sandbox.clone(),
        Arc::new(catalog),
        Arc::new(StaticTokenProvider::new(&config.callers)),
        Arc::new(reasoning),
        &config.tutor,
    );
    Ok((Arc::new(orchestrator), sandbox))
}

fn one_shot(config: &TutorboxConfig, operation: Operation) -> Result<()> {
    let (orchestrator, _sandbox) = build_orchestrator(config)?;
    let request = Request {
        id: uuid::Uuid::new_v4().to_string(),
        operation,
    };
    let response = orchestrator.handle(request, &CancelToken::new());
    emit(&response)?;
    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn emit(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn submission(args: &SubmitArgs) -> Result<Submission> {
    Ok(Submission {
        token: args.token.clone(),
        problem_id: args.problem.clone(),
        source_code: read_source(&args.source)?,
    })
}

fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("reading source from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading source {}", path.display()))
}

fn read_history(path: &Path) -> Result<Vec<Exchange>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading history {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing history {}", path.display()))
}

fn check_dependencies(config: &TutorboxConfig, verbose: bool) -> Result<()> {
    let sandbox = Sandbox::new(config.sandbox.clone(), config.toolchain.clone())?;
    let report = sandbox.check_toolchain();

    if verbose {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match (report.available, report.version.as_deref()) {
            (true, Some(version)) => println!("{}: {} ({})", report.language, report.compiler, version),
            (true, None) => println!("{}: {}", report.language, report.compiler),
            (false, _) => println!(
                "{}: {} MISSING{}",
                report.language,
                report.compiler,
                report
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            ),
        }
        println!("network isolation: {}", report.network_isolation);
    }

    for missing in check_system_capabilities() {
        eprintln!("Warning: {}", missing);
    }

    if !report.available {
        std::process::exit(1);
    }
    Ok(())
}
