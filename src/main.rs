//! Keel CLI entrypoint.
//!
//! This is the main entrypoint for the keel command-line tool.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use keel::cli::{Cli, Commands, LogFormat, OutputFormatter, RunArgs, StateCommands};
use keel::config::{MaterializedStack, StackConfig, StackParser, StackValidator, find_stack_file, materialize};
use keel::error::{KeelError, ReconcileError, Result};
use keel::graph::DependencyGraph;
use keel::planner::{ExecutorOptions, NodeStatus};
use keel::provider::ProviderRegistry;
use keel::reconciler::{Reconciler, ReconciliationResult};
use keel::resource::{ResourceId, Value};
use keel::state::{LocalStateStore, STATE_DIR, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const STACK_TEMPLATE: &str = r#"# keel stack file
stack:
  name: my-stack
  environment: dev

required_env: []

settings:
  concurrency: 4
  timeout_secs: 300

resources:
  - name: network
    type: "null"
    properties:
      cidr: 10.0.0.0/16

  - name: service
    type: command
    properties:
      create: "echo service-on-$NETWORK"
      delete: "true"
      environment:
        NETWORK: { ref: network.id }

  - name: staging-access
    type: "null"
    only_in: [prod]
    depends_on: [service]

outputs:
  network_id: { ref: network.id }
  service_stdout: { ref: service.stdout }
"#;

const ENV_TEMPLATE: &str = "# Variables listed under required_env go here\n";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight operations");
            on_signal.cancel();
        }
    });

    let ctx = Context {
        stack: cli.stack,
        environment: cli.environment,
        formatter,
        cancel,
    };

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(&ctx, warnings),
        Commands::Plan { destroy } => cmd_plan(&ctx, destroy).await,
        Commands::Apply { yes, run } => cmd_apply(&ctx, yes, run).await,
        Commands::Destroy { yes, run } => cmd_destroy(&ctx, yes, run).await,
        Commands::Drift => cmd_drift(&ctx).await,
        Commands::Outputs => cmd_outputs(&ctx).await,
        Commands::State { command } => cmd_state(&ctx, command).await,
    }
}

/// Global flags shared by every command.
struct Context {
    stack: Option<PathBuf>,
    environment: Option<String>,
    formatter: OutputFormatter,
    cancel: CancellationToken,
}

/// A loaded, validated and composed stack.
struct LoadedStack {
    config: StackConfig,
    environment: String,
    graph: DependencyGraph,
    outputs: BTreeMap<String, Value>,
    store: Arc<dyn StateStore>,
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let stack_path = path.join("keel.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && stack_path.exists() {
        eprintln!("Stack file already exists: {}", stack_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&stack_path, STACK_TEMPLATE)?;
    eprintln!("Created: {}", stack_path.display());

    std::fs::write(&env_path, ENV_TEMPLATE)?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# keel")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(STATE_DIR) {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Edit keel.yaml to declare your resources");
    eprintln!("  2. Run 'keel validate' to check the stack");
    eprintln!("  3. Run 'keel plan' to see what would change");
    eprintln!("  4. Run 'keel apply' to converge");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(ctx: &Context, show_warnings: bool) -> Result<()> {
    let stack_file = resolve_stack_path(ctx.stack.as_ref())?;
    info!("Validating stack: {}", stack_file.display());

    let parser = StackParser::new().with_base_path(stack_dir(&stack_file));
    parser.load_dotenv()?;
    let config = parser.load(&stack_file)?;

    let validator = StackValidator::new().with_known_types(ProviderRegistry::with_builtin().types());
    let result = validator.check(&config);
    emit(&ctx.formatter.format_validation(&result, show_warnings))?;

    if let Some(first) = result.errors.first() {
        return Err(KeelError::Config(keel::error::ConfigError::validation(
            first.message.clone(),
            first.field.clone(),
        )));
    }

    let materialized = materialize(&config, &validator)?;
    debug!("Stack graph has {} resources", materialized.graph.len());
    Ok(())
}

/// Show what apply or destroy would change.
async fn cmd_plan(ctx: &Context, destroy: bool) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let reconciler = Reconciler::new(ProviderRegistry::with_builtin(), Arc::clone(&loaded.store));

    let plan = if destroy {
        reconciler.plan_destroy().await?
    } else {
        reconciler.plan(&loaded.graph).await?
    };

    emit(&ctx.formatter.format_plan(&plan))
}

/// Plan and apply.
async fn cmd_apply(ctx: &Context, auto_approve: bool, args: RunArgs) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let reconciler = build_reconciler(ctx, &loaded, args);

    let plan = reconciler.plan(&loaded.graph).await?;
    if !plan.needs_apply() {
        emit(&ctx.formatter.format_plan(&plan))?;
        return Ok(());
    }

    if !auto_approve {
        emit(&ctx.formatter.format_plan(&plan))?;
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let result = reconciler.apply(&loaded.graph, &loaded.outputs).await?;
    finish(ctx, &result)
}

/// Delete every applied resource.
async fn cmd_destroy(ctx: &Context, auto_approve: bool, args: RunArgs) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let reconciler = build_reconciler(ctx, &loaded, args);

    let plan = reconciler.plan_destroy().await?;
    if plan.is_empty() {
        eprintln!("Nothing to destroy.");
        return Ok(());
    }

    if !auto_approve {
        emit(&ctx.formatter.format_plan(&plan))?;
        if !confirm(
            &format!(
                "\nThis deletes {} resources in {}. Type 'destroy' to confirm: ",
                plan.entries.len(),
                loaded.environment
            ),
            "destroy",
        )? {
            eprintln!("Destroy cancelled.");
            return Ok(());
        }
    }

    let result = reconciler.destroy().await?;
    finish(ctx, &result)
}

/// Compare records with live provider state.
async fn cmd_drift(ctx: &Context) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let reconciler = Reconciler::new(ProviderRegistry::with_builtin(), Arc::clone(&loaded.store));

    let report = reconciler.check_drift().await?;
    emit(&ctx.formatter.format_drift(&report))
}

/// Show stack outputs.
async fn cmd_outputs(ctx: &Context) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let reconciler = Reconciler::new(ProviderRegistry::with_builtin(), Arc::clone(&loaded.store));

    let outputs = reconciler.outputs().await?;
    emit(&ctx.formatter.format_outputs(&outputs))
}

/// State management commands.
async fn cmd_state(ctx: &Context, command: StateCommands) -> Result<()> {
    let loaded = load_stack(ctx)?;
    let store = &loaded.store;

    match command {
        StateCommands::Show => {
            let state = store.snapshot().await?;
            let lock = store.lock_info().await?;
            emit(&ctx.formatter.format_state(&state, lock.as_ref()))?;
        }
        StateCommands::List => {
            let state = store.snapshot().await?;
            emit(&ctx.formatter.format_records(&state))?;
        }
        StateCommands::Lock { holder } => {
            let lock = store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            emit(&ctx.formatter.format_message(&format!("State locked: {}", lock.lock_id)))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                emit(&ctx.formatter.format_message("State forcefully unlocked."))?;
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                emit(&ctx.formatter.format_message("State unlocked."))?;
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
        StateCommands::Rm { all: true, .. } => {
            let lock = store.acquire_lock("").await?;
            let wiped = store.wipe().await;
            store.release_lock(&lock.lock_id).await?;
            wiped?;
            emit(&ctx.formatter.format_message("Removed every record from state."))?;
        }
        StateCommands::Rm { name: Some(name), .. } => {
            let id = ResourceId::from(name);
            if !store.load().await?.contains_key(&id) {
                return Err(KeelError::internal(format!("no record for '{id}'")));
            }
            let lock = store.acquire_lock("").await?;
            let removed = store.remove(&id).await;
            store.release_lock(&lock.lock_id).await?;
            removed?;
            emit(&ctx.formatter.format_message(&format!("Removed '{id}' from state.")))?;
        }
        StateCommands::Rm { name: None, .. } => {
            eprintln!("Please provide a resource name or use --all");
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the stack file path.
fn resolve_stack_path(stack_path: Option<&PathBuf>) -> Result<PathBuf> {
    stack_path.map_or_else(|| find_stack_file("."), |path| Ok(path.clone()))
}

fn stack_dir(stack_file: &Path) -> PathBuf {
    stack_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Loads, validates and composes the stack and opens its state store.
fn load_stack(ctx: &Context) -> Result<LoadedStack> {
    let stack_file = resolve_stack_path(ctx.stack.as_ref())?;
    let base = stack_dir(&stack_file);
    debug!("Loading stack from: {}", stack_file.display());

    let parser = StackParser::new().with_base_path(&base);
    parser.load_dotenv()?;
    let mut config = parser.load(&stack_file)?;

    if let Some(environment) = &ctx.environment {
        config.stack.environment.clone_from(environment);
    }

    let validator = StackValidator::new().with_known_types(ProviderRegistry::with_builtin().types());
    let MaterializedStack { graph, outputs, .. } = materialize(&config, &validator)?;
    let environment = config.stack.environment.clone();

    let store: Arc<dyn StateStore> = match &config.settings.state_path {
        Some(path) => Arc::new(LocalStateStore::with_state_path(base.join(path))),
        None => Arc::new(LocalStateStore::with_base_dir(base.join(STATE_DIR).join(&environment))),
    };

    info!(
        "Stack '{}' ({environment}): {} resources, state via {}",
        config.stack.name,
        graph.len(),
        store.backend_type()
    );

    Ok(LoadedStack {
        config,
        environment,
        graph,
        outputs,
        store,
    })
}

fn build_reconciler(ctx: &Context, loaded: &LoadedStack, args: RunArgs) -> Reconciler {
    let settings = &loaded.config.settings;
    let mut options = ExecutorOptions::default().with_cancel(ctx.cancel.clone());
    if let Some(concurrency) = args.concurrency.or(settings.concurrency) {
        options = options.with_concurrency(concurrency);
    }
    let timeout = args.timeout_secs.or(settings.timeout_secs).map(Duration::from_secs);
    options = options.with_timeout(timeout);

    Reconciler::new(ProviderRegistry::with_builtin(), Arc::clone(&loaded.store))
        .with_options(options)
        .with_max_attempts(args.attempts)
}

/// Prints the result and turns node failures into an error exit.
fn finish(ctx: &Context, result: &ReconciliationResult) -> Result<()> {
    emit(&ctx.formatter.format_reconciliation(result))?;

    if result.success() {
        return Ok(());
    }

    let report = &result.report;
    if report.count(NodeStatus::Cancelled) > 0 && report.count(NodeStatus::Failed) == 0 {
        error!("Run interrupted");
        return Err(ReconcileError::Aborted {
            reason: String::from("interrupted"),
        }
        .into());
    }

    Err(ReconcileError::NodesFailed {
        failed: report.count(NodeStatus::Failed),
        blocked: report.count(NodeStatus::Blocked),
    }
    .into())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
