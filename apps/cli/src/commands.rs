//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use variantflow_artifacts::{ArtifactKey, ArtifactStore, FsArtifactStore, decode_variants};
use variantflow_core::{
    InProcessDispatcher, PipelineContext, ProgressReporter, WorkerOutcome, execute,
    submit_annotation, submit_report,
};
use variantflow_shared::{
    AppConfig, ReportOutput, Scope, SessionMetadata, Task, TaskContext, TaskId, TaskProgress,
    TaskStatus, expand_home, init_config, load_config, render_config,
};
use variantflow_storage::{Storage, TaskStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// variantflow: annotate, classify and report on genomic variants.
#[derive(Parser)]
#[command(
    name = "variantflow",
    version,
    about = "Turn a list of genomic variants into a scored, filtered clinical report.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Who a task belongs to. Artifacts are namespaced by these identifiers.
#[derive(Args, Clone, Debug)]
pub(crate) struct ContextArgs {
    /// Session identifier.
    #[arg(long, env = "VARIANTFLOW_SESSION", default_value = "default")]
    pub session: String,

    /// User identifier.
    #[arg(long, env = "VARIANTFLOW_USER", default_value = "local")]
    pub user: String,

    /// Application name.
    #[arg(long, env = "VARIANTFLOW_APP", default_value = "variantflow")]
    pub app: String,

    /// Report scope: restricted (ACMG SF genes) or unrestricted.
    #[arg(long, default_value = "restricted")]
    pub scope: Scope,
}

impl ContextArgs {
    fn task_context(&self) -> TaskContext {
        TaskContext {
            session_id: self.session.clone(),
            user_id: self.user.clone(),
            app_name: self.app.clone(),
            scope: self.scope,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Store a JSON variant list as an input artifact.
    Import {
        /// Path to a JSON array of variants.
        file: PathBuf,

        /// Artifact name (defaults to the file name).
        #[arg(short, long)]
        name: Option<String>,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Submit a task and wait for its worker to finish.
    Submit {
        #[command(subcommand)]
        stage: SubmitStage,
    },

    /// Execute a pending or interrupted task inline.
    Run {
        /// Task id.
        task_id: String,
    },

    /// Show one task, or list tasks for a session.
    Status {
        /// Task id. Lists tasks when omitted.
        task_id: Option<String>,

        /// List tasks for this session instead of the most recent ones.
        #[arg(long)]
        session: Option<String>,

        /// Maximum tasks to list.
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Print the full task document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Worker stages a task can be submitted to.
#[derive(Subcommand)]
pub(crate) enum SubmitStage {
    /// Annotate an imported variant artifact.
    Annotate {
        /// Input variant artifact name.
        #[arg(long)]
        input: String,

        #[command(flatten)]
        context: ContextArgs,
    },
    /// Build the clinical report from an annotated variant artifact.
    Report {
        /// Annotated variant artifact name (`vep_annotated_<id>.json`).
        #[arg(long)]
        input: String,

        #[command(flatten)]
        context: ContextArgs,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "variantflow=info",
        1 => "variantflow=debug",
        _ => "variantflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Import {
            file,
            name,
            context,
        } => cmd_import(&file, name.as_deref(), &context).await,
        Command::Submit { stage } => match stage {
            SubmitStage::Annotate { input, context } => {
                cmd_submit(Stage::Annotate, &input, &context).await
            }
            SubmitStage::Report { input, context } => {
                cmd_submit(Stage::Report, &input, &context).await
            }
        },
        Command::Run { task_id } => cmd_run(&task_id).await,
        Command::Status {
            task_id,
            session,
            limit,
            json,
        } => cmd_status(task_id.as_deref(), session.as_deref(), limit, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(file: &Path, name: Option<&str>, args: &ContextArgs) -> Result<()> {
    let config = load_config()?;

    let bytes = std::fs::read(file).map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let variants = decode_variants(&bytes)
        .map_err(|e| eyre!("'{}' is not a variant list: {e}", file.display()))?;

    let name = match name {
        Some(n) => n.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("cannot derive an artifact name from '{}'", file.display()))?,
    };

    let artifacts = FsArtifactStore::open(expand_home(&config.storage.artifact_root)?)?;
    let key = ArtifactKey::for_task(&args.task_context(), &name);
    let version = artifacts.save(&key, &bytes).await?;

    info!(artifact = %key, version, variants = variants.len(), "imported variants");

    println!();
    println!("  Variants imported!");
    println!("  Artifact: {name}");
    println!("  Version:  {version}");
    println!("  Variants: {}", variants.len());
    println!();

    Ok(())
}

#[derive(Clone, Copy)]
enum Stage {
    Annotate,
    Report,
}

async fn cmd_submit(stage: Stage, input: &str, args: &ContextArgs) -> Result<()> {
    let config = load_config()?;
    let ctx = Arc::new(PipelineContext::from_config(&config).await?);
    let dispatcher = InProcessDispatcher::new(Arc::clone(&ctx));

    let task_id = match stage {
        Stage::Annotate => {
            submit_annotation(ctx.store.as_ref(), &dispatcher, args.task_context(), input).await?
        }
        Stage::Report => {
            submit_report(ctx.store.as_ref(), &dispatcher, args.task_context(), input).await?
        }
    };
    println!("Submitted task {task_id}");

    let spinner = spinner();
    spinner.set_message(format!("waiting for {task_id}"));
    for (id, outcome) in dispatcher.drain().await {
        if let Err(e) = outcome {
            spinner.finish_and_clear();
            return Err(eyre!("worker for {id} could not update its task: {e}"));
        }
    }
    spinner.finish_and_clear();

    let task = ctx.store.read(&task_id).await?;
    print_task(&task);
    Ok(())
}

async fn cmd_run(task_id: &str) -> Result<()> {
    let config = load_config()?;
    let ctx = PipelineContext::from_config(&config).await?;
    let task_id = TaskId::from(task_id);

    info!(task_id = %task_id, "running task inline");

    let reporter = CliProgress::new();
    let outcome = execute(&ctx, &task_id, &reporter).await?;
    reporter.spinner.finish_and_clear();

    match outcome {
        WorkerOutcome::Skipped(status) => {
            println!("Task {task_id} is already {status}; nothing to do.");
        }
        WorkerOutcome::Completed | WorkerOutcome::Failed(_) => {
            let task = ctx.store.read(&task_id).await?;
            print_task(&task);
        }
    }
    Ok(())
}

async fn cmd_status(
    task_id: Option<&str>,
    session: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let db_path = expand_home(&config.storage.task_db)?;
    if !db_path.exists() {
        return Err(eyre!(
            "no task database at '{}'. Submit a task first.",
            db_path.display()
        ));
    }
    let storage = Storage::open_readonly(&db_path).await?;

    if let Some(id) = task_id {
        let task = storage.read(&TaskId::from(id)).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&task)?);
        } else {
            print_task(&task);
        }
        return Ok(());
    }

    let (tasks, meta) = match session {
        Some(s) => (
            storage.list_tasks_for_session(s).await?,
            storage.read_session(s).await?,
        ),
        None => (storage.list_recent_tasks(limit).await?, None),
    };

    if json {
        let body = match &meta {
            Some(meta) => serde_json::json!({ "session": meta, "tasks": tasks }),
            None => serde_json::to_value(&tasks)?,
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if let Some(meta) = &meta {
        print_session(meta);
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<11} {:<10} {:<20} {}",
        "ID", "KIND", "STATUS", "PHASE", "UPDATED"
    );
    for task in tasks {
        println!(
            "{:<38} {:<11} {:<10} {:<20} {}",
            task.id.as_str(),
            task.kind.as_str(),
            task.status.as_str(),
            task.phase.as_deref().unwrap_or("-"),
            task.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    println!("{}", render_config(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_task(task: &Task) {
    println!();
    println!("  Task:     {}", task.id);
    println!("  Kind:     {}", task.kind);
    println!("  Status:   {}", task.status);
    if let Some(phase) = &task.phase {
        println!("  Phase:    {phase}");
    }
    if let Some(p) = &task.progress {
        println!(
            "  Progress: batch {}/{} ({:.1}%)",
            p.current_batch, p.total_batches, p.progress_pct
        );
    }
    if let Some(artifact) = &task.output_artifact {
        println!("  Output:   {artifact}");
    }
    if let Some(error) = &task.error {
        println!("  Error:    {error}");
    }

    if task.status == TaskStatus::Completed {
        if let Some(report) = task
            .output
            .clone()
            .and_then(|v| serde_json::from_value::<ReportOutput>(v).ok())
        {
            print_report(&report);
        } else if let Some(output) = &task.output {
            if let Some(n) = output.get("total_variants") {
                println!("  Variants: {n}");
            }
            if let Some(n) = output.get("variants_with_gene") {
                println!("  With gene: {n}");
            }
        }
    }
    println!();
}

fn print_session(meta: &SessionMetadata) {
    println!();
    println!("  Session:  {} ({})", meta.session_id, meta.status);
    println!("  Scope:    {}", meta.scope);
    if let Some(n) = meta.variant_count {
        println!("  Variants: {n}");
    }
    if let (Some(p), Some(a)) = (meta.pathogenic_count, meta.annotations_count) {
        println!("  Findings: {p} pathogenic of {a} annotations");
    }
    if let Some(summary) = &meta.summary {
        println!("  Summary:  {summary}");
    }
    if let Some(error) = &meta.error {
        println!("  Error:    {error}");
    }
    println!();
}

fn print_report(report: &ReportOutput) {
    println!("  Scope:    {}", report.scope);
    if let Some(version) = &report.panel_version {
        println!("  Panel:    {version}");
    }
    println!(
        "  Variants: {} considered of {}",
        report.total_variants_considered, report.total_variants
    );
    println!(
        "  Findings: {} pathogenic in {} annotations",
        report.pathogenic_count, report.total_annotations
    );
    if let Some(genes) = report.genes_reported {
        println!("  Genes:    {genes}");
    }
    println!();
    println!("  {}", report.summary);
    if !report.key_findings.is_empty() {
        println!();
        println!("  Key findings:");
        for finding in &report.key_findings {
            println!("    - {finding}");
        }
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("  Recommendations:");
        for (i, rec) in report.recommendations.iter().enumerate() {
            println!("    {}. {rec}", i + 1);
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, _task_id: &TaskId, name: &str) {
        self.spinner.set_message(name.replace('_', " "));
    }

    fn checkpoint(&self, _task_id: &TaskId, progress: &TaskProgress) {
        self.spinner.set_message(format!(
            "annotating [{}/{}] {:.1}% ({} of {} variants)",
            progress.current_batch,
            progress.total_batches,
            progress.progress_pct,
            progress.variants_processed,
            progress.total_variants
        ));
    }

    fn finished(&self, _task_id: &TaskId, succeeded: bool) {
        if succeeded {
            self.spinner.finish_with_message("done");
        } else {
            self.spinner.finish_with_message("failed");
        }
    }
}
