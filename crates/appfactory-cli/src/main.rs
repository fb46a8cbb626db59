//! App Factory CLI
//!
//! The `appfactory` command drives generator pipelines and their quality gate.
//!
//! ## Commands
//!
//! - `run`: Inputs -> Scaffold -> Install -> Verify -> Cert-check -> Launch
//! - `verify`: run the Ralph loop only and write the certificate or failure
//! - `gate`: check the release certificate in a metadata directory
//! - `report`: re-render a saved Ralph report
//! - `pipelines`: list built-in pipeline presets

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use appfactory_checks::{BuiltinPipeline, PipelineManifest};
use appfactory_core::{
    read_report_artifact, run_verification, AuditIterationObserver, AuditLog, CertificateGate,
    PhaseRunner, Report, ReportGenerator, METADATA_DIR, REPORT_DIR,
};

#[derive(Parser)]
#[command(name = "appfactory")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "App Factory pipeline runner and quality gate", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every phase of a pipeline against a project directory
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        ralph: RalphArgs,
    },

    /// Run the Ralph QA loop and write RUN_CERTIFICATE.json or RUN_FAILURE.json
    Verify {
        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        ralph: RalphArgs,
    },

    /// Check the release certificate in a metadata directory
    Gate {
        /// Metadata directory (default: ./.appfactory)
        #[arg(long, default_value = METADATA_DIR)]
        metadata_dir: PathBuf,
    },

    /// Re-render a saved Ralph report
    Report {
        /// Path to report.json
        #[arg(short, long)]
        input: PathBuf,

        /// Rendering to print
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Progress)]
        format: ReportFormat,
    },

    /// List built-in pipeline presets
    Pipelines,
}

#[derive(Args)]
struct PipelineArgs {
    /// Project directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Pipeline manifest (JSON)
    #[arg(short, long, conflicts_with = "preset", required_unless_present = "preset")]
    manifest: Option<PathBuf>,

    /// Built-in pipeline preset (mobile-app, dapp, mini-app, plugin, chatbot)
    #[arg(long = "pipeline", id = "preset")]
    preset: Option<BuiltinPipeline>,
}

/// Overrides applied on top of the manifest's `ralph` block.
#[derive(Args, Default)]
struct RalphArgs {
    /// Maximum Ralph iterations
    #[arg(long, env = "APPFACTORY_MAX_ITERATIONS")]
    max_iterations: Option<u32>,

    /// Passing threshold (1-100)
    #[arg(long, env = "APPFACTORY_THRESHOLD")]
    threshold: Option<u8>,

    /// Per-check timeout in seconds (0 disables)
    #[arg(long, env = "APPFACTORY_CHECK_TIMEOUT")]
    check_timeout: Option<u64>,

    /// Run checks within an iteration concurrently
    #[arg(long)]
    concurrent: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    /// PROGRESS.md: every iteration in detail
    Progress,
    /// LOOP.md: one row per iteration
    Table,
    /// QA_NOTES.md: strengths and remaining issues
    Notes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    appfactory_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { pipeline, ralph } => cmd_run(&pipeline, &ralph).await,
        Commands::Verify { pipeline, ralph } => cmd_verify(&pipeline, &ralph).await,
        Commands::Gate { metadata_dir } => cmd_gate(&metadata_dir),
        Commands::Report { input, format } => cmd_report(&input, format),
        Commands::Pipelines => cmd_pipelines(),
    }
}

/// Resolve the manifest from `--manifest` or `--pipeline`, then apply overrides.
fn load_manifest(args: &PipelineArgs, ralph: &RalphArgs) -> Result<PipelineManifest> {
    let mut manifest = match (&args.manifest, args.preset) {
        (Some(path), _) => PipelineManifest::load(path)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?,
        (None, Some(preset)) => preset.manifest(),
        (None, None) => anyhow::bail!("Either --manifest or --pipeline is required"),
    };

    if let Some(max_iterations) = ralph.max_iterations {
        manifest.ralph.max_iterations = max_iterations;
    }
    if let Some(threshold) = ralph.threshold {
        manifest.ralph.passing_threshold = threshold;
    }
    if let Some(timeout) = ralph.check_timeout {
        manifest.ralph.check_timeout_secs = timeout;
    }
    if ralph.concurrent {
        manifest.ralph.concurrent_checks = true;
    }
    manifest
        .ralph
        .validate()
        .context("Invalid Ralph configuration")?;
    Ok(manifest)
}

/// Run every phase; non-zero exit on any failure.
async fn cmd_run(args: &PipelineArgs, ralph: &RalphArgs) -> Result<()> {
    let manifest = load_manifest(args, ralph)?;
    let project = &args.project;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current phase");
            let _ = cancel_tx.send(true);
        }
    });

    let mut runner =
        PhaseRunner::new(&manifest.pipeline, project).with_cancellation(cancel_rx);
    let engine = manifest
        .build_engine()?
        .with_observer(Arc::new(AuditIterationObserver::new(
            &manifest.pipeline,
            runner.audit_log().clone(),
        )));
    let steps = manifest.steps();

    println!("Running pipeline {} in {}", manifest.pipeline, project.display());
    println!("Run ID: {}", runner.run_id());
    println!();

    let outcome = runner.run(&steps, &engine).await;

    for phase in runner.phases() {
        println!("  {:<12} {}", phase.name, phase.status);
    }
    if let Some(report) = runner.report() {
        println!();
        print_report_summary(report);
    }
    println!();

    match outcome {
        Ok(run) => {
            println!("✓ Launched in {}ms", run.duration_ms);
            Ok(())
        }
        Err(e) => {
            println!("✗ {}", e);
            Err(e).context("Pipeline run failed")
        }
    }
}

/// Run Ralph only; non-zero exit on a FAIL verdict.
async fn cmd_verify(args: &PipelineArgs, ralph: &RalphArgs) -> Result<()> {
    let manifest = load_manifest(args, ralph)?;
    let project = &args.project;
    let metadata_dir = project.join(METADATA_DIR);

    let engine = manifest
        .build_engine()?
        .with_observer(Arc::new(AuditIterationObserver::new(
            &manifest.pipeline,
            AuditLog::for_project(project),
        )));

    info!(pipeline = %manifest.pipeline, project = %project.display(), "Verifying build");
    let report = run_verification(&engine, &manifest.pipeline, project, &metadata_dir)
        .await
        .context("Verification failed to run")?;

    print_report_summary(&report);
    println!(
        "Artifacts: {}",
        metadata_dir.join(REPORT_DIR).display()
    );

    if report.passed() {
        println!("\n✓ Certificate written");
        Ok(())
    } else {
        anyhow::bail!(
            "Verification failed: score {} below threshold {}",
            report.final_score,
            report.passing_threshold
        )
    }
}

/// Check the certificate; non-zero exit when the gate refuses.
fn cmd_gate(metadata_dir: &Path) -> Result<()> {
    let outcome = CertificateGate::check(metadata_dir);
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.ok {
        Ok(())
    } else {
        anyhow::bail!(
            "Gate refused: {}",
            outcome.error.as_deref().unwrap_or("unknown reason")
        )
    }
}

fn cmd_report(input: &Path, format: ReportFormat) -> Result<()> {
    let report = load_report(input)?;
    let generator = ReportGenerator::new(&report);
    let rendered = match format {
        ReportFormat::Progress => generator.progress_log(),
        ReportFormat::Table => generator.loop_table(),
        ReportFormat::Notes => generator.qa_notes(),
    };
    print!("{}", rendered);
    Ok(())
}

/// Read a report, verifying it against a sibling `report.digest` if present.
fn load_report(input: &Path) -> Result<Report> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let is_artifact = input.file_name().is_some_and(|n| n == "report.json");
    if is_artifact && dir.join("report.digest").exists() {
        return read_report_artifact(dir)
            .with_context(|| format!("Failed to read report artifact in {}", dir.display()));
    }

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid report {}", input.display()))
}

fn cmd_pipelines() -> Result<()> {
    println!("Built-in pipelines:");
    for preset in BuiltinPipeline::ALL {
        let manifest = preset.manifest();
        println!(
            "  {:<12} {} ({} checks, {} pts)",
            preset.name(),
            preset.description(),
            manifest.checks.len(),
            manifest.total_points()
        );
    }
    Ok(())
}

fn print_report_summary(report: &Report) {
    let status = if report.passed() { "✓" } else { "✗" };
    println!(
        "Ralph: {} {} at {}/100 (threshold {}) after {} iteration(s)",
        status, report.verdict, report.final_score, report.passing_threshold, report.iterations
    );
    for issue in report.remaining_issues.iter().take(10) {
        println!("  - [{}] {}: {}", issue.severity, issue.category, issue.message);
    }
    if report.remaining_issues.len() > 10 {
        println!("  ... {} more", report.remaining_issues.len() - 10);
    }
}
