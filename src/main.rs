//! Stepwise CLI - sequential pipeline runner

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use stepwise::{
    DefaultUploader, FixSuggestion, Pipeline, ProcessExecutor, RunObserver, RunReport, Runner,
    Step, StepExecutor, StepOutcome, StepwiseError, TriggerEvent,
};

/// Exit code for configuration and usage errors
const EXIT_USAGE: u8 = 2;

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Stepwise - sequential build-verification pipeline runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline file
    Run {
        /// Path to the pipeline YAML file
        file: PathBuf,

        /// Trigger event type (push, pull_request). Omit for a manual run.
        #[arg(long, env = "STEPWISE_EVENT")]
        event: Option<String>,

        /// Branch the event refers to
        #[arg(long, env = "STEPWISE_BRANCH")]
        branch: Option<String>,

        /// Directory steps run in (defaults to the current directory)
        #[arg(short = 'C', long)]
        workdir: Option<PathBuf>,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print captured output of every step, not only failing ones
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a pipeline file (parse only)
    Validate {
        /// Path to the pipeline YAML file
        file: PathBuf,
    },

    /// List the steps a run would execute, without running them
    Plan {
        /// Path to the pipeline YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            event,
            branch,
            workdir,
            report,
            verbose,
        } => run_pipeline(&file, event, branch, workdir, report, verbose).await,
        Commands::Validate { file } => validate_pipeline(&file).map(|_| 0),
        Commands::Plan { file } => plan_pipeline(&file).map(|_| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run_pipeline(
    file: &Path,
    event: Option<String>,
    branch: Option<String>,
    workdir: Option<PathBuf>,
    report: Option<PathBuf>,
    verbose: bool,
) -> Result<u8, StepwiseError> {
    let pipeline = Pipeline::load(file)?;

    let trigger = match (event, branch) {
        (Some(event), Some(branch)) => Some(TriggerEvent::new(event.parse()?, branch)),
        (Some(_), None) => return Err(StepwiseError::MissingBranch),
        (None, _) => None,
    };

    if let Some(trigger) = &trigger {
        if !pipeline.accepts(trigger) {
            println!(
                "{} Not triggered: {} on '{}' does not match the pipeline filters",
                "⊘".dimmed(),
                trigger.event_type,
                trigger.branch
            );
            return Ok(0);
        }
    }

    println!(
        "{} Running {} | {} steps ({} tolerant) | {}",
        "→".cyan(),
        pipeline.display_name().cyan().bold(),
        pipeline.steps.len(),
        pipeline.tolerant_steps(),
        trigger
            .as_ref()
            .map(|t| format!("{} on {}", t.event_type, t.branch))
            .unwrap_or_else(|| "manual".to_string())
            .cyan()
    );

    let mut executor = StepExecutor::new(
        Arc::new(ProcessExecutor::new()),
        Arc::new(DefaultUploader::new()),
    )
    .with_env(pipeline.env.clone());
    if let Some(trigger) = &trigger {
        executor = executor.with_env(trigger.env_vars());
    }
    if let Some(dir) = workdir {
        executor = executor.with_base_dir(dir);
    }

    let runner = Runner::new(executor).with_observer(Arc::new(Console { verbose }));
    let mut run = pipeline.to_run();
    let status = runner.execute(&mut run).await;

    let summary = RunReport::from_run(
        pipeline.display_name(),
        trigger.as_ref(),
        &run,
        runner.event_log(),
    );
    let tolerated = run.tolerated_failures().count();
    let verdict = if status.is_success() {
        "✓ Success".green().bold()
    } else {
        "✗ Failed".red().bold()
    };
    println!(
        "{} ({} passed, {} failed, {} tolerated, {} not run)",
        verdict,
        summary.count(stepwise::StepResult::Success),
        summary.count(stepwise::StepResult::Failed),
        tolerated,
        summary.count(stepwise::StepResult::NotRun),
    );

    if let Some(path) = report {
        summary.write_to(&path)?;
        println!("  Report: {}", path.display());
    }

    Ok(status.exit_code())
}

fn validate_pipeline(file: &Path) -> Result<(), StepwiseError> {
    let pipeline = Pipeline::load(file)?;

    println!("{} Pipeline '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", pipeline.display_name());
    println!(
        "  Steps: {} ({} tolerant)",
        pipeline.steps.len(),
        pipeline.tolerant_steps()
    );
    println!(
        "  Triggers: {}",
        if pipeline.trigger.is_some() {
            "filtered"
        } else {
            "any event"
        }
    );

    Ok(())
}

fn plan_pipeline(file: &Path) -> Result<(), StepwiseError> {
    let pipeline = Pipeline::load(file)?;

    println!("{} {}", "Plan:".cyan().bold(), pipeline.display_name());
    for (index, step) in pipeline.steps.iter().enumerate() {
        let policy = if step.continue_on_error {
            "continue on error".yellow()
        } else {
            "halt on error".normal()
        };
        println!(
            "  {:>2}. {} [{}] {}",
            index + 1,
            step.name.bold(),
            policy,
            step.action.describe().dimmed()
        );
    }

    Ok(())
}

/// Live step lines on stdout
struct Console {
    verbose: bool,
}

impl RunObserver for Console {
    fn step_started(&self, index: usize, step: &Step) {
        println!(
            "{} [{}] {} {}",
            "▶".cyan(),
            index + 1,
            step.name.bold(),
            step.action.describe().dimmed()
        );
    }

    fn step_finished(&self, _index: usize, step: &Step, outcome: &StepOutcome) {
        let secs = outcome.duration.as_secs_f64();
        match step.failure() {
            None => println!("  {} {} ({:.1}s)", "✓".green(), step.name, secs),
            Some(failure) => {
                let tag = if step.continue_on_error {
                    "tolerated".yellow()
                } else {
                    "fatal".red()
                };
                println!(
                    "  {} {}: {} ({}, {}, {:.1}s)",
                    "✗".red(),
                    step.name,
                    failure,
                    failure.kind(),
                    tag,
                    secs
                );
            }
        }

        if self.verbose || !outcome.is_success() {
            print_output(&outcome.stdout);
            print_output(&outcome.stderr);
        }
    }

    fn step_skipped(&self, _index: usize, step: &Step) {
        println!("  {} {} (not run)", "○".dimmed(), step.name.dimmed());
    }
}

fn print_output(text: &str) {
    for line in text.lines() {
        println!("    {}", line);
    }
}
