//! Validation gate for LLM-generated PySpark jobs.
//!
//! `check` runs one pipeline pass over a supplied oracle reply, `validate`
//! adds the repair loop, and `generate` asks the oracle for the first reply
//! itself. Accepted code goes to stdout; everything else goes to stderr.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use codegate::core::types::ValidationOutcome;
use codegate::exit_codes;
use codegate::generate::generate_job;
use codegate::io::config::{DEFAULT_CONFIG_FILE, GateConfig, load_config, write_config};
use codegate::io::lint::CommandLinter;
use codegate::io::oracle::ConfiguredOracle;
use codegate::logging;
use codegate::pipeline::Pipeline;
use codegate::repair::{RepairOrchestrator, RepairReport, RepairSettings};

#[derive(Parser)]
#[command(
    name = "codegate",
    version,
    about = "Validate and repair LLM-generated PySpark jobs"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Ask the oracle for a job and validate it, repairing lint issues.
    Generate {
        /// Natural-language description of the job.
        #[arg(long)]
        instruction: String,
        #[command(flatten)]
        oracle: OracleArgs,
    },
    /// Validate an oracle reply, repairing lint issues with the oracle.
    Validate {
        /// File holding the reply, or `-` for stdin.
        artifact: PathBuf,
        #[command(flatten)]
        oracle: OracleArgs,
    },
    /// Run one validation pass over an oracle reply without repairs.
    Check {
        /// File holding the reply, or `-` for stdin.
        artifact: PathBuf,
    },
}

#[derive(Args)]
struct OracleArgs {
    /// Ollama generate endpoint.
    #[arg(long, env = "OLLAMA_URL")]
    ollama_url: Option<String>,
    /// Ollama model name.
    #[arg(long, env = "MODEL")]
    model: Option<String>,
}

impl OracleArgs {
    fn apply(self, cfg: &mut GateConfig) -> Result<()> {
        if let Some(url) = self.ollama_url {
            cfg.oracle.url = url;
        }
        if let Some(model) = self.model {
            cfg.oracle.model = model;
        }
        cfg.validate().context("invalid oracle overrides")
    }
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Generate {
            instruction,
            oracle,
        } => cmd_generate(&cli.config, &instruction, oracle),
        Command::Validate { artifact, oracle } => cmd_validate(&cli.config, &artifact, oracle),
        Command::Check { artifact } => cmd_check(&cli.config, &artifact),
    }
}

fn cmd_init(config: &Path, force: bool) -> Result<i32> {
    if !force && config.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config.display()
        );
    }
    write_config(config, &GateConfig::default())?;
    eprintln!("wrote {}", config.display());
    Ok(exit_codes::OK)
}

fn cmd_check(config: &Path, artifact: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let artifact = read_artifact(artifact)?;
    let policy = cfg.policy.build_policy();
    let linter = CommandLinter::new(cfg.lint.command.clone());
    let pipeline = Pipeline::new(&policy, &cfg.domain, &linter, cfg.lint.limits());
    let deadline = cfg.pipeline_timeout().map(|timeout| Instant::now() + timeout);
    Ok(emit(pipeline.run_pass(&artifact, deadline)))
}

fn cmd_validate(config: &Path, artifact: &Path, overrides: OracleArgs) -> Result<i32> {
    let mut cfg = load_config(config)?;
    overrides.apply(&mut cfg)?;
    let artifact = read_artifact(artifact)?;
    with_orchestrator(&cfg, |orchestrator| orchestrator.validate(&artifact))
}

fn cmd_generate(config: &Path, instruction: &str, overrides: OracleArgs) -> Result<i32> {
    if instruction.trim().is_empty() {
        bail!("--instruction must not be empty");
    }
    let mut cfg = load_config(config)?;
    overrides.apply(&mut cfg)?;
    with_orchestrator(&cfg, |orchestrator| generate_job(orchestrator, instruction))
}

/// Wire the configured oracle and linter into an orchestrator, run `f` and
/// report its outcome.
fn with_orchestrator<F>(cfg: &GateConfig, f: F) -> Result<i32>
where
    F: FnOnce(&RepairOrchestrator<'_, ConfiguredOracle, CommandLinter>) -> RepairReport,
{
    let policy = cfg.policy.build_policy();
    let linter = CommandLinter::new(cfg.lint.command.clone());
    let oracle = ConfiguredOracle::from_config(&cfg.oracle)?;
    let pipeline = Pipeline::new(&policy, &cfg.domain, &linter, cfg.lint.limits());
    let settings = RepairSettings {
        max_attempts: cfg.max_attempts,
        oracle_timeout: Duration::from_secs(cfg.oracle.timeout_secs),
        pipeline_timeout: cfg.pipeline_timeout(),
    };
    let orchestrator = RepairOrchestrator::new(&oracle, pipeline, settings)?;

    let report = f(&orchestrator);
    info!(
        outcome = report.outcome.label(),
        attempts = report.attempts,
        repair_requests = report.repair_requests,
        "validation finished"
    );
    Ok(emit(report.outcome))
}

/// Print an outcome and map it to an exit code.
fn emit(outcome: ValidationOutcome) -> i32 {
    match outcome {
        ValidationOutcome::Accepted { code } => {
            println!("{code}");
            exit_codes::OK
        }
        ValidationOutcome::NeedsRepair { diagnostics, .. } => {
            eprintln!("lint issues found:\n{}", diagnostics.trim_end());
            exit_codes::NEEDS_REPAIR
        }
        ValidationOutcome::FatalRejected(reason) => {
            eprintln!("rejected: {reason}");
            exit_codes::REJECTED
        }
    }
}

fn read_artifact(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read artifact from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
