//! Linter adapter.
//!
//! The [`Linter`] trait decouples the pipeline from the actual lint tool
//! (`ruff` by default). Tests use scripted linters that return predetermined
//! exit codes and diagnostics without spawning processes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{LintDiagnostic, RejectReason};
use crate::io::process::{CommandLimits, run_command};

/// Parameters for one linter invocation.
#[derive(Debug, Clone)]
pub struct LintRequest {
    /// Temporary `.py` file holding the candidate code.
    pub path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Raw result of a linter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintRun {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub timed_out: bool,
}

/// Abstraction over lint tools.
pub trait Linter {
    fn check(&self, request: &LintRequest) -> Result<LintRun>;
}

/// Linter that runs a configured command with the file path appended.
#[derive(Debug, Clone)]
pub struct CommandLinter {
    command: Vec<String>,
}

impl CommandLinter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Linter for CommandLinter {
    #[instrument(skip_all, fields(path = %request.path.display()))]
    fn check(&self, request: &LintRequest) -> Result<LintRun> {
        let (program, args) = self
            .command
            .split_first()
            .context("lint command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(&request.path);

        let output = run_command(
            cmd,
            None,
            CommandLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
            },
        )
        .with_context(|| format!("run linter {program}"))?;

        let stderr = output.stderr_text();
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "linter stderr");
        }
        if output.stdout_truncated > 0 {
            warn!(
                dropped = output.stdout_truncated,
                "linter diagnostics exceeded the output limit"
            );
        }
        let mut stdout = output.stdout_text();
        stdout.push_str(&output.stdout_truncated_notice("linter"));
        Ok(LintRun {
            exit_code: output.status.code(),
            stdout,
            timed_out: output.timed_out,
        })
    }
}

/// Writes candidate code to a temporary file and interprets the linter's verdict.
pub struct LintAdapter<'a, L: Linter> {
    linter: &'a L,
    limits: CommandLimits,
}

impl<'a, L: Linter> LintAdapter<'a, L> {
    pub fn new(linter: &'a L, limits: CommandLimits) -> Self {
        Self { linter, limits }
    }

    /// Lint `code` within `timeout`.
    ///
    /// Exit 0 passes with empty diagnostics. A non-zero exit with output is a
    /// repairable failure. A non-zero exit without output, a timeout, or a
    /// tool that cannot run is a `LintTool` rejection: there is nothing for
    /// the oracle to fix.
    #[instrument(skip_all, fields(bytes = code.len()))]
    pub fn lint(&self, code: &str, timeout: Duration) -> Result<LintDiagnostic, RejectReason> {
        let run = self
            .run_on_temp_file(code, timeout)
            .map_err(|err| RejectReason::LintTool(format!("{err:#}")))?;

        if run.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "linter timed out");
            return Err(RejectReason::LintTool(format!(
                "linter timed out after {timeout:?}"
            )));
        }
        match run.exit_code {
            Some(0) => {
                info!("linter clean");
                Ok(LintDiagnostic::pass())
            }
            code if run.stdout.trim().is_empty() => {
                warn!(exit_code = ?code, "linter failed without diagnostics");
                Err(RejectReason::LintTool(format!(
                    "linter exited with status {code:?} and no diagnostics"
                )))
            }
            code => {
                info!(exit_code = ?code, diagnostics = %run.stdout.trim_end(), "lint findings");
                Ok(LintDiagnostic::fail(run.stdout))
            }
        }
    }

    fn run_on_temp_file(&self, code: &str, timeout: Duration) -> Result<LintRun> {
        let mut file = tempfile::Builder::new()
            .prefix("codegate-")
            .suffix(".py")
            .tempfile()
            .context("create temp file for lint")?;
        file.write_all(code.as_bytes())
            .context("write temp file for lint")?;
        if !code.ends_with('\n') {
            // Extracted code is trimmed; restore the final newline.
            file.write_all(b"\n").context("write temp file for lint")?;
        }
        file.flush().context("flush temp file for lint")?;

        let request = LintRequest {
            path: file.path().to_path_buf(),
            timeout: timeout.min(self.limits.timeout),
            output_limit_bytes: self.limits.output_limit_bytes,
        };
        let run = self.linter.check(&request)?;
        Ok(relativize_paths(run, file.path()))
    }
}

/// Replace the random temp path in diagnostics so repair prompts stay stable.
fn relativize_paths(mut run: LintRun, path: &Path) -> LintRun {
    let shown = path.to_string_lossy();
    run.stdout = run.stdout.replace(shown.as_ref(), "job.py");
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    struct FakeLinter {
        run: LintRun,
        seen: RefCell<Option<String>>,
    }

    impl FakeLinter {
        fn new(exit_code: Option<i32>, stdout: &str) -> Self {
            Self {
                run: LintRun {
                    exit_code,
                    stdout: stdout.to_string(),
                    timed_out: false,
                },
                seen: RefCell::new(None),
            }
        }
    }

    impl Linter for FakeLinter {
        fn check(&self, request: &LintRequest) -> Result<LintRun> {
            *self.seen.borrow_mut() = Some(fs::read_to_string(&request.path)?);
            let mut run = self.run.clone();
            run.stdout = run.stdout.replace("{path}", &request.path.to_string_lossy());
            Ok(run)
        }
    }

    fn limits() -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn exit_zero_passes_and_file_holds_code() {
        let linter = FakeLinter::new(Some(0), "");
        let lint = LintAdapter::new(&linter, limits())
            .lint("x = 1", Duration::from_secs(5))
            .expect("lint");
        assert!(lint.passed());
        assert_eq!(linter.seen.borrow().as_deref(), Some("x = 1\n"));
    }

    #[test]
    fn findings_become_diagnostics() {
        let linter = FakeLinter::new(
            Some(1),
            "{path}:1:8: F401 [*] `json` imported but unused\n",
        );
        let lint = LintAdapter::new(&linter, limits())
            .lint("import json\n", Duration::from_secs(5))
            .expect("lint");
        assert!(!lint.passed());
        assert_eq!(
            lint.diagnostics(),
            "job.py:1:8: F401 [*] `json` imported but unused\n"
        );
    }

    #[test]
    fn nonzero_without_output_is_tool_error() {
        let linter = FakeLinter::new(Some(2), "  \n");
        let err = LintAdapter::new(&linter, limits())
            .lint("x = 1\n", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, RejectReason::LintTool(_)));
    }

    #[test]
    fn timeout_is_tool_error() {
        let mut linter = FakeLinter::new(None, "partial");
        linter.run.timed_out = true;
        let err = LintAdapter::new(&linter, limits())
            .lint("x = 1\n", Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn missing_linter_binary_is_tool_error() {
        let linter = CommandLinter::new(vec!["codegate-no-such-linter".to_string()]);
        let err = LintAdapter::new(&linter, limits())
            .lint("x = 1\n", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, RejectReason::LintTool(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_linter_appends_path() {
        let linter = CommandLinter::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "grep -n TODO \"$0\"; test $? -ne 0".to_string(),
        ]);
        let lint = LintAdapter::new(&linter, limits())
            .lint("x = 1  # TODO\n", Duration::from_secs(5))
            .expect("lint");
        assert!(!lint.passed());
        assert_eq!(lint.diagnostics(), "1:x = 1  # TODO\n");
    }

    #[cfg(unix)]
    #[test]
    fn oversized_diagnostics_are_marked_truncated() {
        let linter = CommandLinter::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf 'F401 unused import\nE501 line too long\n'; exit 1".to_string(),
        ]);
        let limits = CommandLimits {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 18,
        };
        let lint = LintAdapter::new(&linter, limits)
            .lint("import json\n", Duration::from_secs(5))
            .expect("lint");
        assert!(!lint.passed());
        assert_eq!(
            lint.diagnostics(),
            "F401 unused import\n[linter stdout truncated 20 bytes]\n"
        );
    }
}
