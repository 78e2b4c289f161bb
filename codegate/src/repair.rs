//! Bounded repair loop between the pipeline and the oracle.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::budget::bounded_timeout;
use crate::core::types::{ExtractedSource, RejectReason, ValidationOutcome};
use crate::io::lint::Linter;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::PromptEngine;
use crate::pipeline::Pipeline;

/// Limits for one validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairSettings {
    /// Pipeline passes, counting the first artifact. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Per-call oracle timeout.
    pub oracle_timeout: Duration,
    /// Wall-clock budget for the whole request.
    pub pipeline_timeout: Option<Duration>,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            oracle_timeout: Duration::from_secs(300),
            pipeline_timeout: None,
        }
    }
}

/// Final result of a validation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Always `Accepted` or `FatalRejected`.
    pub outcome: ValidationOutcome,
    /// Pipeline passes run.
    pub attempts: u32,
    /// Repair prompts sent to the oracle.
    pub repair_requests: u32,
}

impl RepairReport {
    fn new(outcome: ValidationOutcome, attempts: u32, repair_requests: u32) -> Self {
        Self {
            outcome,
            attempts,
            repair_requests,
        }
    }
}

/// Runs the pipeline and, on lint findings only, asks the oracle for a fix.
pub struct RepairOrchestrator<'a, O: Oracle, L: Linter> {
    oracle: &'a O,
    pipeline: Pipeline<'a, L>,
    prompts: PromptEngine,
    settings: RepairSettings,
}

impl<'a, O: Oracle, L: Linter> RepairOrchestrator<'a, O, L> {
    pub fn new(oracle: &'a O, pipeline: Pipeline<'a, L>, settings: RepairSettings) -> Result<Self> {
        Ok(Self {
            oracle,
            pipeline,
            prompts: PromptEngine::new()?,
            settings,
        })
    }

    pub(crate) fn prompts(&self) -> &PromptEngine {
        &self.prompts
    }

    /// Deadline for a request starting now.
    pub(crate) fn start_deadline(&self) -> Option<Instant> {
        self.settings
            .pipeline_timeout
            .map(|timeout| Instant::now() + timeout)
    }

    /// Validate `artifact`, repairing lint findings until accepted, rejected
    /// or out of attempts.
    pub fn validate(&self, artifact: &str) -> RepairReport {
        self.validate_until(artifact.to_string(), self.start_deadline())
    }

    #[instrument(skip_all, fields(max_attempts = self.settings.max_attempts))]
    pub(crate) fn validate_until(
        &self,
        first_artifact: String,
        deadline: Option<Instant>,
    ) -> RepairReport {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut artifact = first_artifact;
        let mut repair_requests = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            info!(attempt, "running validation pass");
            let (code, diagnostics) = match self.pipeline.run_pass(&artifact, deadline) {
                ValidationOutcome::NeedsRepair { code, diagnostics } => (code, diagnostics),
                terminal => return RepairReport::new(terminal, attempt, repair_requests),
            };

            if attempt >= max_attempts {
                warn!(attempt, "lint issues remain and attempts are exhausted");
                return RepairReport::new(
                    ValidationOutcome::FatalRejected(RejectReason::MaxAttemptsExceeded {
                        attempts: attempt,
                        diagnostics,
                    }),
                    attempt,
                    repair_requests,
                );
            }

            repair_requests += 1;
            match self.request_repair(&code, &diagnostics, deadline) {
                Ok(reply) => artifact = reply,
                Err(reason) => {
                    return RepairReport::new(
                        ValidationOutcome::FatalRejected(reason),
                        attempt,
                        repair_requests,
                    );
                }
            }
        }
    }

    fn request_repair(
        &self,
        code: &ExtractedSource,
        diagnostics: &str,
        deadline: Option<Instant>,
    ) -> Result<String, RejectReason> {
        let prompt = self
            .prompts
            .render_repair(code, diagnostics)
            .map_err(|err| RejectReason::Oracle(format!("{err:#}")))?;
        info!("requesting repair from oracle");
        self.ask(prompt, deadline)
    }

    /// Send one prompt to the oracle within the remaining budget.
    pub(crate) fn ask(&self, prompt: String, deadline: Option<Instant>) -> Result<String, RejectReason> {
        let timeout = bounded_timeout(self.settings.oracle_timeout, deadline)?;
        self.oracle
            .generate(&OracleRequest { prompt, timeout })
            .map_err(|err| {
                warn!(err = %format!("{err:#}"), "oracle call failed");
                RejectReason::Oracle(format!("{err:#}"))
            })
    }
}
