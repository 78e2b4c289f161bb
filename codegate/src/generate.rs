//! Generation entry: ask the oracle for a job, then validate and repair it.

use tracing::{info, instrument};

use crate::core::types::{RejectReason, ValidationOutcome};
use crate::io::lint::Linter;
use crate::io::oracle::Oracle;
use crate::repair::{RepairOrchestrator, RepairReport};

/// Render the generation prompt for `instruction`, obtain the first artifact
/// and run it through the repair loop.
///
/// A failed first oracle call is reported with `attempts = 0`. The deadline
/// covers the first call as well as every later pass.
#[instrument(skip_all, fields(instruction_bytes = instruction.len()))]
pub fn generate_job<O: Oracle, L: Linter>(
    orchestrator: &RepairOrchestrator<'_, O, L>,
    instruction: &str,
) -> RepairReport {
    let deadline = orchestrator.start_deadline();
    let first = orchestrator
        .prompts()
        .render_generate(instruction)
        .map_err(|err| RejectReason::Oracle(format!("{err:#}")))
        .and_then(|prompt| orchestrator.ask(prompt, deadline));

    match first {
        Ok(artifact) => {
            info!(reply_bytes = artifact.len(), "received first artifact");
            orchestrator.validate_until(artifact, deadline)
        }
        Err(reason) => RepairReport {
            outcome: ValidationOutcome::FatalRejected(reason),
            attempts: 0,
            repair_requests: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DomainContract;
    use crate::core::policy::ForbiddenPolicy;
    use crate::pipeline::Pipeline;
    use crate::repair::RepairSettings;
    use crate::test_support::{CLEAN_JOB, ScriptedLinter, ScriptedOracle, fenced, lint_limits};

    #[test]
    fn first_prompt_carries_instruction() {
        let oracle = ScriptedOracle::new([fenced(CLEAN_JOB)]);
        let linter = ScriptedLinter::clean();
        let policy = ForbiddenPolicy::default();
        let domain = DomainContract::default();
        let orchestrator = RepairOrchestrator::new(
            &oracle,
            Pipeline::new(&policy, &domain, &linter, lint_limits()),
            RepairSettings::default(),
        )
        .expect("orchestrator");

        let report = generate_job(&orchestrator, "Aggregate users by department.");
        assert!(matches!(report.outcome, ValidationOutcome::Accepted { .. }));
        assert_eq!(report.attempts, 1);
        let prompts = oracle.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Aggregate users by department."));
    }

    #[test]
    fn failed_first_call_reports_zero_attempts() {
        let oracle = ScriptedOracle::failing("ollama error 500: model not found");
        let linter = ScriptedLinter::clean();
        let policy = ForbiddenPolicy::default();
        let domain = DomainContract::default();
        let orchestrator = RepairOrchestrator::new(
            &oracle,
            Pipeline::new(&policy, &domain, &linter, lint_limits()),
            RepairSettings::default(),
        )
        .expect("orchestrator");

        let report = generate_job(&orchestrator, "anything");
        assert_eq!(report.attempts, 0);
        assert_eq!(
            report.outcome,
            ValidationOutcome::FatalRejected(RejectReason::Oracle(
                "ollama error 500: model not found".to_string()
            ))
        );
        assert_eq!(linter.calls(), 0);
    }
}
