//! One pass of the validation state machine over one oracle artifact.
//!
//! `Extracted -> SyntaxChecked -> SafetyChecked -> DomainChecked -> Linted`,
//! ending in `Accepted`, `NeedsRepair` or `FatalRejected`. Each pass parses
//! from scratch; nothing is carried between passes except the policy.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::budget::bounded_timeout;
use crate::core::domain::DomainContract;
use crate::core::extract::extract;
use crate::core::policy::ForbiddenPolicy;
use crate::core::safety::SafetyChecker;
use crate::core::syntax::parse;
use crate::core::types::{RejectReason, ValidationOutcome};
use crate::io::lint::{LintAdapter, Linter};
use crate::io::process::CommandLimits;

/// Pipeline stage reached by a pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracted,
    SyntaxChecked,
    SafetyChecked,
    DomainChecked,
    Linted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Extracted => "extracted",
            Stage::SyntaxChecked => "syntax_checked",
            Stage::SafetyChecked => "safety_checked",
            Stage::DomainChecked => "domain_checked",
            Stage::Linted => "linted",
        };
        f.write_str(label)
    }
}

/// The checks applied to every artifact, in order.
pub struct Pipeline<'a, L: Linter> {
    policy: &'a ForbiddenPolicy,
    domain: &'a DomainContract,
    lint: LintAdapter<'a, L>,
    lint_timeout: Duration,
}

impl<'a, L: Linter> Pipeline<'a, L> {
    pub fn new(
        policy: &'a ForbiddenPolicy,
        domain: &'a DomainContract,
        linter: &'a L,
        lint_limits: CommandLimits,
    ) -> Self {
        Self {
            policy,
            domain,
            lint: LintAdapter::new(linter, lint_limits),
            lint_timeout: lint_limits.timeout,
        }
    }

    /// Run every stage on `artifact`. The linter only runs once the code is
    /// known to parse, to be safe and to look like a Spark job.
    #[instrument(skip_all, fields(artifact_bytes = artifact.len()))]
    pub fn run_pass(&self, artifact: &str, deadline: Option<Instant>) -> ValidationOutcome {
        match self.try_pass(artifact, deadline) {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(reason = %reason, "artifact rejected");
                ValidationOutcome::FatalRejected(reason)
            }
        }
    }

    fn try_pass(
        &self,
        artifact: &str,
        deadline: Option<Instant>,
    ) -> Result<ValidationOutcome, RejectReason> {
        let code = extract(artifact)?;
        debug!(stage = %Stage::Extracted, "stage complete");

        let tree = parse(code.as_str())?;
        debug!(stage = %Stage::SyntaxChecked, "stage complete");

        SafetyChecker::new(self.policy).check(&tree)?;
        drop(tree);
        debug!(stage = %Stage::SafetyChecked, "stage complete");

        self.domain.check(code.as_str())?;
        debug!(stage = %Stage::DomainChecked, "stage complete");

        let timeout = bounded_timeout(self.lint_timeout, deadline)?;
        let lint = self.lint.lint(code.as_str(), timeout)?;
        debug!(stage = %Stage::Linted, passed = lint.passed(), "stage complete");

        if lint.passed() {
            info!("artifact accepted");
            Ok(ValidationOutcome::Accepted { code })
        } else {
            Ok(ValidationOutcome::NeedsRepair {
                code,
                diagnostics: lint.diagnostics().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ViolationKind;
    use crate::test_support::{CLEAN_JOB, ScriptedLinter, fenced, lint_limits};

    fn run(artifact: &str, linter: &ScriptedLinter) -> ValidationOutcome {
        let policy = ForbiddenPolicy::default();
        let domain = DomainContract::default();
        Pipeline::new(&policy, &domain, linter, lint_limits()).run_pass(artifact, None)
    }

    #[test]
    fn clean_job_is_accepted() {
        let linter = ScriptedLinter::clean();
        let outcome = run(&fenced(CLEAN_JOB), &linter);
        assert!(matches!(outcome, ValidationOutcome::Accepted { ref code } if code.as_str() == CLEAN_JOB.trim()));
        assert_eq!(linter.calls(), 1);
    }

    #[test]
    fn policy_violation_skips_later_stages() {
        let linter = ScriptedLinter::clean();
        let outcome = run(&fenced("import os\nos.system(\"rm -rf /\")\n"), &linter);
        match outcome {
            ValidationOutcome::FatalRejected(RejectReason::Policy(violation)) => {
                assert_eq!(violation.kind, ViolationKind::ForbiddenImport);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(linter.calls(), 0);
    }

    #[test]
    fn missing_read_is_rejected_regardless_of_lint() {
        let linter = ScriptedLinter::clean();
        let code = "from pyspark.sql import SparkSession\n\nspark = SparkSession.builder.getOrCreate()\nspark.stop()\n";
        let outcome = run(&fenced(code), &linter);
        assert!(matches!(
            outcome,
            ValidationOutcome::FatalRejected(RejectReason::DomainContract(_))
        ));
        assert_eq!(linter.calls(), 0);
    }

    #[test]
    fn lint_findings_need_repair() {
        let linter = ScriptedLinter::new(vec![ScriptedLinter::findings("F401 unused import")]);
        let outcome = run(&fenced(CLEAN_JOB), &linter);
        assert_eq!(
            outcome,
            ValidationOutcome::NeedsRepair {
                code: extract(&fenced(CLEAN_JOB)).expect("extract"),
                diagnostics: "F401 unused import".to_string(),
            }
        );
    }

    #[test]
    fn code_the_compiler_rejects_never_reaches_lint() {
        for extra in ["f() = 1", "return 1", "break", "del f()", "x = yield 1"] {
            let linter = ScriptedLinter::new(vec![ScriptedLinter::findings("E999")]);
            let code = format!("{}\n{extra}\n", CLEAN_JOB.trim());
            let outcome = run(&fenced(&code), &linter);
            assert!(
                matches!(
                    outcome,
                    ValidationOutcome::FatalRejected(RejectReason::Compile { .. })
                ),
                "{extra}: {outcome:?}"
            );
            assert_eq!(linter.calls(), 0, "{extra}");
        }
    }

    #[test]
    fn stage_labels_follow_pass_order() {
        let labels: Vec<String> = [
            Stage::Extracted,
            Stage::SyntaxChecked,
            Stage::SafetyChecked,
            Stage::DomainChecked,
            Stage::Linted,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(
            labels,
            [
                "extracted",
                "syntax_checked",
                "safety_checked",
                "domain_checked",
                "linted"
            ]
        );
    }

    #[test]
    fn expired_deadline_rejects_before_lint() {
        let linter = ScriptedLinter::clean();
        let policy = ForbiddenPolicy::default();
        let domain = DomainContract::default();
        let outcome = Pipeline::new(&policy, &domain, &linter, lint_limits())
            .run_pass(&fenced(CLEAN_JOB), Some(Instant::now()));
        assert_eq!(
            outcome,
            ValidationOutcome::FatalRejected(RejectReason::DeadlineExceeded)
        );
        assert_eq!(linter.calls(), 0);
    }
}
