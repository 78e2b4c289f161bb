//! Test-only scripted collaborators and sample artifacts.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::io::lint::{LintRequest, LintRun, Linter};
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::process::CommandLimits;

/// A lint-clean Spark job that passes every check.
pub const CLEAN_JOB: &str = r#"
from pyspark.sql import SparkSession
from pyspark.sql import functions as F

spark = SparkSession.builder.appName("users-by-department").getOrCreate()

# Read the input CSV with a header row.
users = spark.read.option("header", True).csv("users.csv")

counts = users.groupBy("department").agg(F.count("*").alias("users"))
counts.write.mode("overwrite").csv("users_by_department")

spark.stop()
"#;

/// Wrap `code` in a python fence surrounded by prose, like an oracle reply.
pub fn fenced(code: &str) -> String {
    format!("Here is the job:\n\n```python\n{code}\n```\n\nLet me know if you need changes.")
}

pub fn lint_limits() -> CommandLimits {
    CommandLimits {
        timeout: Duration::from_secs(5),
        output_limit_bytes: 10_000,
    }
}

/// Linter that replays queued runs, then reports clean.
#[derive(Debug, Default)]
pub struct ScriptedLinter {
    runs: RefCell<VecDeque<LintRun>>,
    seen: RefCell<Vec<String>>,
}

impl ScriptedLinter {
    pub fn new(runs: Vec<LintRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn clean() -> Self {
        Self::default()
    }

    /// A failing run with `diagnostics` on stdout.
    pub fn findings(diagnostics: &str) -> LintRun {
        LintRun {
            exit_code: Some(1),
            stdout: diagnostics.to_string(),
            timed_out: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.borrow().len()
    }

    /// Code contents of every linted file, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.borrow().clone()
    }
}

impl Linter for ScriptedLinter {
    fn check(&self, request: &LintRequest) -> Result<LintRun> {
        self.seen
            .borrow_mut()
            .push(fs::read_to_string(&request.path)?);
        Ok(self.runs.borrow_mut().pop_front().unwrap_or(LintRun {
            exit_code: Some(0),
            stdout: String::new(),
            timed_out: false,
        }))
    }
}

/// Oracle that replays queued replies (or errors) and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Result<String, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Oracle whose next call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            replies: RefCell::new(VecDeque::from([Err(message.to_string())])),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, request: &OracleRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted oracle exhausted")),
        }
    }
}
