//! Prompt rendering for generation and repair requests.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::ExtractedSource;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .context("load generate template")?;
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("load repair template")?;
        Ok(Self { env })
    }

    /// First request for a job described by `instruction`.
    pub fn render_generate(&self, instruction: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("generate")?
            .render(context! { instruction => instruction.trim() })
            .context("render generate prompt")?;
        debug!(bytes = rendered.len(), "rendered generate prompt");
        Ok(rendered)
    }

    /// Follow-up request embedding the rejected code and the linter output verbatim.
    pub fn render_repair(&self, code: &ExtractedSource, diagnostics: &str) -> Result<String> {
        let rendered = self
            .env
            .get_template("repair")?
            .render(context! {
                code => code.as_str(),
                diagnostics => diagnostics,
            })
            .context("render repair prompt")?;
        debug!(bytes = rendered.len(), "rendered repair prompt");
        Ok(rendered)
    }
}
