//! Oracle abstraction for code generation.
//!
//! The [`Oracle`] trait decouples the repair loop from the generator backend.
//! Production backends are the Ollama HTTP API and an arbitrary command that
//! reads the prompt on stdin. Tests use scripted oracles.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{OracleBackend, OracleConfig};
use crate::io::process::{CommandLimits, run_command};

/// Parameters for one oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub prompt: String,
    pub timeout: Duration,
}

/// Untrusted code generator.
pub trait Oracle {
    /// Return the raw reply text for `request.prompt`.
    fn generate(&self, request: &OracleRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
}

/// Oracle backed by Ollama's `/api/generate` endpoint.
pub struct OllamaOracle {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl OllamaOracle {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
        })
    }
}

impl Oracle for OllamaOracle {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &OracleRequest) -> Result<String> {
        info!(url = %self.url, "querying ollama");
        let response = self
            .client
            .post(&self.url)
            .timeout(request.timeout)
            .json(&GeneratePayload {
                model: &self.model,
                prompt: &request.prompt,
                stream: false,
            })
            .send()
            .with_context(|| format!("POST {}", self.url))?;

        let status = response.status();
        let body = response.text().context("read ollama response body")?;
        if !status.is_success() {
            warn!(%status, "ollama returned an error status");
            bail!("ollama error {status}: {}", body.trim());
        }
        let reply = parse_generate_body(&body)?;
        debug!(reply_bytes = reply.len(), "ollama reply");
        Ok(reply)
    }
}

/// Parse a `/api/generate` body.
///
/// With `stream: false` the body is one JSON object, but some servers still
/// answer with line-delimited chunks; those are concatenated in order.
fn parse_generate_body(body: &str) -> Result<String> {
    if let Ok(chunk) = serde_json::from_str::<GenerateChunk>(body) {
        return Ok(chunk.response.trim().to_string());
    }

    let mut reply = String::new();
    for (idx, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let chunk: GenerateChunk = serde_json::from_str(line)
            .with_context(|| format!("parse ollama response line {}", idx + 1))?;
        reply.push_str(&chunk.response);
    }
    Ok(reply.trim().to_string())
}

/// Oracle that pipes the prompt into a command and reads the reply from stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &OracleRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .context("oracle command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = run_command(
            cmd,
            Some(request.prompt.as_bytes()),
            CommandLimits {
                timeout: request.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
        .with_context(|| format!("run oracle {program}"))?;

        if output.timed_out {
            return Err(anyhow!("oracle timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "oracle failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            bail!("oracle reply exceeded {} bytes", self.output_limit_bytes);
        }
        Ok(output.stdout_text())
    }
}

/// Oracle selected by `[oracle] backend`.
pub enum ConfiguredOracle {
    Ollama(OllamaOracle),
    Command(CommandOracle),
}

impl ConfiguredOracle {
    pub fn from_config(cfg: &OracleConfig) -> Result<Self> {
        Ok(match cfg.backend {
            OracleBackend::Ollama => Self::Ollama(OllamaOracle::new(&cfg.url, &cfg.model)?),
            OracleBackend::Command => Self::Command(CommandOracle::new(
                cfg.command.clone(),
                cfg.output_limit_bytes,
            )),
        })
    }
}

impl Oracle for ConfiguredOracle {
    fn generate(&self, request: &OracleRequest) -> Result<String> {
        match self {
            Self::Ollama(oracle) => oracle.generate(request),
            Self::Command(oracle) => oracle.generate(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_object_body() {
        let body = r#"{"model":"m","response":"  ```python\nx = 1\n```  ","done":true}"#;
        assert_eq!(
            parse_generate_body(body).expect("parse"),
            "```python\nx = 1\n```"
        );
    }

    #[test]
    fn concatenates_line_delimited_chunks() {
        let body = "{\"response\":\"```py\"}\n\n{\"response\":\"thon\\nx = 1\\n\"}\n{\"response\":\"```\",\"done\":true}\n";
        assert_eq!(
            parse_generate_body(body).expect("parse"),
            "```python\nx = 1\n```"
        );
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = parse_generate_body("<html>bad gateway</html>").unwrap_err();
        assert!(format!("{err:#}").contains("parse ollama response line 1"));
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_pipes_prompt() {
        let oracle = CommandOracle::new(vec!["cat".to_string()], 1024);
        let reply = oracle
            .generate(&OracleRequest {
                prompt: "echo me".to_string(),
                timeout: Duration::from_secs(10),
            })
            .expect("generate");
        assert_eq!(reply, "echo me");
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_failure_is_an_error() {
        let oracle = CommandOracle::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo down >&2; exit 7".to_string(),
            ],
            1024,
        );
        let err = oracle
            .generate(&OracleRequest {
                prompt: String::new(),
                timeout: Duration::from_secs(10),
            })
            .unwrap_err();
        assert!(err.to_string().contains("status Some(7)"));
        assert!(err.to_string().contains("down"));
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_timeout_holds_when_prompt_is_never_read() {
        let oracle = CommandOracle::new(
            vec!["sh".to_string(), "-c".to_string(), "exec sleep 4".to_string()],
            1024,
        );
        let started = std::time::Instant::now();
        let err = oracle
            .generate(&OracleRequest {
                prompt: "x".repeat(1024 * 1024),
                timeout: Duration::from_millis(200),
            })
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err:#}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
