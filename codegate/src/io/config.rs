//! Gate configuration stored in `codegate.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::domain::DomainContract;
use crate::core::policy::ForbiddenPolicy;
use crate::io::process::CommandLimits;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "codegate.toml";

/// Gate configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// gate ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Pipeline passes per validation request, counting the first artifact.
    pub max_attempts: u32,

    /// Wall-clock budget for one validation request (oracle + linter calls).
    /// `0` disables the deadline.
    pub pipeline_timeout_secs: u64,

    pub lint: LintConfig,
    pub oracle: OracleConfig,
    pub domain: DomainContract,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LintConfig {
    /// Linter command; the temporary file path is appended as the last argument.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "ruff".to_string(),
                "check".to_string(),
                "--quiet".to_string(),
            ],
            timeout_secs: 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl LintConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// Ollama `/api/generate` over HTTP.
    Ollama,
    /// Any command that reads the prompt on stdin and replies on stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    pub url: String,
    pub model: String,
    /// Used when `backend = "command"`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Ollama,
            url: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            command: Vec::new(),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl OracleConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

/// Additions to the built-in denylist. Built-in entries cannot be removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub extra_names: Vec<String>,
    pub extra_modules: Vec<String>,
    pub extra_attributes: Vec<String>,
}

impl PolicyConfig {
    pub fn build_policy(&self) -> ForbiddenPolicy {
        ForbiddenPolicy::builder()
            .names(self.extra_names.iter().cloned())
            .modules(self.extra_modules.iter().cloned())
            .attributes(self.extra_attributes.iter().cloned())
            .build()
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pipeline_timeout_secs: 10 * 60,
            lint: LintConfig::default(),
            oracle: OracleConfig::default(),
            domain: DomainContract::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if is_blank_command(&self.lint.command) {
            return Err(anyhow!("lint.command must be a non-empty array"));
        }
        if self.lint.timeout_secs == 0 {
            return Err(anyhow!("lint.timeout_secs must be > 0"));
        }
        if self.lint.output_limit_bytes == 0 {
            return Err(anyhow!("lint.output_limit_bytes must be > 0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        match self.oracle.backend {
            OracleBackend::Ollama => {
                if self.oracle.url.trim().is_empty() {
                    return Err(anyhow!("oracle.url must be set for the ollama backend"));
                }
                if self.oracle.model.trim().is_empty() {
                    return Err(anyhow!("oracle.model must be set for the ollama backend"));
                }
            }
            OracleBackend::Command => {
                if is_blank_command(&self.oracle.command) {
                    return Err(anyhow!(
                        "oracle.command must be a non-empty array for the command backend"
                    ));
                }
            }
        }
        if self.domain.session_marker.trim().is_empty() {
            return Err(anyhow!("domain.session_marker must not be empty"));
        }
        if self.domain.read_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(anyhow!("domain.read_markers must contain a non-empty marker"));
        }
        Ok(())
    }

    pub fn pipeline_timeout(&self) -> Option<Duration> {
        (self.pipeline_timeout_secs > 0).then(|| Duration::from_secs(self.pipeline_timeout_secs))
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let tmp_path = path.with_extension("toml.tmp");
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GateConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codegate.toml");
        let cfg = GateConfig {
            max_attempts: 5,
            policy: PolicyConfig {
                extra_modules: vec!["ctypes".to_string()],
                ..PolicyConfig::default()
            },
            ..GateConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codegate.toml");
        fs::write(
            &path,
            "max_attempts = 2\n[oracle]\nbackend = \"command\"\ncommand = [\"llm\", \"-m\", \"x\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.oracle.backend, OracleBackend::Command);
        assert_eq!(cfg.lint, LintConfig::default());
        assert_eq!(cfg.domain.session_marker, "SparkSession");
    }

    #[test]
    fn rejects_zero_attempts_and_empty_commands() {
        let cfg = GateConfig {
            max_attempts: 0,
            ..GateConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = GateConfig::default();
        cfg.lint.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = GateConfig::default();
        cfg.oracle.backend = OracleBackend::Command;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_section_extends_denylist() {
        let cfg = PolicyConfig {
            extra_names: vec!["breakpoint".to_string()],
            ..PolicyConfig::default()
        };
        let policy = cfg.build_policy();
        assert!(policy.is_forbidden_name("breakpoint"));
        assert!(policy.is_forbidden_name("eval"));
    }
}
