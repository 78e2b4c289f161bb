//! Fenced code block extraction from oracle responses.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::types::{ExtractedSource, RejectReason};

static PYTHON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*(?:python3?|py)\b(.*?)```").expect("fence regex should be valid")
});

/// Return the trimmed contents of the last ```python fenced block.
///
/// Repair replies often echo the previous block before the corrected one, so
/// the last block wins. Text without a python fence is rejected, which also
/// means already-extracted code never round-trips through here.
pub fn extract(artifact: &str) -> Result<ExtractedSource, RejectReason> {
    let last = PYTHON_FENCE_RE
        .captures_iter(artifact)
        .filter_map(|caps| caps.get(1))
        .last()
        .ok_or(RejectReason::Extraction)?;

    let code = last.as_str().trim();
    if code.is_empty() {
        return Err(RejectReason::Extraction);
    }
    debug!(bytes = code.len(), "extracted python block");
    Ok(ExtractedSource::new(code.to_string()))
}
