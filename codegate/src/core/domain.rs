//! Shallow textual contract for Spark jobs.
//!
//! This only guards against degenerate oracle output (an unrelated snippet);
//! it is not a correctness proof.

use serde::{Deserialize, Serialize};

use crate::core::types::RejectReason;

/// Markers that must appear in a generated job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DomainContract {
    /// Text that shows the processing session is instantiated.
    pub session_marker: String,
    /// At least one of these must appear (a read/input operation).
    pub read_markers: Vec<String>,
}

impl Default for DomainContract {
    fn default() -> Self {
        Self {
            session_marker: "SparkSession".to_string(),
            read_markers: vec!["read.".to_string()],
        }
    }
}

impl DomainContract {
    pub fn check(&self, code: &str) -> Result<(), RejectReason> {
        if !code.contains(&self.session_marker) {
            return Err(RejectReason::DomainContract(format!(
                "missing {}; not a valid Spark job",
                self.session_marker
            )));
        }
        if !self.read_markers.iter().any(|marker| code.contains(marker)) {
            return Err(RejectReason::DomainContract(
                "Spark job is missing DataFrame read operations".to_string(),
            ));
        }
        Ok(())
    }
}
