//! Wall-clock budget for one validation request.

use std::time::{Duration, Instant};

use crate::core::types::RejectReason;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration, RejectReason> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(RejectReason::DeadlineExceeded);
    }
    Ok(remaining)
}

/// Clamp a collaborator timeout to the remaining budget.
pub fn bounded_timeout(timeout: Duration, deadline: Option<Instant>) -> Result<Duration, RejectReason> {
    match deadline {
        Some(deadline) => Ok(timeout.min(remaining_budget(deadline)?)),
        None => Ok(timeout),
    }
}
