//! Stabilization gate: waits until a file stops changing before it is read.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

use crate::shutdown::ShutdownListener;

#[derive(Debug, Clone, Copy)]
pub struct StabilityPolicy {
    pub delay: Duration,
    /// Extra checks after the first one before the file is declared unstable.
    pub max_retries: u32,
}

impl StabilityPolicy {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityOutcome {
    Stable,
    Vanished,
    /// Still changing after `checks` comparisons.
    Unstable { checks: u32 },
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

async fn snapshot(path: &Path) -> Option<Snapshot> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(Snapshot {
            len: meta.len(),
            modified: meta.modified().ok(),
        }),
        Ok(_) => None,
        Err(e) => {
            trace!("metadata failed for {}: {}", path.display(), e);
            None
        }
    }
}

/// Records size and modification time, sleeps `policy.delay`, and compares.
/// Unchanged means stable; a missing file means vanished. A file that keeps
/// changing for `1 + max_retries` consecutive checks is unstable.
pub async fn await_stable(
    path: &Path,
    policy: StabilityPolicy,
    shutdown: &mut ShutdownListener,
) -> StabilityOutcome {
    let Some(mut previous) = snapshot(path).await else {
        return StabilityOutcome::Vanished;
    };

    let total_checks = policy.max_retries.saturating_add(1);
    for check in 1..=total_checks {
        if !shutdown.sleep(policy.delay).await {
            return StabilityOutcome::Interrupted;
        }

        let Some(current) = snapshot(path).await else {
            return StabilityOutcome::Vanished;
        };

        if current == previous {
            debug!(check, size = current.len, "file is stable");
            return StabilityOutcome::Stable;
        }

        debug!(
            check,
            previous = previous.len,
            current = current.len,
            "file still changing"
        );
        previous = current;
    }

    StabilityOutcome::Unstable {
        checks: total_checks,
    }
}
