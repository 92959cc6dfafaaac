// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tracing::*;

/// Bounded backoff for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Runs a read-modify-write cycle until it succeeds, fails with anything other than
/// a conflict, or runs out of attempts. `op` must re-read the object it writes on
/// every call so that each attempt recomputes from the latest version.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() => {
                if attempt >= attempts {
                    warn!("Writing {} still conflicts after {} attempts", what, attempt);
                    return Err(Error::ConflictRetriesExhausted {
                        what: what.to_string(),
                        attempts: attempt,
                    });
                }
                debug!("Conflict writing {} (attempt {}), retrying", what, attempt);
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
