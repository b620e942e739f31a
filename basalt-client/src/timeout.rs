//! Bounded-wait policy for server acknowledgments

use crate::error::{ClientError, Result};
use crate::response::Response;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do when a bounded wait elapses before the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Treat the reply as still pending and proceed anyway (debug log only).
    Ignore,
    /// Proceed, but log a warning.
    Warn,
    /// Surface a `ResponseTimeout` error to the caller.
    Error,
}

/// An immutable wait bound plus the policy applied when it elapses.
///
/// A zero duration disables the bound entirely: `wait_for` then blocks until
/// the server answers. Some operations (telling the server a backup session
/// ended, for example) are fire-and-forget by default; callers that need
/// strict acknowledgment opt into `TimeoutPolicy::Error`.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
    policy: TimeoutPolicy,
}

impl Timeout {
    /// Timeout that waits indefinitely.
    pub const DISABLED: Timeout = Timeout {
        duration: Duration::ZERO,
        policy: TimeoutPolicy::Ignore,
    };

    pub fn new(duration: Duration, policy: TimeoutPolicy) -> Self {
        Self { duration, policy }
    }

    /// Returns true iff a bound is in effect.
    pub fn is_enabled(&self) -> bool {
        !self.duration.is_zero()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    /// Wait for an acknowledgment-only response under this timeout.
    ///
    /// Blocks without bound when disabled. When the bound elapses first, the
    /// policy decides the outcome: `Ignore` and `Warn` report success (the
    /// reply may still arrive; the caller has chosen not to care), `Error`
    /// raises `ResponseTimeout`. Every other error propagates unchanged.
    pub fn wait_for<R>(&self, response: &R) -> Result<()>
    where
        R: Response<()> + ?Sized,
    {
        let result = if self.is_enabled() {
            response.get_timeout(self.duration)
        } else {
            response.get()
        };

        match result {
            Err(ClientError::Timeout(_)) => match self.policy {
                TimeoutPolicy::Ignore => {
                    debug!("no response within {:?}, proceeding", self.duration);
                    Ok(())
                }
                TimeoutPolicy::Warn => {
                    warn!("no response within {:?}, proceeding", self.duration);
                    Ok(())
                }
                TimeoutPolicy::Error => Err(ClientError::ResponseTimeout(self.duration)),
            },
            other => other,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::DISABLED
    }
}
