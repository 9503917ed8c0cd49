//! Per-statement retry state and the bounded backoff policy.
//!
//! A [`ReqContext`] is created once per top-level UPDATE and passed by `&mut`
//! through every layer that needs it. It is never shared between statements.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};

static NEXT_TRACE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Error class a wait is taken for; each has its own growth curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Shard ownership moved; wait for the new topology to settle.
    RouteChange,
}

impl BackoffKind {
    fn base(self) -> Duration {
        match self {
            BackoffKind::RouteChange => Duration::from_millis(2),
        }
    }

    fn cap(self) -> Duration {
        match self {
            BackoffKind::RouteChange => Duration::from_millis(500),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackoffKind::RouteChange => "route_change",
        }
    }
}

/// Tracks cumulative sleep for one logical operation against a fixed budget.
#[derive(Debug)]
pub struct Backoffer {
    max_total: Duration,
    slept: Duration,
    attempts: u32,
}

impl Backoffer {
    pub fn new(max_total: Duration) -> Self {
        Self {
            max_total,
            slept: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn slept(&self) -> Duration {
        self.slept
    }

    /// Exponential delay with equal jitter: half fixed, half random.
    fn next_delay(&self, kind: BackoffKind) -> Duration {
        let exp = 1u32 << self.attempts.min(16);
        let ceiling = kind.base().saturating_mul(exp).min(kind.cap());
        let half = ceiling / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }

    /// Waits before the next attempt; `None` once the budget would be exceeded.
    async fn wait(&mut self, kind: BackoffKind) -> Option<Duration> {
        let delay = self.next_delay(kind);
        if self.slept.saturating_add(delay) > self.max_total {
            return None;
        }
        tokio::time::sleep(delay).await;
        self.slept += delay;
        self.attempts = self.attempts.saturating_add(1);
        Some(delay)
    }
}

/// Retry state and trace identity for one top-level statement.
#[derive(Debug)]
pub struct ReqContext {
    trace: String,
    backoffer: Backoffer,
}

impl ReqContext {
    /// Fresh context with a unique `op-N` trace id and a full backoff budget.
    pub fn new(op: &str, max_backoff: Duration) -> Self {
        let seq = NEXT_TRACE_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            trace: format!("{op}-{seq}"),
            backoffer: Backoffer::new(max_backoff),
        }
    }

    pub fn trace(&self) -> &str {
        &self.trace
    }

    /// Number of completed backoff waits, i.e. retries granted so far.
    pub fn retries(&self) -> u32 {
        self.backoffer.attempts()
    }

    pub fn backoffer(&self) -> &Backoffer {
        &self.backoffer
    }

    /// Sleeps before retrying after `cause`, or fails with [`GatewayError::Timeout`]
    /// when the statement's backoff budget is exhausted.
    pub async fn backoff(&mut self, kind: BackoffKind, cause: &GatewayError) -> GatewayResult<()> {
        match self.backoffer.wait(kind).await {
            Some(delay) => {
                debug!(
                    trace = %self.trace,
                    kind = kind.as_str(),
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.backoffer.attempts(),
                    cause = %cause,
                    "backoff before retry"
                );
                Ok(())
            }
            None => Err(GatewayError::Timeout {
                trace: self.trace.clone(),
                attempts: self.backoffer.attempts(),
                slept_ms: self.backoffer.slept().as_millis() as u64,
            }),
        }
    }
}

impl fmt::Display for ReqContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace)
    }
}
