//! Graceful shutdown orchestration.
//!
//! Runs a fixed, ordered sequence of shutdown steps against a global
//! deadline. Each step gets its own per-attempt timeout and retry budget;
//! a required step that never succeeds fails the whole shutdown, an
//! optional one is logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ShutdownError;

/// A single unit of shutdown work, e.g. "stop accepting new connections".
#[async_trait]
pub trait ShutdownStep: Send + Sync {
    /// Human-readable name, used in logs and [`ShutdownError`].
    fn name(&self) -> &str;

    /// Whether this step's failure fails the overall shutdown.
    fn required(&self) -> bool {
        true
    }

    /// Per-attempt timeout. Exceeding it counts as a failed attempt.
    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Maximum attempts before giving up.
    fn max_attempts(&self) -> u32 {
        3
    }

    /// Execute the step once.
    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Outcome of a single step's execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step name.
    pub name: String,
    /// Whether it ultimately succeeded.
    pub succeeded: bool,
    /// Attempts made.
    pub attempts: u32,
    /// Wall-clock time spent on this step.
    pub elapsed: Duration,
}

/// Overall shutdown result returned by [`ShutdownOrchestrator::perform`].
#[derive(Debug, Clone)]
pub struct ShutdownResult {
    /// Per-step outcomes, in execution order.
    pub steps: Vec<StepOutcome>,
    /// Terminal status of the whole shutdown.
    pub status: ShutdownStatus,
    /// Total wall-clock time spent across all steps.
    pub total_elapsed: Duration,
}

/// Terminal status of a shutdown run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Every required step succeeded within the deadline.
    Completed,
    /// The global deadline elapsed before all required steps finished; the
    /// orchestrator force-completed by abandoning whatever was left.
    Forced,
    /// A required step exhausted its retries and the orchestrator gave up
    /// without forcing (deadline not yet reached, but no point continuing).
    Failed,
}

/// Options controlling a [`ShutdownOrchestrator::perform`] run.
#[derive(Debug, Clone)]
pub struct ShutdownOptions {
    /// Global deadline across every step combined.
    pub global_deadline: Duration,
    /// Fixed delay added between retry attempts (linear backoff).
    pub retry_backoff: Duration,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            global_deadline: Duration::from_secs(30),
            // spec.md §4.2 step 3b: linear backoff of `1s × attempt`.
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Drives a sequence of [`ShutdownStep`]s to completion or forced
/// termination.
pub struct ShutdownOrchestrator {
    steps: Vec<Box<dyn ShutdownStep>>,
    options: ShutdownOptions,
    running: AtomicBool,
}

impl ShutdownOrchestrator {
    /// Build an orchestrator over `steps`, executed in the given order.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn ShutdownStep>>, options: ShutdownOptions) -> Self {
        Self {
            steps,
            options,
            running: AtomicBool::new(false),
        }
    }

    /// Run every step in order, honoring the global deadline and each
    /// step's own retry policy. Never runs twice concurrently on the same
    /// orchestrator: a second call while one is in flight returns
    /// immediately with [`ShutdownStatus::Failed`] and no completed steps
    /// (spec.md §4.2 step 1).
    ///
    /// - A required step retries (with linear backoff) up to
    ///   `max_attempts()` times or until `attempt_timeout()` is exhausted
    ///   on every attempt; if it never succeeds, the run stops early with
    ///   [`ShutdownStatus::Failed`] (invariant O2).
    /// - If the global deadline elapses mid-run, remaining steps are
    ///   abandoned and the run ends [`ShutdownStatus::Forced`] (O1).
    /// - Optional steps that fail are recorded but never change the
    ///   terminal status (O3).
    pub async fn perform(&self) -> Result<ShutdownResult, ShutdownError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("shutdown already in progress, rejecting concurrent perform() call");
            return Ok(ShutdownResult {
                steps: Vec::new(),
                status: ShutdownStatus::Failed,
                total_elapsed: Duration::ZERO,
            });
        }
        let result = self.perform_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn perform_inner(&self) -> Result<ShutdownResult, ShutdownError> {
        let start = Instant::now();
        let deadline = start + self.options.global_deadline;
        let mut outcomes = Vec::with_capacity(self.steps.len());
        let mut status = ShutdownStatus::Completed;

        for step in &self.steps {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                status = ShutdownStatus::Forced;
                warn!(step = step.name(), "shutdown global deadline reached, forcing remaining steps to stop");
                break;
            }

            // Race the step's own attempts/retries against the global hard
            // deadline directly, independent of any per-step or per-attempt
            // timeout: a step whose retries would otherwise keep going past
            // `global_deadline` (via backoff sleeps) is preempted here
            // rather than classified as a plain `Failed` step.
            tokio::select! {
                biased;
                () = tokio::time::sleep_until(deadline) => {
                    status = ShutdownStatus::Forced;
                    outcomes.push(StepOutcome {
                        name: step.name().to_string(),
                        succeeded: false,
                        attempts: 0,
                        elapsed: start.elapsed(),
                    });
                    warn!(step = step.name(), "shutdown global deadline reached mid-step, forcing");
                    break;
                }
                outcome = self.run_step(step.as_ref(), remaining) => {
                    let failed = !outcome.succeeded;
                    outcomes.push(outcome);
                    if failed && step.required() {
                        status = ShutdownStatus::Failed;
                        break;
                    }
                }
            }
        }

        let total_elapsed = start.elapsed();
        info!(?status, total_elapsed_ms = total_elapsed.as_millis() as u64, "shutdown finished");

        Ok(ShutdownResult {
            steps: outcomes,
            status,
            total_elapsed,
        })
    }

    async fn run_step(&self, step: &dyn ShutdownStep, budget: Duration) -> StepOutcome {
        let step_start = Instant::now();
        let mut attempts = 0u32;
        let mut succeeded = false;

        while attempts < step.max_attempts() {
            if step_start.elapsed() >= budget {
                break;
            }
            attempts += 1;
            let timeout = step.attempt_timeout().min(budget.saturating_sub(step_start.elapsed()));
            match tokio::time::timeout(timeout, step.run()).await {
                Ok(Ok(())) => {
                    succeeded = true;
                    break;
                }
                Ok(Err(err)) => {
                    warn!(step = step.name(), attempt = attempts, error = %err, "shutdown step failed");
                }
                Err(_) => {
                    warn!(step = step.name(), attempt = attempts, "shutdown step timed out");
                }
            }
            if attempts < step.max_attempts() {
                tokio::time::sleep(self.options.retry_backoff * attempts).await;
            }
        }

        StepOutcome {
            name: step.name().to_string(),
            succeeded,
            attempts,
            elapsed: step_start.elapsed(),
        }
    }
}
