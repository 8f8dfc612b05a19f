use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_TICKS: u32 = 30;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Bounds of the graceful phase of a kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Ticks to wait for the group to drain before the forceful signal.
    pub max_ticks: u32,
    pub tick_interval: Duration,
    /// Process count at or below which the group counts as drained.
    pub threshold: u32,
}

impl EscalationPolicy {
    pub fn new(max_ticks: u32, tick_interval: Duration, threshold: u32) -> Self {
        Self {
            max_ticks,
            tick_interval,
            threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// Sleep one tick and observe again.
    Wait,
    /// The group is at or below the threshold.
    Drained,
    /// The bound expired with processes left; send the forceful signal.
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub step: EscalationStep,
    pub ticks: u32,
}

/// Tick counter for one kill request. Never persisted.
///
/// Mirrors the loop in the launcher script: keep waiting while
/// `elapsed < max_ticks && remaining > threshold`.
#[derive(Debug, Clone)]
pub struct KillEscalation {
    policy: EscalationPolicy,
    elapsed: u32,
}

impl KillEscalation {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self { policy, elapsed: 0 }
    }

    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed
    }

    /// Feed the number of processes still alive and get the next step.
    pub fn observe(&mut self, remaining: u32) -> EscalationStep {
        if remaining <= self.policy.threshold {
            return EscalationStep::Drained;
        }
        if self.elapsed >= self.policy.max_ticks {
            return EscalationStep::Escalate;
        }
        self.elapsed += 1;
        EscalationStep::Wait
    }

    /// Drive the escalation to completion, calling `probe` once per tick.
    pub async fn run<F, Fut>(mut self, mut probe: F) -> EscalationOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = u32>,
    {
        loop {
            let remaining = probe().await;
            match self.observe(remaining) {
                EscalationStep::Wait => tokio::time::sleep(self.policy.tick_interval).await,
                step => {
                    return EscalationOutcome {
                        step,
                        ticks: self.elapsed,
                    }
                }
            }
        }
    }
}
