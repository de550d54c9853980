//! Explicit state machine for the plan → generate → test → self-fix loop.
//!
//! The orchestrator performs side effects and reports what happened as an
//! [`Event`]; the machine alone decides the next [`Phase`], when the attempt
//! counter moves and whether a service hiccup may be retried in place.

/// Attempt budget for one run.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Generating,
    Executing,
    Validating,
    Retrying,
    Success,
    ExhaustedRetries,
    FatalError,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Success | Phase::ExhaustedRetries | Phase::FatalError
        )
    }
}

/// Something the orchestrator observed while in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A plan (generated or fallback) is available.
    PlanReady,
    /// Sample files are missing or unusable.
    InputRejected,
    /// The generation service reported quota/rate exhaustion.
    QuotaExhausted,
    /// A transient generation service failure.
    ServiceFailed,
    SourceGenerated,
    /// The executor returned, with either a table or a captured error.
    ExecutionFinished,
    AttemptPassed,
    AttemptFailed,
    RetryPrepared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {phase:?} on {event:?}")]
pub struct InvalidTransition {
    pub phase: Phase,
    pub event: Event,
}

#[derive(Debug, Clone)]
pub struct Machine {
    phase: Phase,
    attempt: u32,
    max_attempts: u32,
    in_place_retry_used: bool,
}

impl Machine {
    /// `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: Phase::Planning,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            in_place_retry_used: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current attempt index (0 while planning).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Apply `event` and return the new phase.
    pub fn apply(&mut self, event: Event) -> Result<Phase, InvalidTransition> {
        let next = match (self.phase, event) {
            (Phase::Planning, Event::PlanReady) => {
                self.start_attempt(1);
                Phase::Generating
            }
            (Phase::Planning, Event::InputRejected | Event::QuotaExhausted) => Phase::FatalError,
            (Phase::Generating, Event::SourceGenerated) => Phase::Executing,
            (Phase::Generating, Event::QuotaExhausted) => Phase::FatalError,
            (Phase::Generating, Event::ServiceFailed) if !self.in_place_retry_used => {
                self.in_place_retry_used = true;
                Phase::Generating
            }
            (Phase::Generating, Event::ServiceFailed) => Phase::FatalError,
            (Phase::Generating | Phase::Validating, Event::AttemptFailed) => {
                if self.attempt < self.max_attempts {
                    Phase::Retrying
                } else {
                    Phase::ExhaustedRetries
                }
            }
            (Phase::Executing, Event::ExecutionFinished) => Phase::Validating,
            (Phase::Validating, Event::AttemptPassed) => Phase::Success,
            (Phase::Retrying, Event::RetryPrepared) => {
                self.start_attempt(self.attempt + 1);
                Phase::Generating
            }
            (phase, event) => return Err(InvalidTransition { phase, event }),
        };
        self.phase = next;
        Ok(next)
    }

    fn start_attempt(&mut self, index: u32) {
        self.attempt = index;
        self.in_place_retry_used = false;
    }
}
