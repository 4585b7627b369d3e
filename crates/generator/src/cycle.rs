//! Bounded automatic repair of generated shaders.
//!
//! A generation cycle starts with each new prompt. Within a cycle at most
//! [`MAX_FIX_ATTEMPTS`] fixes may be applied. Every request carries a
//! [`Ticket`] naming the cycle it belongs to, and responses from an older
//! cycle are dropped when they finally arrive.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ServiceError, ShaderService};
use crate::fence::strip_code_fences;

pub const MAX_FIX_ATTEMPTS: u32 = 3;

pub const GENERATE_FAILED_MESSAGE: &str = "Failed to generate shader. Please try again.";
pub const FIX_FAILED_MESSAGE: &str = "Failed to fix shader. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("Please enter a description.")]
    EmptyPrompt,
    #[error("automatic fixes exhausted after {attempts} attempts; submit a new prompt")]
    RetryExhausted { attempts: u32 },
}

/// Identifies the generation cycle a request was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixCycleState {
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub last_diagnostic: Option<String>,
}

impl FixCycleState {
    fn fresh(max_attempts: u32) -> Self {
        Self {
            attempts_used: 0,
            max_attempts,
            last_diagnostic: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub ticket: Ticket,
    pub description: String,
}

impl GenerateRequest {
    pub fn send<S: ShaderService + ?Sized>(&self, service: &S) -> Result<String, ServiceError> {
        service.generate(&self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub ticket: Ticket,
    pub code: String,
    pub diagnostic: String,
}

impl FixRequest {
    pub fn send<S: ShaderService + ?Sized>(&self, service: &S) -> Result<String, ServiceError> {
        service.fix(&self.code, &self.diagnostic)
    }
}

/// What to do with a response once it comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Fence-stripped source, ready to execute.
    Apply(String),
    /// The response belongs to an earlier cycle.
    Stale,
    Failed(ServiceError),
}

#[derive(Debug)]
pub struct FixRetryCoordinator {
    generation: u64,
    state: FixCycleState,
    fixes_in_flight: u32,
}

impl Default for FixRetryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl FixRetryCoordinator {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_FIX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            generation: 0,
            state: FixCycleState::fresh(max_attempts),
            fixes_in_flight: 0,
        }
    }

    pub fn state(&self) -> &FixCycleState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fixes_in_flight(&self) -> u32 {
        self.fixes_in_flight
    }

    /// Fixes that may still be requested in this cycle.
    pub fn remaining_attempts(&self) -> u32 {
        self.state
            .max_attempts
            .saturating_sub(self.state.attempts_used + self.fixes_in_flight)
    }

    /// Starts a new cycle for `description`. Blank prompts are refused
    /// before anything changes.
    pub fn begin_generate(&mut self, description: &str) -> Result<GenerateRequest, CycleError> {
        if description.trim().is_empty() {
            return Err(CycleError::EmptyPrompt);
        }
        self.generation += 1;
        self.state = FixCycleState::fresh(self.state.max_attempts);
        self.fixes_in_flight = 0;
        info!(generation = self.generation, "generation cycle started");
        Ok(GenerateRequest {
            ticket: self.ticket(),
            description: description.to_string(),
        })
    }

    pub fn complete_generate(
        &mut self,
        ticket: Ticket,
        result: Result<String, ServiceError>,
    ) -> Resolution {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "dropping stale generation response"
            );
            return Resolution::Stale;
        }
        match result {
            Ok(text) => Resolution::Apply(strip_code_fences(&text)),
            Err(err) => {
                warn!(error = %err, "shader generation failed");
                Resolution::Failed(err)
            }
        }
    }

    /// Reserves one attempt for fixing `code`. Reserved attempts count
    /// against the ceiling until their response is resolved.
    pub fn begin_fix(
        &mut self,
        code: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Result<FixRequest, CycleError> {
        if self.state.attempts_used + self.fixes_in_flight >= self.state.max_attempts {
            return Err(CycleError::RetryExhausted {
                attempts: self.state.max_attempts,
            });
        }
        let diagnostic = diagnostic.into();
        self.fixes_in_flight += 1;
        self.state.last_diagnostic = Some(diagnostic.clone());
        debug!(
            generation = self.generation,
            attempts_used = self.state.attempts_used,
            in_flight = self.fixes_in_flight,
            "fix requested"
        );
        Ok(FixRequest {
            ticket: self.ticket(),
            code: code.into(),
            diagnostic,
        })
    }

    /// Resolves a fix response. Only a successful response from the current
    /// cycle uses up an attempt.
    pub fn complete_fix(&mut self, ticket: Ticket, result: Result<String, ServiceError>) -> Resolution {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "dropping stale fix response"
            );
            return Resolution::Stale;
        }
        self.fixes_in_flight = self.fixes_in_flight.saturating_sub(1);
        match result {
            Ok(text) => {
                self.state.attempts_used += 1;
                info!(
                    attempt = self.state.attempts_used,
                    max = self.state.max_attempts,
                    "applying fixed shader"
                );
                Resolution::Apply(strip_code_fences(&text))
            }
            Err(err) => {
                warn!(error = %err, "fix request failed");
                Resolution::Failed(err)
            }
        }
    }

    /// Begins, sends and resolves a fix on the calling thread.
    pub fn request_fix<S: ShaderService + ?Sized>(
        &mut self,
        service: &S,
        code: &str,
        diagnostic: &str,
    ) -> Result<Resolution, CycleError> {
        let request = self.begin_fix(code, diagnostic)?;
        let result = request.send(service);
        Ok(self.complete_fix(request.ticket, result))
    }

    /// Begins, sends and resolves a generation on the calling thread.
    pub fn request_generate<S: ShaderService + ?Sized>(
        &mut self,
        service: &S,
        description: &str,
    ) -> Result<Resolution, CycleError> {
        let request = self.begin_generate(description)?;
        let result = request.send(service);
        Ok(self.complete_generate(request.ticket, result))
    }

    fn ticket(&self) -> Ticket {
        Ticket {
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct ScriptedService {
        generate_calls: AtomicUsize,
        fix_calls: AtomicUsize,
        fix_failures: Mutex<Vec<ServiceError>>,
    }

    impl ShaderService for ScriptedService {
        fn generate(&self, description: &str) -> Result<String, ServiceError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("```glsl\n// {description}\n```"))
        }

        fn fix(&self, code: &str, _diagnostic: &str) -> Result<String, ServiceError> {
            self.fix_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fix_failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(format!("```\n{code} // fixed\n```"))
        }
    }

    #[test]
    fn empty_prompt_is_refused_locally() {
        let service = ScriptedService::default();
        let mut coordinator = FixRetryCoordinator::new();
        let err = coordinator.request_generate(&service, "  \n\t").unwrap_err();
        assert_eq!(err, CycleError::EmptyPrompt);
        assert_eq!(err.to_string(), "Please enter a description.");
        assert_eq!(service.generate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.generation(), 0);
    }

    #[test]
    fn generated_text_is_fence_stripped() {
        let service = ScriptedService::default();
        let mut coordinator = FixRetryCoordinator::new();
        let resolution = coordinator.request_generate(&service, "ocean").unwrap();
        assert_eq!(resolution, Resolution::Apply("// ocean".into()));
    }

    #[test]
    fn fourth_fix_is_refused_without_a_request() {
        let service = ScriptedService::default();
        let mut coordinator = FixRetryCoordinator::new();
        coordinator.request_generate(&service, "fire").unwrap();

        for attempt in 1..=3 {
            let resolution = coordinator
                .request_fix(&service, "broken", "ERROR: 0:1")
                .unwrap();
            assert!(matches!(resolution, Resolution::Apply(_)));
            assert_eq!(coordinator.state().attempts_used, attempt);
        }

        let err = coordinator
            .request_fix(&service, "still broken", "ERROR: 0:1")
            .unwrap_err();
        assert_eq!(err, CycleError::RetryExhausted { attempts: 3 });
        assert_eq!(service.fix_calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.state().attempts_used, 3);
    }

    #[test]
    fn new_prompt_resets_exhausted_cycle() {
        let service = ScriptedService::default();
        let mut coordinator = FixRetryCoordinator::new();
        coordinator.request_generate(&service, "fire").unwrap();
        for _ in 0..3 {
            coordinator.request_fix(&service, "x", "e").unwrap();
        }
        assert!(coordinator.begin_fix("x", "e").is_err());

        coordinator.request_generate(&service, "water").unwrap();
        assert_eq!(coordinator.state().attempts_used, 0);
        assert_eq!(coordinator.state().last_diagnostic, None);
        assert!(coordinator.begin_fix("x", "e").is_ok());
    }

    #[test]
    fn failed_fix_request_does_not_use_an_attempt() {
        let service = ScriptedService::default();
        service
            .fix_failures
            .lock()
            .unwrap()
            .push(ServiceError::Status { status: 502 });
        let mut coordinator = FixRetryCoordinator::new();

        let resolution = coordinator.request_fix(&service, "x", "ERROR: 0:2").unwrap();
        assert_eq!(resolution, Resolution::Failed(ServiceError::Status { status: 502 }));
        assert_eq!(coordinator.state().attempts_used, 0);
        assert_eq!(coordinator.fixes_in_flight(), 0);
        assert_eq!(
            coordinator.state().last_diagnostic.as_deref(),
            Some("ERROR: 0:2")
        );
    }

    #[test]
    fn in_flight_fixes_count_against_the_ceiling() {
        let mut coordinator = FixRetryCoordinator::new();
        let requests: Vec<FixRequest> = (0..3)
            .map(|_| coordinator.begin_fix("x", "e").unwrap())
            .collect();
        assert_eq!(coordinator.remaining_attempts(), 0);
        assert!(matches!(
            coordinator.begin_fix("x", "e"),
            Err(CycleError::RetryExhausted { .. })
        ));

        for request in requests {
            coordinator.complete_fix(request.ticket, Ok("y".into()));
        }
        assert_eq!(coordinator.state().attempts_used, 3);
        assert_eq!(coordinator.fixes_in_flight(), 0);
    }

    #[test]
    fn responses_from_older_cycles_are_stale() {
        let mut coordinator = FixRetryCoordinator::new();
        let first = coordinator.begin_generate("first").unwrap();
        let old_fix = coordinator.begin_fix("x", "e").unwrap();
        let second = coordinator.begin_generate("second").unwrap();

        assert_eq!(
            coordinator.complete_generate(first.ticket, Ok("old".into())),
            Resolution::Stale
        );
        assert_eq!(
            coordinator.complete_fix(old_fix.ticket, Ok("old fix".into())),
            Resolution::Stale
        );
        assert_eq!(coordinator.state().attempts_used, 0);
        assert_eq!(
            coordinator.complete_generate(second.ticket, Ok("new".into())),
            Resolution::Apply("new".into())
        );
    }
}
