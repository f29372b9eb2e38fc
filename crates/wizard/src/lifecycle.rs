//! Per-request state machine for a wizard step.

use govform_core::{WizardError, WizardResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Phases a single step request goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Receiving,
    Validating,
    Persisting,
    Invalidating,
    Routing,
    Redirecting,
    Rendering,
}

/// Describes a single valid lifecycle transition.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub trigger: &'static str,
}

/// Guards the order of a request's phases.
#[derive(Debug, Clone)]
pub struct RequestLifecycle {
    pub state: LifecycleState,
    pub transitions: Vec<LifecycleTransition>,
    step: String,
    last_trigger: Option<&'static str>,
}

impl RequestLifecycle {
    pub fn new(step: &str) -> Self {
        let transitions = vec![
            // Receiving ->
            LifecycleTransition {
                from: LifecycleState::Receiving,
                to: LifecycleState::Validating,
                trigger: "form_submitted",
            },
            LifecycleTransition {
                from: LifecycleState::Receiving,
                to: LifecycleState::Routing,
                trigger: "skip_step",
            },
            LifecycleTransition {
                from: LifecycleState::Receiving,
                to: LifecycleState::Rendering,
                trigger: "show_form",
            },
            LifecycleTransition {
                from: LifecycleState::Receiving,
                to: LifecycleState::Redirecting,
                trigger: "journey_check_failed",
            },
            // Validating ->
            LifecycleTransition {
                from: LifecycleState::Validating,
                to: LifecycleState::Persisting,
                trigger: "valid",
            },
            LifecycleTransition {
                from: LifecycleState::Validating,
                to: LifecycleState::Rendering,
                trigger: "invalid",
            },
            // Persisting ->
            LifecycleTransition {
                from: LifecycleState::Persisting,
                to: LifecycleState::Invalidating,
                trigger: "values_stored",
            },
            // Invalidating ->
            LifecycleTransition {
                from: LifecycleState::Invalidating,
                to: LifecycleState::Routing,
                trigger: "dependents_cleared",
            },
            // Routing ->
            LifecycleTransition {
                from: LifecycleState::Routing,
                to: LifecycleState::Redirecting,
                trigger: "next_resolved",
            },
        ];

        Self {
            state: LifecycleState::Receiving,
            transitions,
            step: step.to_string(),
            last_trigger: None,
        }
    }

    pub fn can_transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    pub fn advance(&mut self, to: LifecycleState) -> WizardResult<()> {
        let from = self.state;
        let Some(transition) = self.transitions.iter().find(|t| t.from == from && t.to == to) else {
            return Err(WizardError::Internal(anyhow::anyhow!(
                "Invalid lifecycle transition from {:?} to {:?} on step {}",
                from,
                to,
                self.step
            )));
        };
        let trigger = transition.trigger;
        debug!(step = %self.step, from = ?from, to = ?to, trigger, "Lifecycle transition");
        self.state = to;
        self.last_trigger = Some(trigger);
        Ok(())
    }

    /// Trigger of the most recent transition.
    pub fn last_trigger(&self) -> Option<&'static str> {
        self.last_trigger
    }

    /// Redirecting and Rendering end the request.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Redirecting | LifecycleState::Rendering
        )
    }
}
