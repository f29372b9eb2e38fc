//! Per-step behaviour hooks.
//!
//! A step may name a controller; every hook has a no-op default so a
//! controller only implements what it changes.

use async_trait::async_trait;
use govform_core::{JourneySession, WizardResult};
use serde_json::{Map, Value};

use crate::fields::{FieldDescriptor, FieldRegistry};
use crate::steps::StepDescriptor;
use crate::validators::FieldError;

/// Mutable view over the session while a step is being processed.
pub struct StepContext<'a> {
    pub wizard: &'a str,
    pub step: &'a StepDescriptor,
    pub fields: &'a FieldRegistry,
    pub session: &'a mut JourneySession,
}

impl<'a> StepContext<'a> {
    pub fn new(
        wizard: &'a str,
        step: &'a StepDescriptor,
        fields: &'a FieldRegistry,
        session: &'a mut JourneySession,
    ) -> Self {
        Self {
            wizard,
            step,
            fields,
            session,
        }
    }

    /// Stored value of a registered field, read through its `journeyKey`.
    pub fn value(&self, field: &str) -> Option<&Value> {
        let descriptor = self.fields.get(field)?;
        self.session.document.get(&descriptor.journey_key)
    }

    pub fn str_value(&self, field: &str) -> Option<&str> {
        self.value(field).and_then(Value::as_str)
    }

    pub fn set_value(&mut self, field: &str, value: Value) -> WizardResult<()> {
        let key = self.fields.resolve(field)?.journey_key.clone();
        self.session.document.set(&key, value);
        Ok(())
    }

    pub fn remove_value(&mut self, field: &str) -> WizardResult<Option<Value>> {
        let key = self.fields.resolve(field)?.journey_key.clone();
        Ok(self.session.document.remove(&key))
    }

    /// Every registered field's stored value keyed by field name.
    pub fn values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| {
                self.session
                    .document
                    .get(&f.journey_key)
                    .map(|v| (f.name.clone(), v.clone()))
            })
            .collect()
    }
}

#[async_trait]
pub trait StepController: Send + Sync {
    /// Adjusts this request's copy of the step's fields, e.g. to pick an
    /// item list based on earlier answers.
    fn setup_request(&self, _fields: &mut [FieldDescriptor], _session: &JourneySession) {}

    /// Cross-field checks run after the per-field validators passed.
    fn validate(&self, _values: &Map<String, Value>, _session: &JourneySession) -> Vec<FieldError> {
        Vec::new()
    }

    /// Runs after the step's values are stored and invalidation applied,
    /// before routing. Errors abort the request without committing.
    async fn save_values(&self, _ctx: &mut StepContext<'_>) -> WizardResult<()> {
        Ok(())
    }

    /// Extra template variables for the step's view.
    fn locals(&self, _ctx: &StepContext<'_>) -> Map<String, Value> {
        Map::new()
    }
}

/// Controller used by steps that do not name one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultController;

impl StepController for DefaultController {}
