//! Multi-step form wizard: declarative steps and fields interpreted per
//! request, with conditional routing, validation, formatting and
//! invalidation of dependent answers.

pub mod controller;
pub mod evaluator;
pub mod fields;
pub mod formatters;
pub mod invalidation;
pub mod lifecycle;
pub mod steps;
pub mod validators;
pub mod wizard;

pub use controller::{DefaultController, StepContext, StepController};
pub use evaluator::ConditionEvaluator;
pub use fields::{FieldDefinition, FieldDescriptor, FieldRegistry, FieldType, ValidatorSpec};
pub use formatters::FormatterRegistry;
pub use lifecycle::{LifecycleState, RequestLifecycle};
pub use steps::{BackLink, NextEntry, NextRule, NextSpec, StepDescriptor, StepGraph};
pub use validators::{FieldError, ValidationContext, ValidatorRegistry};
pub use wizard::{
    DateParts, FieldView, FormData, StepOutcome, StepView, Wizard, WizardBuilder, WizardOptions,
};
