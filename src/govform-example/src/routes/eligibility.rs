//! Eligibility checker: UK residence and date of birth.

use std::sync::Arc;

use govform_core::{AppConfig, WizardResult};
use govform_wizard::{FieldDefinition, FieldType, NextEntry, NextSpec, StepDescriptor, Wizard};
use serde_json::{json, Value};

use crate::controllers::{DateOfBirthController, EligibleController};

const DEFAULT_ADULT_YEARS: u32 = 16;

pub fn fields() -> Vec<(&'static str, FieldDefinition)> {
    vec![
        (
            "uk",
            FieldDefinition::new()
                .journey_key("application.uk")
                .field_type(FieldType::Radios)
                .items(["true", "false"])
                .formatter("boolean")
                .validate("required"),
        ),
        (
            "dateOfBirth",
            FieldDefinition::new()
                .journey_key("applicant.dateOfBirth")
                .field_type(FieldType::Date)
                .validate("required")
                .validate("date")
                .validate("before")
                // A new date of birth may change which titles apply.
                .invalidates(["title"]),
        ),
        ("ageGroup", FieldDefinition::new().journey_key("applicant.ageGroup")),
        ("title", FieldDefinition::new().journey_key("applicant.title")),
    ]
}

pub fn steps() -> Vec<(&'static str, StepDescriptor)> {
    vec![
        (
            "/",
            StepDescriptor::new()
                .entry_point()
                .reset_journey()
                .skip()
                .next("uk"),
        ),
        (
            "/uk",
            StepDescriptor::new().fields(["uk"]).next_when(vec![
                NextSpec::rule("uk", json!(false), "ineligible"),
                NextEntry::from("date-of-birth"),
            ]),
        ),
        (
            "/date-of-birth",
            StepDescriptor::new()
                .controller("date-of-birth")
                .fields(["dateOfBirth"])
                .editable()
                .next("eligible"),
        ),
        (
            "/eligible",
            StepDescriptor::new().controller("eligible").next("/apply"),
        ),
        ("/ineligible", StepDescriptor::new()),
    ]
}

pub fn wizard(config: &AppConfig) -> WizardResult<Wizard> {
    let adult_years = config
        .lookup_i64("adult_years")
        .and_then(|years| u32::try_from(years).ok())
        .unwrap_or(DEFAULT_ADULT_YEARS);
    let costs = config
        .lookup("costs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Wizard::builder("eligibility", "/eligibility")
        .edit_back_step("/apply/confirm")
        .fields(fields())
        .steps(steps())
        .controller("date-of-birth", Arc::new(DateOfBirthController::new(adult_years)))
        .controller("eligible", Arc::new(EligibleController::new(costs)))
        .build()
}
