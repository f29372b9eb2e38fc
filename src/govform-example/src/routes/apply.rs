//! Application form, defined in `apply.json`.

use std::sync::Arc;

use govform_core::{AppConfig, WizardResult};
use govform_wizard::Wizard;

use super::WizardDefinition;
use crate::controllers::{NameController, SubmitController};
use crate::submission::SubmissionClient;

const DEFINITION: &str = include_str!("apply.json");

pub fn definition() -> WizardResult<WizardDefinition> {
    Ok(serde_json::from_str(DEFINITION)?)
}

pub fn wizard(config: &AppConfig) -> WizardResult<Wizard> {
    let WizardDefinition { fields, steps } = definition()?;
    let client = SubmissionClient::from_config(config)?;

    Wizard::builder("apply", "/apply")
        .fields(fields)
        .steps(steps)
        .controller(
            "name",
            Arc::new(NameController::new("applicant.ageGroup".parse()?)),
        )
        .controller("submit", Arc::new(SubmitController::new(client)))
        .build()
}
