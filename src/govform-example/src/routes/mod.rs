pub mod apply;
pub mod eligibility;

use std::collections::BTreeMap;

use govform_wizard::{FieldDefinition, StepDescriptor};
use serde::Deserialize;

/// Steps and fields of a wizard as written in a JSON definition file.
#[derive(Debug, Deserialize)]
pub struct WizardDefinition {
    pub fields: BTreeMap<String, FieldDefinition>,
    pub steps: BTreeMap<String, StepDescriptor>,
}
