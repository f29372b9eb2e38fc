use govform_core::{JourneyKey, JourneySession};
use govform_wizard::{FieldDescriptor, StepController};
use serde_json::json;

use super::date_of_birth::CHILD;

/// Offers child or adult titles depending on the stored age group.
#[derive(Debug, Clone)]
pub struct NameController {
    age_group: JourneyKey,
}

impl NameController {
    pub fn new(age_group: JourneyKey) -> Self {
        Self { age_group }
    }
}

impl StepController for NameController {
    fn setup_request(&self, fields: &mut [FieldDescriptor], session: &JourneySession) {
        let is_child = session.document.get(&self.age_group) == Some(&json!(CHILD));
        let list = if is_child { "childTitles" } else { "adultTitles" };
        for field in fields.iter_mut().filter(|f| f.name == "title") {
            if let Some(items) = field.option_items(list) {
                field.items = items;
            }
        }
    }
}
