use govform_wizard::{StepContext, StepController};
use serde_json::{Map, Value};

/// Shows the application cost for the applicant's age group.
#[derive(Debug, Clone, Default)]
pub struct EligibleController {
    costs: Map<String, Value>,
}

impl EligibleController {
    /// `costs` maps a lowercase age group to its price.
    pub fn new(costs: Map<String, Value>) -> Self {
        Self { costs }
    }
}

impl StepController for EligibleController {
    fn locals(&self, ctx: &StepContext<'_>) -> Map<String, Value> {
        let mut locals = Map::new();
        let cost = ctx
            .str_value("ageGroup")
            .and_then(|group| self.costs.get(&group.to_lowercase()))
            .cloned()
            .unwrap_or(Value::Null);
        locals.insert("cost".into(), cost);
        locals
    }
}
