use async_trait::async_trait;
use chrono::{Months, NaiveDate, Utc};
use govform_core::WizardResult;
use govform_wizard::{StepContext, StepController};
use serde_json::json;

pub const ADULT: &str = "ADULT";
pub const CHILD: &str = "CHILD";

/// Derives `ageGroup` from the submitted date of birth.
#[derive(Debug, Clone)]
pub struct DateOfBirthController {
    adult_years: u32,
    today: Option<NaiveDate>,
}

impl DateOfBirthController {
    pub fn new(adult_years: u32) -> Self {
        Self {
            adult_years,
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn age_group(&self, date_of_birth: NaiveDate) -> &'static str {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let adult_date = today
            .checked_sub_months(Months::new(self.adult_years * 12))
            .unwrap_or(NaiveDate::MIN);
        if date_of_birth > adult_date {
            CHILD
        } else {
            ADULT
        }
    }
}

#[async_trait]
impl StepController for DateOfBirthController {
    async fn save_values(&self, ctx: &mut StepContext<'_>) -> WizardResult<()> {
        let Some(date_of_birth) = ctx
            .str_value("dateOfBirth")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            return Ok(());
        };
        let group = self.age_group(date_of_birth);
        ctx.set_value("ageGroup", json!(group))
    }
}
