use async_trait::async_trait;
use govform_core::WizardResult;
use govform_wizard::{StepContext, StepController};
use serde_json::json;

use crate::submission::SubmissionClient;

/// Sends the completed application and stores the returned reference.
#[derive(Debug, Clone)]
pub struct SubmitController {
    client: SubmissionClient,
}

impl SubmitController {
    pub fn new(client: SubmissionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepController for SubmitController {
    async fn save_values(&self, ctx: &mut StepContext<'_>) -> WizardResult<()> {
        let reference = self.client.submit(&ctx.values()).await?;
        ctx.set_value("reference", json!(reference))
    }
}
