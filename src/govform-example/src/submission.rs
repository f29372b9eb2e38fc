//! Client for the downstream application submission service.

use std::time::Duration;

use chrono::Utc;
use govform_core::{AppConfig, WizardError, WizardResult};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    reference: String,
}

#[derive(Debug, Clone)]
pub struct SubmissionClient {
    client: reqwest::Client,
    url: String,
}

impl SubmissionClient {
    pub fn new(url: &str) -> WizardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WizardError::config(format!("submission client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> WizardResult<Self> {
        let url = config
            .lookup_str("services.submission.url")
            .ok_or_else(|| WizardError::config("services.submission.url is not set"))?;
        Self::new(url)
    }

    /// Request body built from the apply wizard's field values.
    pub fn payload(values: &Map<String, Value>, timestamp_ms: i64) -> Value {
        let field = |name: &str| values.get(name).cloned().unwrap_or(Value::Null);
        json!({
            "timestamp": timestamp_ms,
            "application": {
                "uk": field("uk"),
                "applicant": {
                    "dateOfBirth": field("dateOfBirth"),
                    "title": field("title"),
                    "name": {
                        "forenames": field("forenames"),
                        "surname": field("surname"),
                    }
                }
            }
        })
    }

    /// Posts the application and returns its reference.
    pub async fn submit(&self, values: &Map<String, Value>) -> WizardResult<String> {
        let body = Self::payload(values, Utc::now().timestamp_millis());

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %self.url, "Submission request failed");
                WizardError::collaborator(format!("submission request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), url = %self.url, "Submission rejected");
            return Err(WizardError::collaborator(format!(
                "submission service returned {status}"
            )));
        }

        let SubmissionResponse { reference } = response.json().await.map_err(|e| {
            WizardError::collaborator(format!("submission response is invalid: {e}"))
        })?;

        info!(reference = %reference, "Submission successful");
        Ok(reference)
    }
}
