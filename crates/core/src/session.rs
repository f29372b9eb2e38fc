use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::JourneyDocument;

/// A completed (or skipped) step recorded in the user's journey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Full URL of the step, wizard mount path included.
    pub step: String,
    /// Full URL the step routed to when it was completed.
    pub next: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub skip: bool,
}

/// Everything the wizard keeps for one browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneySession {
    #[serde(default)]
    pub document: JourneyDocument,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Per-session business flag overrides, merged over the configured ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub business_flags: BTreeMap<String, bool>,
    /// Per-session feature flag overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_flags: BTreeMap<String, bool>,
}

impl JourneySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears collected answers and step history. Flag overrides survive.
    pub fn reset_journey(&mut self) {
        self.document.clear();
        self.history.clear();
    }

    pub fn history_entry(&self, step: &str) -> Option<&HistoryEntry> {
        self.history.iter().find(|e| e.step == step)
    }

    /// Records a completed step, replacing an earlier visit of the same URL.
    pub fn record_step(&mut self, entry: HistoryEntry) {
        self.history.retain(|e| e.step != entry.step);
        self.history.push(entry);
    }

    /// Drops history entries of steps that collected any of `fields`.
    pub fn forget_steps_with_fields(&mut self, fields: &[String]) -> usize {
        let before = self.history.len();
        self.history
            .retain(|e| !e.fields.iter().any(|f| fields.contains(f)));
        before - self.history.len()
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.history_entry(step).is_some()
    }
}
