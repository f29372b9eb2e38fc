//! Step graph: URL path → step descriptor, validated once at startup.

use std::collections::{BTreeMap, HashSet};

use govform_core::{WizardError, WizardResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::FieldRegistry;

/// `next` of a step: a single target or an ordered list of rules ending in
/// an unconditional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    Literal(String),
    Conditional(Vec<NextEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextEntry {
    Default(String),
    Rule(NextRule),
}

/// Selects `next` when the stored value of `field` strictly equals `value`.
/// Operators and multi-field conditions are not supported, so extra keys
/// are rejected rather than ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NextRule {
    pub field: String,
    pub value: Value,
    pub next: String,
}

impl NextSpec {
    pub fn rule(field: &str, value: Value, next: &str) -> NextEntry {
        NextEntry::Rule(NextRule {
            field: field.to_string(),
            value,
            next: next.to_string(),
        })
    }

    /// Every target this `next` can route to, in declaration order.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Literal(target) => vec![target.as_str()],
            Self::Conditional(entries) => entries
                .iter()
                .map(|entry| match entry {
                    NextEntry::Default(target) => target.as_str(),
                    NextEntry::Rule(rule) => rule.next.as_str(),
                })
                .collect(),
        }
    }
}

impl From<&str> for NextSpec {
    fn from(target: &str) -> Self {
        Self::Literal(target.to_string())
    }
}

impl From<&str> for NextEntry {
    fn from(target: &str) -> Self {
        Self::Default(target.to_string())
    }
}

/// `backLink`: shown (default), hidden, or pointing at a fixed URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackLink {
    Show(bool),
    To(String),
}

impl Default for BackLink {
    fn default() -> Self {
        Self::Show(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepDescriptor {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub next: Option<NextSpec>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub entry_point: bool,
    #[serde(default)]
    pub reset_journey: bool,
    #[serde(default)]
    pub back_link: BackLink,
    /// Template name relative to the wizard's template path.
    #[serde(default)]
    pub template: Option<String>,
    /// Name of a controller registered with the wizard builder.
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(skip)]
    pub path: String,
}

impl StepDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn next(mut self, next: impl Into<NextSpec>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn next_when(mut self, entries: Vec<NextEntry>) -> Self {
        self.next = Some(NextSpec::Conditional(entries));
        self
    }

    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn entry_point(mut self) -> Self {
        self.entry_point = true;
        self
    }

    pub fn reset_journey(mut self) -> Self {
        self.reset_journey = true;
        self
    }

    pub fn back_link(mut self, back_link: BackLink) -> Self {
        self.back_link = back_link;
        self
    }

    pub fn template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn controller(mut self, name: &str) -> Self {
        self.controller = Some(name.to_string());
        self
    }
}

/// Step keys are stored with a leading `/`; `"uk"` and `"/uk"` are the same step.
pub fn normalise_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// A target starting with `/` leaves the wizard and is not checked.
pub fn is_external(target: &str) -> bool {
    target.starts_with('/')
}

#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    // Sorted so that iteration order, and therefore the first entry point, is stable.
    steps: BTreeMap<String, StepDescriptor>,
}

impl StepGraph {
    pub fn new<I, S>(steps: I, fields: &FieldRegistry) -> WizardResult<Self>
    where
        I: IntoIterator<Item = (S, StepDescriptor)>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (path, mut step) in steps {
            let key = normalise_path(path.as_ref());
            step.path = key.clone();
            if map.insert(key.clone(), step).is_some() {
                return Err(WizardError::config(format!("step '{key}' is defined twice")));
            }
        }

        let graph = Self { steps: map };
        graph.check(fields)?;
        Ok(graph)
    }

    fn check(&self, fields: &FieldRegistry) -> WizardResult<()> {
        let paths: HashSet<&str> = self.steps.keys().map(String::as_str).collect();

        for (path, step) in &self.steps {
            for field in &step.fields {
                if !fields.contains(field) {
                    return Err(WizardError::config(format!(
                        "step '{path}' uses unknown field '{field}'"
                    )));
                }
            }

            let Some(next) = &step.next else {
                continue;
            };

            if let NextSpec::Conditional(entries) = next {
                check_conditional(path, entries, fields)?;
            }

            for target in next.targets() {
                if target.is_empty() {
                    return Err(WizardError::config(format!(
                        "step '{path}' has an empty next target"
                    )));
                }
                if !is_external(target) && !paths.contains(normalise_path(target).as_str()) {
                    return Err(WizardError::config(format!(
                        "step '{path}' routes to unknown step '{target}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> WizardResult<&StepDescriptor> {
        self.steps
            .get(&normalise_path(path))
            .ok_or_else(|| WizardError::not_found(format!("step '{path}'")))
    }

    pub fn get(&self, path: &str) -> Option<&StepDescriptor> {
        self.steps.get(&normalise_path(path))
    }

    pub fn is_entry_point(&self, path: &str) -> bool {
        self.get(path).is_some_and(|s| s.entry_point)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps.values().filter(|s| s.entry_point)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn check_conditional(path: &str, entries: &[NextEntry], fields: &FieldRegistry) -> WizardResult<()> {
    let defaults: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, NextEntry::Default(_)))
        .map(|(i, _)| i)
        .collect();

    match defaults.as_slice() {
        [index] if *index == entries.len() - 1 => {}
        [] => {
            return Err(WizardError::config(format!(
                "step '{path}' conditional next has no default entry"
            )))
        }
        _ => {
            return Err(WizardError::config(format!(
                "step '{path}' conditional next must end with exactly one default entry"
            )))
        }
    }

    for entry in entries {
        if let NextEntry::Rule(rule) = entry {
            if !fields.contains(&rule.field) {
                return Err(WizardError::config(format!(
                    "step '{path}' condition uses unknown field '{}'",
                    rule.field
                )));
            }
        }
    }
    Ok(())
}
