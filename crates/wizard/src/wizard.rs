//! A mounted wizard: step graph, field registry and controllers behind the
//! GET/POST step lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use govform_core::{HistoryEntry, JourneySession, WizardError, WizardResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::controller::{DefaultController, StepContext, StepController};
use crate::evaluator::ConditionEvaluator;
use crate::fields::{FieldDefinition, FieldDescriptor, FieldRegistry, FieldType};
use crate::formatters::{FormatterRegistry, DEFAULT_FORMATTERS};
use crate::invalidation;
use crate::lifecycle::{LifecycleState, RequestLifecycle};
use crate::steps::{is_external, normalise_path, BackLink, StepDescriptor, StepGraph};
use crate::validators::{FieldError, ValidationContext, ValidatorRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WizardOptions {
    pub name: String,
    /// Mount path, e.g. `/eligibility`. Empty mounts at the root.
    pub base_path: String,
    pub template_path: String,
    pub edit_suffix: String,
    /// Where a successful edit returns to once the journey is back on a
    /// completed step. Relative to the wizard unless it starts with `/`.
    pub edit_back_step: String,
    /// Restrict steps to those reachable from the recorded history.
    pub check_journey: bool,
}

impl Default for WizardOptions {
    fn default() -> Self {
        Self {
            name: "wizard".to_string(),
            base_path: String::new(),
            template_path: "pages".to_string(),
            edit_suffix: "/edit".to_string(),
            edit_back_step: "confirm".to_string(),
            check_journey: true,
        }
    }
}

/// Submitted urlencoded body in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value submitted under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Day/month/year inputs of a date field as shown in the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DateParts {
    pub day: String,
    pub month: String,
    pub year: String,
}

impl DateParts {
    fn from_form(name: &str, form: &FormData) -> Self {
        let part = |suffix: &str| {
            form.get(&format!("{name}-{suffix}"))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        Self {
            day: part("day"),
            month: part("month"),
            year: part("year"),
        }
    }

    fn from_stored(value: &Value) -> Self {
        let mut parts = value.as_str().unwrap_or_default().splitn(3, '-');
        let year = parts.next().unwrap_or_default().to_string();
        let month = parts.next().unwrap_or_default().to_string();
        let day = parts.next().unwrap_or_default().to_string();
        Self { day, month, year }
    }

    /// `YYYY-MM-DD`, zero padded when the parts are numeric. Non-numeric
    /// parts are kept so that the `date` validator rejects them.
    fn assemble(&self) -> String {
        if self.day.is_empty() && self.month.is_empty() && self.year.is_empty() {
            return String::new();
        }
        match (
            self.year.parse::<u32>(),
            self.month.parse::<u32>(),
            self.day.parse::<u32>(),
        ) {
            (Ok(y), Ok(m), Ok(d)) => format!("{y:04}-{m:02}-{d:02}"),
            _ => format!("{}-{}-{}", self.year, self.month, self.day),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub items: Vec<String>,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateParts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FieldError>,
    pub options: Map<String, Value>,
}

/// Everything a renderer needs to draw a step.
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub wizard: String,
    pub step: String,
    pub url: String,
    pub action: String,
    pub template: String,
    pub edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_link: Option<String>,
    pub fields: Vec<FieldView>,
    pub errors: Vec<FieldError>,
    pub values: Map<String, Value>,
    pub locals: Map<String, Value>,
}

impl StepView {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Redirect(String),
    Render(Box<StepView>),
}

pub struct WizardBuilder {
    options: WizardOptions,
    steps: Vec<(String, StepDescriptor)>,
    fields: Vec<(String, FieldDefinition)>,
    controllers: HashMap<String, Arc<dyn StepController>>,
    default_controller: Arc<dyn StepController>,
    validators: ValidatorRegistry,
    formatters: FormatterRegistry,
    today: Option<NaiveDate>,
}

impl WizardBuilder {
    pub fn new(name: &str, base_path: &str) -> Self {
        Self {
            options: WizardOptions {
                name: name.to_string(),
                base_path: base_path.trim_end_matches('/').to_string(),
                template_path: format!("pages/{name}"),
                ..WizardOptions::default()
            },
            steps: Vec::new(),
            fields: Vec::new(),
            controllers: HashMap::new(),
            default_controller: Arc::new(DefaultController),
            validators: ValidatorRegistry::with_builtins(),
            formatters: FormatterRegistry::with_builtins(),
            today: None,
        }
    }

    pub fn options(mut self, options: WizardOptions) -> Self {
        let base_path = options.base_path.trim_end_matches('/').to_string();
        self.options = WizardOptions { base_path, ..options };
        self
    }

    pub fn template_path(mut self, path: &str) -> Self {
        self.options.template_path = path.trim_end_matches('/').to_string();
        self
    }

    pub fn edit_back_step(mut self, step: &str) -> Self {
        self.options.edit_back_step = step.to_string();
        self
    }

    pub fn check_journey(mut self, enabled: bool) -> Self {
        self.options.check_journey = enabled;
        self
    }

    pub fn step(mut self, path: &str, step: StepDescriptor) -> Self {
        self.steps.push((path.to_string(), step));
        self
    }

    pub fn steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = (S, StepDescriptor)>,
        S: Into<String>,
    {
        self.steps
            .extend(steps.into_iter().map(|(path, step)| (path.into(), step)));
        self
    }

    pub fn field(mut self, name: &str, field: FieldDefinition) -> Self {
        self.fields.push((name.to_string(), field));
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldDefinition)>,
        S: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(name, def)| (name.into(), def)));
        self
    }

    pub fn controller(mut self, name: &str, controller: Arc<dyn StepController>) -> Self {
        self.controllers.insert(name.to_string(), controller);
        self
    }

    /// Controller for steps that do not name one.
    pub fn default_controller(mut self, controller: Arc<dyn StepController>) -> Self {
        self.default_controller = controller;
        self
    }

    pub fn validator<F>(mut self, name: &str, validator: F) -> Self
    where
        F: Fn(&Value, &Value, &ValidationContext) -> bool + Send + Sync + 'static,
    {
        self.validators.register(name, validator);
        self
    }

    pub fn formatter<F>(mut self, name: &str, formatter: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.formatters.register(name, formatter);
        self
    }

    /// Pins the date used by `before`/`after` validators.
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn build(self) -> WizardResult<Wizard> {
        let fields = FieldRegistry::new(self.fields)?;
        let graph = StepGraph::new(self.steps, &fields)?;

        for field in fields.iter() {
            for spec in &field.validate {
                if !self.validators.contains(spec.name()) {
                    return Err(WizardError::config(format!(
                        "field '{}' uses unknown validator '{}'",
                        field.name,
                        spec.name()
                    )));
                }
                if spec.name() == "regex" {
                    check_regex(&field.name, spec.arguments())?;
                }
            }
            let formatters = field
                .formatter
                .iter()
                .map(String::as_str)
                .chain(DEFAULT_FORMATTERS);
            for name in formatters {
                if !self.formatters.contains(name) {
                    return Err(WizardError::config(format!(
                        "field '{}' uses unknown formatter '{name}'",
                        field.name
                    )));
                }
            }
        }

        for step in graph.iter() {
            if let Some(name) = &step.controller {
                if !self.controllers.contains_key(name) {
                    return Err(WizardError::config(format!(
                        "step '{}' uses unknown controller '{name}'",
                        step.path
                    )));
                }
            }
        }

        if !self.options.base_path.is_empty() {
            check_shadowed_targets(&self.options.base_path, &graph)?;
        }

        let back = &self.options.edit_back_step;
        if graph.iter().any(|s| s.editable) && !is_external(back) && graph.get(back).is_none() {
            return Err(WizardError::config(format!(
                "wizard '{}' has editable steps but edit back step '{back}' does not exist",
                self.options.name
            )));
        }

        info!(
            wizard = %self.options.name,
            base_path = %self.options.base_path,
            steps = graph.len(),
            fields = fields.len(),
            "Wizard built"
        );

        Ok(Wizard {
            options: self.options,
            graph,
            fields,
            controllers: self.controllers,
            default_controller: self.default_controller,
            validators: self.validators,
            formatters: self.formatters,
            evaluator: ConditionEvaluator::new(),
            today: self.today,
        })
    }
}

/// An absolute target that names one of the wizard's own steps leaves the
/// mount path, which is almost never what the definition meant.
fn check_shadowed_targets(base_path: &str, graph: &StepGraph) -> WizardResult<()> {
    for step in graph.iter() {
        let Some(next) = &step.next else {
            continue;
        };
        for target in next.targets() {
            if is_external(target) && target != "/" && graph.get(target).is_some() {
                return Err(WizardError::config(format!(
                    "step '{}' routes to '{target}', which leaves '{base_path}'; \
                     use '{}' for the wizard's own step",
                    step.path,
                    target.trim_start_matches('/')
                )));
            }
        }
    }
    Ok(())
}

fn check_regex(field: &str, args: &Value) -> WizardResult<()> {
    let pattern = match args {
        Value::Array(items) => items.first().and_then(Value::as_str),
        other => other.as_str(),
    };
    let Some(pattern) = pattern else {
        return Err(WizardError::config(format!(
            "field '{field}' regex validator has no pattern"
        )));
    };
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| WizardError::config(format!("field '{field}' regex is invalid: {e}")))
}

/// Read-only after [`WizardBuilder::build`]; share behind an `Arc`.
pub struct Wizard {
    options: WizardOptions,
    graph: StepGraph,
    fields: FieldRegistry,
    controllers: HashMap<String, Arc<dyn StepController>>,
    default_controller: Arc<dyn StepController>,
    validators: ValidatorRegistry,
    formatters: FormatterRegistry,
    evaluator: ConditionEvaluator,
    today: Option<NaiveDate>,
}

impl std::fmt::Debug for Wizard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wizard")
            .field("options", &self.options)
            .field("steps", &self.graph.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl Wizard {
    pub fn builder(name: &str, base_path: &str) -> WizardBuilder {
        WizardBuilder::new(name, base_path)
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &WizardOptions {
        &self.options
    }

    pub fn steps(&self) -> &StepGraph {
        &self.graph
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    /// Full URL of a step key; the `/` step is the mount path itself.
    pub fn step_url(&self, key: &str) -> String {
        let key = normalise_path(key);
        match (self.options.base_path.as_str(), key.as_str()) {
            ("", key) => key.to_string(),
            (base, "/") => base.to_string(),
            (base, key) => format!("{base}{key}"),
        }
    }

    /// Full URL of a `next` target.
    pub fn target_url(&self, target: &str) -> String {
        if is_external(target) {
            target.to_string()
        } else {
            self.step_url(target)
        }
    }

    pub fn edit_url(&self, key: &str) -> String {
        format!("{}{}", self.step_url(key), self.options.edit_suffix)
    }

    pub fn is_entry_point(&self, key: &str) -> bool {
        self.graph.is_entry_point(key)
    }

    /// `(url, step key, editable)` for every step, for route mounting.
    pub fn routes(&self) -> Vec<(String, String, bool)> {
        self.graph
            .iter()
            .map(|s| (self.step_url(&s.path), s.path.clone(), s.editable))
            .collect()
    }

    fn controller_for(&self, step: &StepDescriptor) -> &Arc<dyn StepController> {
        step.controller
            .as_ref()
            .and_then(|name| self.controllers.get(name))
            .unwrap_or(&self.default_controller)
    }

    fn validation_context(&self) -> ValidationContext {
        match self.today {
            Some(today) => ValidationContext::new(today),
            None => ValidationContext::now(),
        }
    }

    fn resolve(&self, key: &str, edit: bool) -> WizardResult<&StepDescriptor> {
        let step = self.graph.resolve(key)?;
        if edit && !step.editable {
            return Err(WizardError::not_found(format!(
                "step '{}' is not editable",
                step.path
            )));
        }
        Ok(step)
    }

    /// Whether the history allows a visit to `url`. `None` when allowed,
    /// otherwise the URL to send the user to instead.
    fn check_journey(
        &self,
        step: &StepDescriptor,
        url: &str,
        session: &JourneySession,
    ) -> WizardResult<Option<String>> {
        if !self.options.check_journey || step.entry_point {
            return Ok(None);
        }
        let allowed = session
            .history
            .iter()
            .any(|e| e.step == url || e.next == url);
        if allowed {
            return Ok(None);
        }
        if let Some(last) = session.history.last() {
            return Ok(Some(last.next.clone()));
        }
        match self.graph.entry_points().next() {
            Some(entry) => Ok(Some(self.step_url(&entry.path))),
            None => Err(WizardError::MissingPrerequisite(url.to_string())),
        }
    }

    fn step_fields(&self, step: &StepDescriptor, session: &JourneySession) -> WizardResult<Vec<FieldDescriptor>> {
        let mut fields = step
            .fields
            .iter()
            .map(|name| self.fields.resolve(name).cloned())
            .collect::<WizardResult<Vec<_>>>()?;
        self.controller_for(step).setup_request(&mut fields, session);
        Ok(fields)
    }

    pub async fn get(
        &self,
        key: &str,
        edit: bool,
        session: &mut JourneySession,
    ) -> WizardResult<StepOutcome> {
        let step = self.resolve(key, edit)?;
        let url = self.step_url(&step.path);
        let mut lifecycle = RequestLifecycle::new(&url);

        if step.reset_journey {
            debug!(wizard = %self.options.name, step = %url, "Resetting journey");
            session.reset_journey();
        }

        if let Some(redirect) = self.check_journey(step, &url, session)? {
            info!(wizard = %self.options.name, step = %url, next = %redirect, "Step not reachable from history");
            lifecycle.advance(LifecycleState::Redirecting)?;
            return Ok(StepOutcome::Redirect(redirect));
        }

        if step.skip {
            lifecycle.advance(LifecycleState::Routing)?;
            let mut working = session.clone();
            {
                let mut ctx = StepContext::new(&self.options.name, step, &self.fields, &mut working);
                self.controller_for(step).save_values(&mut ctx).await?;
            }
            let next = self.next_url(step, &url, &working);
            working.record_step(HistoryEntry {
                step: url.clone(),
                next: next.clone(),
                fields: Vec::new(),
                skip: true,
            });
            lifecycle.advance(LifecycleState::Redirecting)?;
            *session = working;
            info!(wizard = %self.options.name, step = %url, next = %next, "Skipped step");
            return Ok(StepOutcome::Redirect(next));
        }

        lifecycle.advance(LifecycleState::Rendering)?;
        let fields = self.step_fields(step, session)?;
        let view = self.render(step, edit, &fields, session, None, Vec::new());
        Ok(StepOutcome::Render(Box::new(view)))
    }

    /// Runs the submit lifecycle on a copy of `session`, which is replaced
    /// only when the request ends in a redirect.
    pub async fn post(
        &self,
        key: &str,
        edit: bool,
        form: &FormData,
        session: &mut JourneySession,
    ) -> WizardResult<StepOutcome> {
        let step = self.resolve(key, edit)?;
        let url = self.step_url(&step.path);
        let mut lifecycle = RequestLifecycle::new(&url);

        if let Some(redirect) = self.check_journey(step, &url, session)? {
            lifecycle.advance(LifecycleState::Redirecting)?;
            return Ok(StepOutcome::Redirect(redirect));
        }

        lifecycle.advance(LifecycleState::Validating)?;
        let fields = self.step_fields(step, session)?;
        let values = self.read_form(&fields, form);

        let ctx = self.validation_context();
        let mut errors: Vec<FieldError> = fields
            .iter()
            .filter_map(|f| {
                let value = values.get(&f.name).unwrap_or(&Value::Null);
                self.validators.validate_field(f, value, &ctx)
            })
            .collect();
        if errors.is_empty() {
            errors = self.controller_for(step).validate(&values, session);
        }

        if !errors.is_empty() {
            info!(
                wizard = %self.options.name,
                step = %url,
                errors = errors.len(),
                "Validation failed"
            );
            lifecycle.advance(LifecycleState::Rendering)?;
            let view = self.render(step, edit, &fields, session, Some((&values, form)), errors);
            return Ok(StepOutcome::Render(Box::new(view)));
        }

        let mut working = session.clone();

        lifecycle.advance(LifecycleState::Persisting)?;
        let mut changes = Vec::with_capacity(fields.len());
        for field in &fields {
            let value = values.get(&field.name).cloned().unwrap_or(Value::Null);
            let formatted = self.formatters.format(field, value);
            let previous = working.document.get(&field.journey_key).cloned();
            working.document.set(&field.journey_key, formatted.clone());
            changes.push((field.name.as_str(), previous, formatted));
        }

        lifecycle.advance(LifecycleState::Invalidating)?;
        let mut cleared = Vec::new();
        for (name, previous, new) in &changes {
            cleared.extend(invalidation::propagate(
                &self.fields,
                name,
                previous.as_ref(),
                new,
                &mut working.document,
            ));
        }
        if !cleared.is_empty() {
            let forgotten = working.forget_steps_with_fields(&cleared);
            debug!(wizard = %self.options.name, step = %url, ?cleared, forgotten, "Invalidated answers");
        }

        {
            let mut ctx = StepContext::new(&self.options.name, step, &self.fields, &mut working);
            self.controller_for(step).save_values(&mut ctx).await?;
        }

        lifecycle.advance(LifecycleState::Routing)?;
        let next = self.next_url(step, &url, &working);
        let redirect = if edit {
            self.edit_redirect(&next, &working)
        } else {
            next.clone()
        };

        working.record_step(HistoryEntry {
            step: url.clone(),
            next,
            fields: step.fields.clone(),
            skip: false,
        });

        lifecycle.advance(LifecycleState::Redirecting)?;
        *session = working;
        info!(wizard = %self.options.name, step = %url, next = %redirect, "Step completed");
        Ok(StepOutcome::Redirect(redirect))
    }

    /// URL the step routes to; a step without `next` routes to itself.
    fn next_url(&self, step: &StepDescriptor, url: &str, session: &JourneySession) -> String {
        match self
            .evaluator
            .evaluate_step(step, &self.fields, &session.document)
        {
            Some(target) => self.target_url(target),
            None => url.to_string(),
        }
    }

    fn edit_redirect(&self, next: &str, session: &JourneySession) -> String {
        let back = self.target_url(&self.options.edit_back_step);
        if session.is_completed(next) {
            return back;
        }
        let next_step = self
            .graph
            .iter()
            .find(|s| self.step_url(&s.path) == next);
        match next_step {
            Some(s) if s.editable => format!("{next}{}", self.options.edit_suffix),
            Some(_) => next.to_string(),
            None => back,
        }
    }

    fn read_form(&self, fields: &[FieldDescriptor], form: &FormData) -> Map<String, Value> {
        fields
            .iter()
            .map(|field| {
                let raw = match field.field_type {
                    FieldType::Date => {
                        Value::String(DateParts::from_form(&field.name, form).assemble())
                    }
                    FieldType::Checkboxes => Value::Array(
                        form.get_all(&field.name)
                            .into_iter()
                            .map(|v| Value::String(v.to_string()))
                            .collect(),
                    ),
                    _ => Value::String(form.get(&field.name).unwrap_or_default().to_string()),
                };
                (field.name.clone(), self.formatters.normalise(field, raw))
            })
            .collect()
    }

    fn back_link(&self, step: &StepDescriptor, url: &str, edit: bool, session: &JourneySession) -> Option<String> {
        match &step.back_link {
            BackLink::Show(false) => None,
            BackLink::To(target) => Some(self.target_url(target)),
            BackLink::Show(true) if edit => Some(self.target_url(&self.options.edit_back_step)),
            BackLink::Show(true) => session
                .history
                .iter()
                .rev()
                .find(|e| !e.skip && e.next == url)
                .map(|e| e.step.clone()),
        }
    }

    fn render(
        &self,
        step: &StepDescriptor,
        edit: bool,
        fields: &[FieldDescriptor],
        session: &mut JourneySession,
        submitted: Option<(&Map<String, Value>, &FormData)>,
        errors: Vec<FieldError>,
    ) -> StepView {
        let url = self.step_url(&step.path);
        let back_link = self.back_link(step, &url, edit, session);

        let mut values = Map::new();
        let field_views = fields
            .iter()
            .map(|field| {
                let value = match submitted {
                    Some((submitted, _)) => submitted.get(&field.name).cloned(),
                    None => session.document.get(&field.journey_key).cloned(),
                }
                .unwrap_or(Value::Null);
                let date = (field.field_type == FieldType::Date).then(|| match submitted {
                    Some((_, form)) => DateParts::from_form(&field.name, form),
                    None => DateParts::from_stored(&value),
                });
                values.insert(field.name.clone(), value.clone());
                FieldView {
                    name: field.name.clone(),
                    field_type: field.field_type,
                    items: field.items.clone(),
                    value,
                    date,
                    error: errors.iter().find(|e| e.key == field.name).cloned(),
                    options: field.options.clone(),
                }
            })
            .collect();

        let locals = {
            let ctx = StepContext::new(&self.options.name, step, &self.fields, session);
            self.controller_for(step).locals(&ctx)
        };

        let page = step
            .template
            .clone()
            .unwrap_or_else(|| match step.path.trim_start_matches('/') {
                "" => "index".to_string(),
                name => name.to_string(),
            });
        let action = if edit { self.edit_url(&step.path) } else { url.clone() };

        StepView {
            wizard: self.options.name.clone(),
            step: step.path.clone(),
            url,
            action,
            template: format!("{}/{page}", self.options.template_path),
            edit,
            back_link,
            fields: field_views,
            errors,
            values,
            locals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::NextSpec;
    use async_trait::async_trait;
    use serde_json::json;

    struct AgeGroup;

    #[async_trait]
    impl StepController for AgeGroup {
        async fn save_values(&self, ctx: &mut StepContext<'_>) -> WizardResult<()> {
            let group = match ctx.str_value("dateOfBirth") {
                Some(dob) if dob > "2006-06-15" => "CHILD",
                _ => "ADULT",
            };
            ctx.set_value("ageGroup", json!(group))
        }
    }

    struct Titles;

    impl StepController for Titles {
        fn setup_request(&self, fields: &mut [FieldDescriptor], session: &JourneySession) {
            let child = session.document.get(&"applicant.ageGroup".parse().unwrap())
                == Some(&json!("CHILD"));
            for field in fields.iter_mut().filter(|f| f.name == "title") {
                let key = if child { "childTitles" } else { "adultTitles" };
                field.items = field.option_items(key).unwrap_or_default();
            }
        }

        fn locals(&self, ctx: &StepContext<'_>) -> Map<String, Value> {
            let mut locals = Map::new();
            locals.insert("ageGroup".into(), ctx.value("ageGroup").cloned().unwrap_or_default());
            locals
        }
    }

    struct Failing;

    #[async_trait]
    impl StepController for Failing {
        async fn save_values(&self, ctx: &mut StepContext<'_>) -> WizardResult<()> {
            ctx.set_value("ageGroup", json!("SHOULD-NOT-PERSIST"))?;
            Err(WizardError::collaborator("submission service unavailable"))
        }
    }

    fn fields() -> Vec<(&'static str, FieldDefinition)> {
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
                    .invalidates(["title"]),
            ),
            ("ageGroup", FieldDefinition::new().journey_key("applicant.ageGroup")),
            (
                "title",
                FieldDefinition::new()
                    .journey_key("applicant.title")
                    .field_type(FieldType::Radios)
                    .validate("required")
                    .option("adultTitles", json!(["Mr", "Mrs", "Ms"]))
                    .option("childTitles", json!(["Master", "Miss"])),
            ),
            (
                "surname",
                FieldDefinition::new()
                    .validate("required")
                    .validate_with("minlength", json!(2))
                    .validate("alphaex1"),
            ),
        ]
    }

    fn wizard() -> Wizard {
        Wizard::builder("eligibility", "/eligibility")
            .fields(fields())
            .step(
                "/",
                StepDescriptor::new()
                    .entry_point()
                    .reset_journey()
                    .skip()
                    .next("uk"),
            )
            .step(
                "/uk",
                StepDescriptor::new().fields(["uk"]).next_when(vec![
                    NextSpec::rule("uk", json!(false), "ineligible"),
                    "date-of-birth".into(),
                ]),
            )
            .step(
                "/date-of-birth",
                StepDescriptor::new()
                    .fields(["dateOfBirth"])
                    .editable()
                    .controller("age-group")
                    .next("name"),
            )
            .step(
                "/name",
                StepDescriptor::new()
                    .fields(["title", "surname"])
                    .editable()
                    .controller("titles")
                    .next("confirm"),
            )
            .step("/confirm", StepDescriptor::new().next("/apply"))
            .step("/ineligible", StepDescriptor::new().back_link(BackLink::Show(false)))
            .step(
                "/failing",
                StepDescriptor::new().entry_point().controller("failing").next("confirm"),
            )
            .controller("age-group", Arc::new(AgeGroup))
            .controller("titles", Arc::new(Titles))
            .controller("failing", Arc::new(Failing))
            .today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
            .build()
            .unwrap()
    }

    fn form(pairs: &[(&str, &str)]) -> FormData {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn dob(day: &str, month: &str, year: &str) -> FormData {
        form(&[
            ("dateOfBirth-day", day),
            ("dateOfBirth-month", month),
            ("dateOfBirth-year", year),
        ])
    }

    fn redirect(outcome: StepOutcome) -> String {
        match outcome {
            StepOutcome::Redirect(url) => url,
            StepOutcome::Render(view) => panic!("expected redirect, rendered {}", view.template),
        }
    }

    fn rendered(outcome: StepOutcome) -> StepView {
        match outcome {
            StepOutcome::Render(view) => *view,
            StepOutcome::Redirect(url) => panic!("expected render, redirected to {url}"),
        }
    }

    fn stored<'a>(session: &'a JourneySession, path: &str) -> Option<&'a Value> {
        session.document.get(&path.parse().unwrap())
    }

    /// Walks to the name step as an adult UK resident.
    async fn to_name(wizard: &Wizard, session: &mut JourneySession) {
        wizard.get("/", false, session).await.unwrap();
        wizard
            .post("/uk", false, &form(&[("uk", "true")]), session)
            .await
            .unwrap();
        wizard
            .post("/date-of-birth", false, &dob("1", "2", "1980"), session)
            .await
            .unwrap();
    }

    #[test]
    fn test_urls() {
        let wizard = wizard();
        assert_eq!(wizard.step_url("/"), "/eligibility");
        assert_eq!(wizard.step_url("uk"), "/eligibility/uk");
        assert_eq!(wizard.target_url("/apply"), "/apply");
        assert_eq!(wizard.edit_url("/name"), "/eligibility/name/edit");
    }

    #[tokio::test]
    async fn test_skip_step_redirects_and_records_history() {
        let wizard = wizard();
        let mut session = JourneySession::new();

        let url = redirect(wizard.get("/", false, &mut session).await.unwrap());

        assert_eq!(url, "/eligibility/uk");
        let entry = session.history_entry("/eligibility").unwrap();
        assert!(entry.skip);
        assert_eq!(entry.next, "/eligibility/uk");
    }

    #[tokio::test]
    async fn test_reset_journey_clears_document() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;
        assert!(stored(&session, "applicant.dateOfBirth").is_some());

        wizard.get("/", false, &mut session).await.unwrap();

        assert!(session.document.is_empty());
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn test_uk_routing() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        wizard.get("/", false, &mut session).await.unwrap();

        let url = redirect(
            wizard
                .post("/uk", false, &form(&[("uk", "false")]), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(url, "/eligibility/ineligible");
        assert_eq!(stored(&session, "application.uk"), Some(&json!(false)));

        let url = redirect(
            wizard
                .post("/uk", false, &form(&[("uk", "true")]), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(url, "/eligibility/date-of-birth");
        assert_eq!(stored(&session, "application.uk"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_validation_failure_renders_and_keeps_session() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        wizard.get("/", false, &mut session).await.unwrap();
        wizard
            .post("/uk", false, &form(&[("uk", "true")]), &mut session)
            .await
            .unwrap();
        let before = session.clone();

        let view = rendered(
            wizard
                .post("/date-of-birth", false, &dob("31", "2", "1980"), &mut session)
                .await
                .unwrap(),
        );

        assert_eq!(view.errors.len(), 1);
        assert_eq!(view.errors[0].kind, "date");
        assert_eq!(view.values.get("dateOfBirth"), Some(&json!("1980-02-31")));
        assert_eq!(
            view.fields[0].date,
            Some(DateParts {
                day: "31".into(),
                month: "2".into(),
                year: "1980".into()
            })
        );
        assert_eq!(view.template, "pages/eligibility/date-of-birth");
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn test_radio_items_validated() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        wizard.get("/", false, &mut session).await.unwrap();

        let view = rendered(
            wizard
                .post("/uk", false, &form(&[("uk", "perhaps")]), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(view.errors[0].kind, "equal");

        let view = rendered(wizard.post("/uk", false, &FormData::new(), &mut session).await.unwrap());
        assert_eq!(view.errors[0].kind, "required");
    }

    #[tokio::test]
    async fn test_journey_key_and_formatter_roundtrip() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;

        // Formatter applied before storage, stored under the journey key.
        assert_eq!(stored(&session, "application.uk"), Some(&json!(true)));
        // Date assembled and zero padded, no formatter.
        assert_eq!(
            stored(&session, "applicant.dateOfBirth"),
            Some(&json!("1980-02-01"))
        );
        // Default normalisation only.
        wizard
            .post(
                "/name",
                false,
                &form(&[("title", "Ms"), ("surname", "  O'Brien   Smith ")]),
                &mut session,
            )
            .await
            .unwrap();
        assert_eq!(stored(&session, "surname"), Some(&json!("O'Brien Smith")));

        let view = rendered(wizard.get("/name", false, &mut session).await.unwrap());
        assert_eq!(view.values.get("title"), Some(&json!("Ms")));
    }

    #[tokio::test]
    async fn test_controller_save_values_and_setup_request() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;
        assert_eq!(stored(&session, "applicant.ageGroup"), Some(&json!("ADULT")));

        let view = rendered(wizard.get("/name", false, &mut session).await.unwrap());
        let title = view.fields.iter().find(|f| f.name == "title").unwrap();
        assert_eq!(title.items, vec!["Mr", "Mrs", "Ms"]);
        assert_eq!(view.locals.get("ageGroup"), Some(&json!("ADULT")));

        let view = rendered(
            wizard
                .post(
                    "/name",
                    false,
                    &form(&[("title", "Master"), ("surname", "Smith")]),
                    &mut session,
                )
                .await
                .unwrap(),
        );
        assert_eq!(view.errors[0].key, "title");
        assert_eq!(view.errors[0].kind, "equal");
    }

    #[tokio::test]
    async fn test_identical_resubmission_keeps_dependents() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;
        wizard
            .post(
                "/name",
                false,
                &form(&[("title", "Mr"), ("surname", "Smith")]),
                &mut session,
            )
            .await
            .unwrap();

        wizard
            .post("/date-of-birth", false, &dob("01", "02", "1980"), &mut session)
            .await
            .unwrap();

        assert_eq!(stored(&session, "applicant.title"), Some(&json!("Mr")));
        assert!(session.is_completed("/eligibility/name"));
    }

    #[tokio::test]
    async fn test_changed_value_invalidates_dependents() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;
        wizard
            .post(
                "/name",
                false,
                &form(&[("title", "Mr"), ("surname", "Smith")]),
                &mut session,
            )
            .await
            .unwrap();

        wizard
            .post("/date-of-birth", false, &dob("1", "2", "2015"), &mut session)
            .await
            .unwrap();

        assert!(stored(&session, "applicant.title").is_none());
        assert_eq!(stored(&session, "surname"), Some(&json!("Smith")));
        assert_eq!(stored(&session, "applicant.ageGroup"), Some(&json!("CHILD")));
        assert!(!session.is_completed("/eligibility/name"));
    }

    #[tokio::test]
    async fn test_failed_save_values_commits_nothing() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        let before = session.clone();

        let result = wizard.post("/failing", false, &FormData::new(), &mut session).await;

        assert!(matches!(result, Err(WizardError::Collaborator(_))));
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn test_unreachable_step_redirects() {
        let wizard = wizard();
        let mut session = JourneySession::new();

        let url = redirect(wizard.get("/name", false, &mut session).await.unwrap());
        assert_eq!(url, "/eligibility");

        wizard.get("/", false, &mut session).await.unwrap();
        let url = redirect(wizard.get("/name", false, &mut session).await.unwrap());
        assert_eq!(url, "/eligibility/uk");
    }

    #[tokio::test]
    async fn test_unknown_step_not_found() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        assert!(matches!(
            wizard.get("/nope", false, &mut session).await,
            Err(WizardError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_edit_mode() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;

        assert!(matches!(
            wizard.get("/uk", true, &mut session).await,
            Err(WizardError::NotFound(_))
        ));

        let view = rendered(wizard.get("/date-of-birth", true, &mut session).await.unwrap());
        assert_eq!(view.action, "/eligibility/date-of-birth/edit");
        assert_eq!(view.back_link.as_deref(), Some("/eligibility/confirm"));

        // Next step not completed yet and editable: continue editing.
        let url = redirect(
            wizard
                .post("/date-of-birth", true, &dob("1", "2", "1981"), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(url, "/eligibility/name/edit");

        wizard
            .post(
                "/name",
                false,
                &form(&[("title", "Mr"), ("surname", "Smith")]),
                &mut session,
            )
            .await
            .unwrap();

        // Next step already completed: back to the summary.
        let url = redirect(
            wizard
                .post("/date-of-birth", true, &dob("1", "2", "1981"), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(url, "/eligibility/confirm");
    }

    #[tokio::test]
    async fn test_back_link() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        to_name(&wizard, &mut session).await;

        let view = rendered(wizard.get("/name", false, &mut session).await.unwrap());
        assert_eq!(view.back_link.as_deref(), Some("/eligibility/date-of-birth"));

        // Preceded only by a skipped step.
        let view = rendered(wizard.get("/uk", false, &mut session).await.unwrap());
        assert_eq!(view.back_link, None);

        wizard
            .post("/uk", false, &form(&[("uk", "false")]), &mut session)
            .await
            .unwrap();
        let view = rendered(wizard.get("/ineligible", false, &mut session).await.unwrap());
        assert_eq!(view.back_link, None);
        assert_eq!(view.template, "pages/eligibility/ineligible");
    }

    #[tokio::test]
    async fn test_step_without_next_redirects_to_itself() {
        let wizard = wizard();
        let mut session = JourneySession::new();
        wizard.get("/", false, &mut session).await.unwrap();
        wizard
            .post("/uk", false, &form(&[("uk", "false")]), &mut session)
            .await
            .unwrap();

        let url = redirect(
            wizard
                .post("/ineligible", false, &FormData::new(), &mut session)
                .await
                .unwrap(),
        );
        assert_eq!(url, "/eligibility/ineligible");
    }

    #[test]
    fn test_build_rejects_unknown_validator() {
        let result = Wizard::builder("w", "/w")
            .field("a", FieldDefinition::new().validate("postcode"))
            .build();
        assert!(matches!(result, Err(WizardError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_bad_regex() {
        let result = Wizard::builder("w", "/w")
            .field("a", FieldDefinition::new().validate_with("regex", json!("([a-z")))
            .build();
        assert!(matches!(result, Err(WizardError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_unknown_controller_and_formatter() {
        let result = Wizard::builder("w", "/w")
            .step("/", StepDescriptor::new().controller("missing"))
            .build();
        assert!(matches!(result, Err(WizardError::Configuration(_))));

        let result = Wizard::builder("w", "/w")
            .field("a", FieldDefinition::new().formatter("titlecase"))
            .build();
        assert!(matches!(result, Err(WizardError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_absolute_target_shadowing_own_step() {
        let build = |base: &str| {
            Wizard::builder("w", base)
                .step("/", StepDescriptor::new().entry_point().next("/a"))
                .step("/a", StepDescriptor::new().next("/"))
                .build()
        };
        assert!(matches!(build("/w"), Err(WizardError::Configuration(_))));
        assert!(build("").is_ok());

        let wizard = Wizard::builder("w", "/w")
            .step("/", StepDescriptor::new().entry_point().next("a"))
            .step("/a", StepDescriptor::new().next("/elsewhere"))
            .build()
            .unwrap();
        assert_eq!(wizard.target_url("a"), "/w/a");
    }

    #[test]
    fn test_build_rejects_missing_edit_back_step() {
        let result = Wizard::builder("w", "/w")
            .step("/a", StepDescriptor::new().editable())
            .build();
        assert!(matches!(result, Err(WizardError::Configuration(_))));

        let result = Wizard::builder("w", "/w")
            .step("/a", StepDescriptor::new().editable())
            .edit_back_step("/apply/confirm")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_custom_validator_and_formatter_registration() {
        let wizard = Wizard::builder("w", "/w")
            .validator("postcode", |v, _, _| v.as_str().is_some_and(|s| s.len() > 4))
            .formatter("titlecase", |v| v)
            .field(
                "a",
                FieldDefinition::new().validate("postcode").formatter("titlecase"),
            )
            .build();
        assert!(wizard.is_ok());
    }
}
