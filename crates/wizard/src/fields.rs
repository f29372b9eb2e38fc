//! Field registry: field name → validators, widget type and `journeyKey`.

use std::collections::{HashMap, HashSet};

use govform_core::{JourneyKey, WizardError, WizardResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Input widget kind. Only `Date` and the option based kinds change how
/// submissions are read and validated; the rest is a rendering hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Textarea,
    Radios,
    Checkboxes,
    Select,
    Date,
    Hidden,
    Email,
    Number,
}

impl FieldType {
    /// Kinds whose `items` restrict the accepted values.
    pub fn has_items(self) -> bool {
        matches!(self, Self::Radios | Self::Checkboxes | Self::Select)
    }

    pub fn is_multiple(self) -> bool {
        matches!(self, Self::Checkboxes)
    }
}

/// One entry of a field's `validate` list: `"required"` or
/// `{type: "maxlength", arguments: 30}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidatorSpec {
    Named(String),
    WithArguments {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        arguments: Value,
    },
}

impl ValidatorSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::WithArguments { kind, .. } => kind,
        }
    }

    pub fn arguments(&self) -> &Value {
        match self {
            Self::Named(_) => &Value::Null,
            Self::WithArguments { arguments, .. } => arguments,
        }
    }
}

impl From<&str> for ValidatorSpec {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

/// Declarative field configuration as written by an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(default)]
    pub journey_key: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, deserialize_with = "one_or_many")]
    pub validate: Vec<ValidatorSpec>,
    #[serde(default)]
    pub invalidates: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub formatter: Vec<String>,
    #[serde(default)]
    pub ignore_default_formatters: bool,
    #[serde(default)]
    pub items: Vec<String>,
    /// Anything else (e.g. alternative item lists) is kept for controllers
    /// and templates.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

impl FieldDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journey_key(mut self, key: &str) -> Self {
        self.journey_key = Some(key.to_string());
        self
    }

    pub fn field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn validate(mut self, name: &str) -> Self {
        self.validate.push(ValidatorSpec::from(name));
        self
    }

    pub fn validate_with(mut self, name: &str, arguments: Value) -> Self {
        self.validate.push(ValidatorSpec::WithArguments {
            kind: name.to_string(),
            arguments,
        });
        self
    }

    pub fn formatter(mut self, name: &str) -> Self {
        self.formatter.push(name.to_string());
        self
    }

    pub fn invalidates<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidates.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }
}

/// A registered field with its storage path resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub journey_key: JourneyKey,
    pub field_type: FieldType,
    pub validate: Vec<ValidatorSpec>,
    pub invalidates: Vec<String>,
    pub formatter: Vec<String>,
    pub ignore_default_formatters: bool,
    pub items: Vec<String>,
    pub options: Map<String, Value>,
}

impl FieldDescriptor {
    fn from_definition(name: &str, def: FieldDefinition) -> WizardResult<Self> {
        let journey_key = match def.journey_key.as_deref() {
            Some(path) => path.parse().map_err(|_| {
                WizardError::config(format!("field '{name}' has invalid journeyKey '{path}'"))
            })?,
            // The field name is a single segment even if it contains dots.
            None => JourneyKey::new([name])?,
        };
        Ok(Self {
            name: name.to_string(),
            journey_key,
            field_type: def.field_type,
            validate: def.validate,
            invalidates: def.invalidates,
            formatter: def.formatter,
            ignore_default_formatters: def.ignore_default_formatters,
            items: def.items,
            options: def.options,
        })
    }

    /// Item list from a named option, e.g. `childTitles`.
    pub fn option_items(&self, key: &str) -> Option<Vec<String>> {
        let items = self.options.get(key)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }
}

/// Static lookup from field name to descriptor. Read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldDescriptor>,
}

impl FieldRegistry {
    /// Builds the registry, checking journey keys and `invalidates` targets.
    pub fn new<I, S>(definitions: I) -> WizardResult<Self>
    where
        I: IntoIterator<Item = (S, FieldDefinition)>,
        S: Into<String>,
    {
        let mut fields = HashMap::new();
        for (name, def) in definitions {
            let name = name.into();
            let descriptor = FieldDescriptor::from_definition(&name, def)?;
            if fields.insert(name.clone(), descriptor).is_some() {
                return Err(WizardError::config(format!("field '{name}' is defined twice")));
            }
        }

        let names: HashSet<&String> = fields.keys().collect();
        for field in fields.values() {
            for target in &field.invalidates {
                if !names.contains(target) {
                    return Err(WizardError::config(format!(
                        "field '{}' invalidates unknown field '{}'",
                        field.name, target
                    )));
                }
            }
        }

        Ok(Self { fields })
    }

    pub fn resolve(&self, name: &str) -> WizardResult<&FieldDescriptor> {
        self.fields
            .get(name)
            .ok_or_else(|| WizardError::config(format!("unknown field '{name}'")))
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
