//! Path-addressed answer document.
//!
//! Answers collected by the wizard live in a sparse nested JSON object whose
//! shape is implied by the `journeyKey` of every registered field. Reads of
//! paths that do not exist return `None`; they never fail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::WizardError;

/// Dot-separated path into a [`JourneyDocument`], e.g. `applicant.title`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JourneyKey {
    segments: Vec<String>,
}

impl JourneyKey {
    pub fn new<I, S>(segments: I) -> Result<Self, WizardError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(WizardError::config(format!(
                "journey key '{}' has an empty segment",
                segments.join(".")
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment, i.e. the key inside the parent object.
    pub fn leaf(&self) -> &str {
        // JourneyKey::new rejects empty segment lists.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl FromStr for JourneyKey {
    type Err = WizardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split('.'))
    }
}

impl fmt::Display for JourneyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl Serialize for JourneyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JourneyKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Nested key/value document holding one user's journey answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JourneyDocument {
    root: Map<String, Value>,
}

impl JourneyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(root: Map<String, Value>) -> Self {
        Self { root }
    }

    pub fn get(&self, key: &JourneyKey) -> Option<&Value> {
        let (leaf, parents) = key.segments.split_last()?;
        let mut current = &self.root;
        for segment in parents {
            current = current.get(segment)?.as_object()?;
        }
        current.get(leaf)
    }

    /// Writes `value` at `key`, creating intermediate objects. Any
    /// intermediate that is not an object is replaced.
    pub fn set(&mut self, key: &JourneyKey, value: Value) {
        let Some((leaf, parents)) = key.segments.split_last() else {
            return;
        };
        let mut current = &mut self.root;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(leaf.clone(), value);
    }

    /// Removes the value at `key` and returns it. Parent objects are kept.
    pub fn remove(&mut self, key: &JourneyKey) -> Option<Value> {
        let (leaf, parents) = key.segments.split_last()?;
        let mut current = &mut self.root;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(leaf)
    }

    pub fn contains(&self, key: &JourneyKey) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&mut self) {
        self.root.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }
}
