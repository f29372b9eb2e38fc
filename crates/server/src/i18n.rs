//! Locale bundles loaded from JSON files and `Accept-Language` negotiation.
//!
//! Every `{locale}.json` file found in the configured locale directories is
//! deep-merged into that locale's bundle, later directories winning. Lookups
//! fall back to the default locale.

use std::collections::HashMap;
use std::path::Path;

use govform_core::{WizardError, WizardResult};
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Translator {
    default_locale: String,
    bundles: HashMap<String, Value>,
}

impl Translator {
    pub fn new(default_locale: &str) -> Self {
        Self {
            default_locale: default_locale.to_string(),
            bundles: HashMap::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(dirs: &[P], default_locale: &str) -> WizardResult<Self> {
        let mut translator = Self::new(default_locale);
        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "Locale directory not found");
                continue;
            }
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let text = std::fs::read_to_string(&path)?;
                let bundle: Value = serde_json::from_str(&text).map_err(|e| {
                    WizardError::config(format!("locale file {} is invalid: {e}", path.display()))
                })?;
                translator.add_bundle(locale, bundle);
            }
        }
        info!(
            locales = ?translator.locales(),
            default = %translator.default_locale,
            "Loaded locale bundles"
        );
        Ok(translator)
    }

    pub fn add_bundle(&mut self, locale: &str, bundle: Value) {
        let target = self
            .bundles
            .entry(locale.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        deep_merge(target, bundle);
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut locales: Vec<&str> = self.bundles.keys().map(String::as_str).collect();
        locales.sort_unstable();
        locales
    }

    /// Best supported locale for an `Accept-Language` header.
    pub fn negotiate(&self, accept_language: Option<&str>) -> String {
        let Some(header) = accept_language else {
            return self.default_locale.clone();
        };

        let mut candidates: Vec<(f32, &str)> = header
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.trim().split(';');
                let tag = pieces.next()?.trim();
                if tag.is_empty() || tag == "*" {
                    return None;
                }
                let quality = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((quality, tag))
            })
            .collect();
        // Stable sort keeps header order for equal weights.
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, tag) in candidates {
            let tag = tag.to_ascii_lowercase();
            if let Some(locale) = self.bundles.keys().find(|l| l.to_ascii_lowercase() == tag) {
                return locale.clone();
            }
            let primary = tag.split('-').next().unwrap_or_default();
            if self.bundles.contains_key(primary) {
                return primary.to_string();
            }
        }
        self.default_locale.clone()
    }

    /// The default bundle overlaid with the locale's bundle.
    pub fn bundle(&self, locale: &str) -> Value {
        let mut merged = self
            .bundles
            .get(&self.default_locale)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        if locale != self.default_locale {
            if let Some(bundle) = self.bundles.get(locale) {
                deep_merge(&mut merged, bundle.clone());
            }
        }
        merged
    }

    pub fn translate(&self, locale: &str, key: &str) -> Option<String> {
        [locale, self.default_locale.as_str()]
            .into_iter()
            .filter_map(|l| self.bundles.get(l))
            .find_map(|bundle| lookup(bundle, key))
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// First of `keys` that resolves, with `{name}` placeholders filled in.
    pub fn translate_with(&self, locale: &str, keys: &[String], args: &Map<String, Value>) -> Option<String> {
        keys.iter()
            .find_map(|key| self.translate(locale, key))
            .map(|template| interpolate(&template, args))
    }
}

fn lookup<'a>(bundle: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(bundle, |current, segment| current.get(segment))
}

pub fn interpolate(template: &str, args: &Map<String, Value>) -> String {
    let mut output = template.to_string();
    for (name, value) in args {
        let token = format!("{{{name}}}");
        let text = match value {
            Value::String(v) => v.clone(),
            Value::Array(items) => items
                .iter()
                .map(|i| match i {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        };
        output = output.replace(&token, &text);
    }
    output
}

pub(crate) fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}
