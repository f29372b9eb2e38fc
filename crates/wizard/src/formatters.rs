//! Value formatters applied to submitted values.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::fields::FieldDescriptor;

pub type FormatterFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Run on every field before validation unless `ignoreDefaultFormatters`.
pub const DEFAULT_FORMATTERS: [&str; 3] = ["trim", "singlespaces", "hyphens"];

fn map_text(value: Value, f: impl Fn(&str) -> String + Copy) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_text(v, f)).collect()),
        other => other,
    }
}

fn boolean(value: Value) -> Value {
    match value {
        Value::String(s) => match s.as_str() {
            "true" | "yes" | "on" => Value::Bool(true),
            "false" | "no" | "off" => Value::Bool(false),
            _ => Value::Null,
        },
        Value::Bool(b) => Value::Bool(b),
        _ => Value::Null,
    }
}

fn number(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::String(s.to_string()))
            }
        }
        other => other,
    }
}

#[derive(Clone)]
pub struct FormatterRegistry {
    formatters: HashMap<String, FormatterFn>,
}

impl fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.formatters.keys().collect();
        names.sort();
        f.debug_struct("FormatterRegistry")
            .field("formatters", &names)
            .finish()
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FormatterRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            formatters: HashMap::new(),
        };
        registry.register("trim", |v| map_text(v, |s| s.trim().to_string()));
        registry.register("singlespaces", |v| {
            map_text(v, |s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        });
        // En/em dashes and minus signs typed or pasted into text fields.
        registry.register("hyphens", |v| {
            map_text(v, |s| {
                s.chars()
                    .map(|c| match c {
                        '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
                        other => other,
                    })
                    .collect()
            })
        });
        registry.register("uppercase", |v| map_text(v, str::to_uppercase));
        registry.register("lowercase", |v| map_text(v, str::to_lowercase));
        registry.register("removespaces", |v| {
            map_text(v, |s| s.chars().filter(|c| !c.is_whitespace()).collect())
        });
        registry.register("boolean", boolean);
        registry.register("number", number);
        registry
    }

    pub fn register<F>(&mut self, name: &str, formatter: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.formatters.insert(name.to_string(), Arc::new(formatter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    fn apply(&self, names: &[&str], mut value: Value) -> Value {
        for name in names {
            match self.formatters.get(*name) {
                Some(formatter) => value = formatter(value),
                None => tracing::warn!(formatter = name, "Unknown formatter"),
            }
        }
        value
    }

    /// Text normalisation run before validation.
    pub fn normalise(&self, field: &FieldDescriptor, value: Value) -> Value {
        if field.ignore_default_formatters {
            return value;
        }
        self.apply(&DEFAULT_FORMATTERS, value)
    }

    /// Declared formatters, run on validated values just before storage.
    pub fn format(&self, field: &FieldDescriptor, value: Value) -> Value {
        let names: Vec<&str> = field.formatter.iter().map(String::as_str).collect();
        self.apply(&names, value)
    }
}
