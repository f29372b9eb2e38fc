//! Named field validators.
//!
//! Every validator is a predicate over a submitted value, the arguments from
//! the field definition and a [`ValidationContext`]. Apart from `required`,
//! validators accept empty values so that optional fields only fail when
//! something was actually entered.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{Days, Months, NaiveDate};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::fields::{FieldDescriptor, ValidatorSpec};

pub type ValidatorFn = Arc<dyn Fn(&Value, &Value, &ValidationContext) -> bool + Send + Sync>;

/// Request independent inputs of date validators.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub today: NaiveDate,
}

impl ValidationContext {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn now() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }
}

/// A failed validator for one field. Serialized into the view model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl FieldError {
    pub fn new(key: &str, kind: &str, args: Value) -> Self {
        Self {
            key: key.to_string(),
            kind: kind.to_string(),
            args,
        }
    }
}

pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First argument as a length, accepting `30` or `[30]`.
fn length_arg(args: &Value) -> Option<usize> {
    match args {
        Value::Array(items) => items.first().and_then(Value::as_u64),
        other => other.as_u64(),
    }
    .map(|n| n as usize)
}

fn char_count(value: &Value) -> Option<usize> {
    as_text(value).map(|s| s.chars().count())
}

fn matches_pattern(re: &'static OnceLock<Option<Regex>>, pattern: &str, value: &Value) -> bool {
    let Some(re) = re.get_or_init(|| Regex::new(pattern).ok()) else {
        return false;
    };
    as_text(value).is_some_and(|s| re.is_match(&s))
}

static ALPHA: OnceLock<Option<Regex>> = OnceLock::new();
static ALPHAEX: OnceLock<Option<Regex>> = OnceLock::new();
static ALPHAEX1: OnceLock<Option<Regex>> = OnceLock::new();
static ALPHANUM: OnceLock<Option<Regex>> = OnceLock::new();
static NUMERIC: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Comparison date for `before`/`after`: no arguments means today, a date
/// string is used as-is, `[n, unit]` is `n` units before today.
fn reference_date(args: &Value, today: NaiveDate) -> Option<NaiveDate> {
    let (amount, unit) = match args {
        Value::Null => return Some(today),
        Value::String(s) => return parse_date(&Value::String(s.clone())),
        Value::Array(items) => match items.as_slice() {
            [] => return Some(today),
            [Value::String(s)] => return parse_date(&Value::String(s.clone())),
            [amount] => (amount.as_u64()?, "days"),
            [amount, unit, ..] => (amount.as_u64()?, unit.as_str()?),
        },
        other => (other.as_u64()?, "days"),
    };
    match unit.trim_end_matches('s') {
        "year" => today.checked_sub_months(Months::new(u32::try_from(amount).ok()? * 12)),
        "month" => today.checked_sub_months(Months::new(u32::try_from(amount).ok()?)),
        "week" => today.checked_sub_days(Days::new(amount * 7)),
        "day" => today.checked_sub_days(Days::new(amount)),
        _ => None,
    }
}

fn equal(value: &Value, args: &Value) -> bool {
    let Some(text) = as_text(value) else {
        return false;
    };
    match args {
        Value::Array(options) => options
            .iter()
            .any(|o| as_text(o).is_some_and(|o| o == text)),
        other => as_text(other).is_some_and(|o| o == text),
    }
}

/// Validator lookup by name.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<String, ValidatorFn>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.validators.keys().collect();
        names.sort();
        f.debug_struct("ValidatorRegistry")
            .field("validators", &names)
            .finish()
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("required", |v, _, _| !is_empty_value(v));
        registry.register("minlength", |v, a, _| {
            matches!((char_count(v), length_arg(a)), (Some(n), Some(min)) if n >= min)
        });
        registry.register("maxlength", |v, a, _| {
            matches!((char_count(v), length_arg(a)), (Some(n), Some(max)) if n <= max)
        });
        registry.register("exactlength", |v, a, _| {
            matches!((char_count(v), length_arg(a)), (Some(n), Some(len)) if n == len)
        });
        registry.register("alpha", |v, _, _| matches_pattern(&ALPHA, r"^[A-Za-z]*$", v));
        registry.register("alphaex", |v, _, _| {
            matches_pattern(&ALPHAEX, r"^[A-Za-z\s\-]*$", v)
        });
        registry.register("alphaex1", |v, _, _| {
            matches_pattern(&ALPHAEX1, r"^[A-Za-z\s\-']*$", v)
        });
        registry.register("alphanum", |v, _, _| {
            matches_pattern(&ALPHANUM, r"^[A-Za-z0-9]*$", v)
        });
        registry.register("numeric", |v, _, _| matches_pattern(&NUMERIC, r"^\d*$", v));
        registry.register("email", |v, _, _| {
            matches_pattern(
                &EMAIL,
                r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
                v,
            )
        });
        registry.register("regex", |v, a, _| {
            let pattern = match a {
                Value::Array(items) => items.first().and_then(Value::as_str),
                other => other.as_str(),
            };
            let Some(pattern) = pattern else {
                return false;
            };
            match (Regex::new(pattern), as_text(v)) {
                (Ok(re), Some(text)) => re.is_match(&text),
                _ => false,
            }
        });
        registry.register("date", |v, _, _| parse_date(v).is_some());
        registry.register("before", |v, a, ctx| {
            match (parse_date(v), reference_date(a, ctx.today)) {
                (Some(date), Some(limit)) => date < limit,
                _ => false,
            }
        });
        registry.register("after", |v, a, ctx| {
            match (parse_date(v), reference_date(a, ctx.today)) {
                (Some(date), Some(limit)) => date > limit,
                _ => false,
            }
        });
        registry.register("equal", |v, a, _| equal(v, a));
        registry
    }

    pub fn register<F>(&mut self, name: &str, validator: F)
    where
        F: Fn(&Value, &Value, &ValidationContext) -> bool + Send + Sync + 'static,
    {
        self.validators.insert(name.to_string(), Arc::new(validator));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Validators to run for `field`: the declared chain, with an implied
    /// `equal` against `items` for option based fields.
    pub fn chain_for(&self, field: &FieldDescriptor) -> Vec<ValidatorSpec> {
        let mut chain = field.validate.clone();
        let has_equal = chain.iter().any(|v| v.name() == "equal");
        if field.field_type.has_items() && !field.items.is_empty() && !has_equal {
            chain.push(ValidatorSpec::WithArguments {
                kind: "equal".to_string(),
                arguments: Value::Array(
                    field.items.iter().cloned().map(Value::String).collect(),
                ),
            });
        }
        chain
    }

    /// Runs the chain in order and stops at the first failure.
    pub fn validate_field(
        &self,
        field: &FieldDescriptor,
        value: &Value,
        ctx: &ValidationContext,
    ) -> Option<FieldError> {
        for spec in self.chain_for(field) {
            let name = spec.name();
            let args = spec.arguments();
            let passed = if name == "required" {
                self.check(name, value, args, ctx)
            } else if is_empty_value(value) {
                true
            } else if let Value::Array(items) = value {
                items
                    .iter()
                    .filter(|item| !is_empty_value(item))
                    .all(|item| self.check(name, item, args, ctx))
            } else {
                self.check(name, value, args, ctx)
            };
            if !passed {
                return Some(FieldError::new(&field.name, name, args.clone()));
            }
        }
        None
    }

    fn check(&self, name: &str, value: &Value, args: &Value, ctx: &ValidationContext) -> bool {
        match self.validators.get(name) {
            Some(validator) => validator(value, args, ctx),
            None => {
                tracing::warn!(validator = name, "Unknown validator");
                false
            }
        }
    }
}
