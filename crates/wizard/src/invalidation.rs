//! Clearing of dependent answers when a field's value changes.

use std::collections::HashSet;

use govform_core::JourneyDocument;
use serde_json::Value;
use tracing::debug;

use crate::fields::FieldRegistry;

/// Clears the `invalidates` targets of `field` when `previous` differs from
/// `new`, following their own `invalidates` lists in turn. Returns the names
/// of the cleared fields in the order they were visited.
///
/// Values are compared structurally, so resubmitting an identical answer
/// (including arrays and objects) clears nothing.
pub fn propagate(
    fields: &FieldRegistry,
    field: &str,
    previous: Option<&Value>,
    new: &Value,
    document: &mut JourneyDocument,
) -> Vec<String> {
    if previous == Some(new) {
        return Vec::new();
    }
    // Nothing stored before and nothing stored now.
    if previous.is_none() && new.is_null() {
        return Vec::new();
    }

    let mut cleared = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([field]);
    let mut pending: Vec<&str> = fields
        .get(field)
        .map(|f| f.invalidates.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(name) = pending.pop() {
        if !visited.insert(name) {
            continue;
        }
        let Some(target) = fields.get(name) else {
            continue;
        };
        document.remove(&target.journey_key);
        debug!(field, invalidated = name, "Invalidated dependent field");
        cleared.push(name.to_string());
        pending.extend(target.invalidates.iter().rev().map(String::as_str));
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDefinition;
    use serde_json::json;

    fn fields() -> FieldRegistry {
        FieldRegistry::new([
            (
                "dateOfBirth",
                FieldDefinition::new()
                    .journey_key("applicant.dateOfBirth")
                    .invalidates(["title"]),
            ),
            (
                "title",
                FieldDefinition::new()
                    .journey_key("applicant.title")
                    .invalidates(["salutation"]),
            ),
            ("salutation", FieldDefinition::new().invalidates(["title"])),
            ("surname", FieldDefinition::new().journey_key("applicant.surname")),
        ])
        .unwrap()
    }

    fn document() -> JourneyDocument {
        serde_json::from_value(json!({
            "applicant": {"dateOfBirth": "1990-01-01", "title": "Mr", "surname": "Smith"},
            "salutation": "Dear Mr Smith"
        }))
        .unwrap()
    }

    #[test]
    fn test_change_clears_targets_transitively() {
        let mut doc = document();
        let cleared = propagate(
            &fields(),
            "dateOfBirth",
            Some(&json!("1990-01-01")),
            &json!("2015-01-01"),
            &mut doc,
        );

        assert_eq!(cleared, vec!["title".to_string(), "salutation".to_string()]);
        assert_eq!(
            doc.to_value(),
            json!({"applicant": {"dateOfBirth": "1990-01-01", "surname": "Smith"}})
        );
    }

    #[test]
    fn test_identical_resubmission_clears_nothing() {
        let mut doc = document();
        let cleared = propagate(
            &fields(),
            "dateOfBirth",
            Some(&json!("1990-01-01")),
            &json!("1990-01-01"),
            &mut doc,
        );
        assert!(cleared.is_empty());
        assert_eq!(doc, document());
    }

    #[test]
    fn test_structural_equality_for_arrays() {
        let mut doc = document();
        let cleared = propagate(
            &fields(),
            "dateOfBirth",
            Some(&json!(["a", {"b": 1}])),
            &json!(["a", {"b": 1}]),
            &mut doc,
        );
        assert!(cleared.is_empty());
    }

    #[test]
    fn test_first_answer_invalidates() {
        let mut doc = document();
        let cleared = propagate(&fields(), "dateOfBirth", None, &json!("2015-01-01"), &mut doc);
        assert_eq!(cleared.len(), 2);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut doc = document();
        let cleared = propagate(
            &fields(),
            "title",
            Some(&json!("Mr")),
            &json!("Ms"),
            &mut doc,
        );
        // title -> salutation -> title stops at the originating field.
        assert_eq!(cleared, vec!["salutation".to_string()]);
        assert!(doc.get(&"applicant.title".parse().unwrap()).is_some());
    }

    #[test]
    fn test_field_without_targets() {
        let mut doc = document();
        let cleared = propagate(
            &fields(),
            "surname",
            Some(&json!("Smith")),
            &json!("Jones"),
            &mut doc,
        );
        assert!(cleared.is_empty());
        assert_eq!(doc, document());
    }
}
