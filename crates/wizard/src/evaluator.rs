//! Condition evaluation: picks the next target of a step from the stored
//! answers.

use govform_core::JourneyDocument;
use tracing::debug;

use crate::fields::FieldRegistry;
use crate::steps::{NextEntry, NextRule, NextSpec, StepDescriptor};

/// Resolves the next target of a step against the current answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Returns the raw target (relative step name or external path) of the
    /// first matching rule, or the default. `None` only when the step has no
    /// `next`.
    pub fn evaluate_step<'a>(
        &self,
        step: &'a StepDescriptor,
        fields: &FieldRegistry,
        document: &JourneyDocument,
    ) -> Option<&'a str> {
        let next = step.next.as_ref()?;
        let target = self.evaluate(next, fields, document);
        debug!(step = %step.path, next = ?target, "Evaluated next step");
        target
    }

    pub fn evaluate<'a>(
        &self,
        next: &'a NextSpec,
        fields: &FieldRegistry,
        document: &JourneyDocument,
    ) -> Option<&'a str> {
        match next {
            NextSpec::Literal(target) => Some(target.as_str()),
            NextSpec::Conditional(entries) => {
                for entry in entries {
                    match entry {
                        NextEntry::Rule(rule) => {
                            if self.rule_matches(rule, fields, document) {
                                return Some(rule.next.as_str());
                            }
                        }
                        NextEntry::Default(target) => return Some(target.as_str()),
                    }
                }
                None
            }
        }
    }

    /// Strict equality between the stored value and the rule value: `false`
    /// never matches `"false"`, and an absent value matches nothing.
    pub fn rule_matches(
        &self,
        rule: &NextRule,
        fields: &FieldRegistry,
        document: &JourneyDocument,
    ) -> bool {
        let Some(field) = fields.get(&rule.field) else {
            return false;
        };
        document.get(&field.journey_key) == Some(&rule.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldDefinition;
    use serde_json::json;

    fn fields() -> FieldRegistry {
        FieldRegistry::new([
            ("uk", FieldDefinition::new().journey_key("application.uk")),
            ("ageGroup", FieldDefinition::new().journey_key("applicant.ageGroup")),
        ])
        .unwrap()
    }

    fn uk_next() -> NextSpec {
        NextSpec::Conditional(vec![
            NextSpec::rule("uk", json!(false), "ineligible"),
            "date-of-birth".into(),
        ])
    }

    fn doc(value: serde_json::Value) -> JourneyDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_literal_next_ignores_document() {
        let evaluator = ConditionEvaluator::new();
        let next = NextSpec::from("confirm");
        for d in [
            doc(json!({})),
            doc(json!({"application": {"uk": false}})),
            doc(json!({"anything": [1, 2, 3]})),
        ] {
            assert_eq!(evaluator.evaluate(&next, &fields(), &d), Some("confirm"));
        }
    }

    #[test]
    fn test_uk_routing() {
        let evaluator = ConditionEvaluator::new();
        let next = uk_next();

        let outside = doc(json!({"application": {"uk": false}}));
        assert_eq!(evaluator.evaluate(&next, &fields(), &outside), Some("ineligible"));

        let inside = doc(json!({"application": {"uk": true}}));
        assert_eq!(evaluator.evaluate(&next, &fields(), &inside), Some("date-of-birth"));

        let unanswered = doc(json!({}));
        assert_eq!(
            evaluator.evaluate(&next, &fields(), &unanswered),
            Some("date-of-birth")
        );
    }

    #[test]
    fn test_equality_is_strict() {
        let evaluator = ConditionEvaluator::new();
        let as_string = doc(json!({"application": {"uk": "false"}}));
        assert_eq!(
            evaluator.evaluate(&uk_next(), &fields(), &as_string),
            Some("date-of-birth")
        );
        let as_number = doc(json!({"application": {"uk": 0}}));
        assert_eq!(
            evaluator.evaluate(&uk_next(), &fields(), &as_number),
            Some("date-of-birth")
        );
    }

    #[test]
    fn test_first_match_wins() {
        let evaluator = ConditionEvaluator::new();
        let next = NextSpec::Conditional(vec![
            NextSpec::rule("ageGroup", json!("CHILD"), "child"),
            NextSpec::rule("uk", json!(true), "uk"),
            NextSpec::rule("ageGroup", json!("CHILD"), "never-reached"),
            "default".into(),
        ]);
        let d = doc(json!({"application": {"uk": true}, "applicant": {"ageGroup": "CHILD"}}));
        assert_eq!(evaluator.evaluate(&next, &fields(), &d), Some("child"));
    }

    #[test]
    fn test_non_matching_rules_order_independent() {
        let evaluator = ConditionEvaluator::new();
        let d = doc(json!({"application": {"uk": true}, "applicant": {"ageGroup": "ADULT"}}));

        let a = NextSpec::Conditional(vec![
            NextSpec::rule("ageGroup", json!("CHILD"), "child"),
            NextSpec::rule("uk", json!(false), "ineligible"),
            NextSpec::rule("uk", json!(true), "match"),
            "default".into(),
        ]);
        let b = NextSpec::Conditional(vec![
            NextSpec::rule("uk", json!(false), "ineligible"),
            NextSpec::rule("ageGroup", json!("CHILD"), "child"),
            NextSpec::rule("uk", json!(true), "match"),
            "default".into(),
        ]);
        assert_eq!(evaluator.evaluate(&a, &fields(), &d), Some("match"));
        assert_eq!(evaluator.evaluate(&b, &fields(), &d), Some("match"));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let evaluator = ConditionEvaluator::new();
        let next = uk_next();
        let d = doc(json!({"application": {"uk": false}}));
        let first = evaluator.evaluate(&next, &fields(), &d);
        for _ in 0..100 {
            assert_eq!(evaluator.evaluate(&next, &fields(), &d), first);
        }
    }

    #[test]
    fn test_step_without_next() {
        let evaluator = ConditionEvaluator::new();
        let step = StepDescriptor::new();
        assert_eq!(evaluator.evaluate_step(&step, &fields(), &doc(json!({}))), None);
    }
}
