//! Validation events
//!
//! A validator reports its findings as a list of [`ValidationEvent`]s. After a
//! pass settles, the combined list is partitioned by [`ValidationEventType`]
//! into the four lists a control exposes.

use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Severity of a validation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValidationEventType {
    Error,
    Warning,
    Info,
    Success,
}

impl ValidationEventType {
    /// Higher is more severe
    pub fn severity(self) -> u8 {
        match self {
            ValidationEventType::Error => 3,
            ValidationEventType::Warning => 2,
            ValidationEventType::Info => 1,
            ValidationEventType::Success => 0,
        }
    }
}

/// One finding produced by a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationEvent {
    /// Stable identifier for programmatic lookup, e.g. `"required"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
    #[serde(rename = "type")]
    pub event_type: ValidationEventType,
    /// Opaque payload passed through to the UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<serde_json::Value>,
}

impl ValidationEvent {
    pub fn new(event_type: ValidationEventType, message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
            event_type,
            additional_data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ValidationEventType::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ValidationEventType::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ValidationEventType::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ValidationEventType::Success, message)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }

    pub fn is_error(&self) -> bool {
        self.event_type == ValidationEventType::Error
    }
}

/// Concatenate per-validator results, keeping validator order
pub fn combine_errors<I>(groups: I) -> Vec<ValidationEvent>
where
    I: IntoIterator<Item = Vec<ValidationEvent>>,
{
    groups.into_iter().flatten().collect()
}

/// The four event lists of a settled pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLists {
    pub errors: Rc<[ValidationEvent]>,
    pub warnings: Rc<[ValidationEvent]>,
    pub information_messages: Rc<[ValidationEvent]>,
    pub successes: Rc<[ValidationEvent]>,
}

impl EventLists {
    /// Split one combined result set by event kind, preserving order
    pub fn partition(events: Vec<ValidationEvent>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut information_messages = Vec::new();
        let mut successes = Vec::new();

        for event in events {
            match event.event_type {
                ValidationEventType::Error => errors.push(event),
                ValidationEventType::Warning => warnings.push(event),
                ValidationEventType::Info => information_messages.push(event),
                ValidationEventType::Success => successes.push(event),
            }
        }

        Self {
            errors: errors.into(),
            warnings: warnings.into(),
            information_messages: information_messages.into(),
            successes: successes.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partition_keeps_order_within_kind() {
        let lists = EventLists::partition(vec![
            ValidationEvent::error("a"),
            ValidationEvent::info("i"),
            ValidationEvent::error("b"),
            ValidationEvent::success("s"),
            ValidationEvent::warning("w"),
        ]);

        let messages = |events: &[ValidationEvent]| {
            events.iter().map(|e| e.message.clone()).collect::<Vec<_>>()
        };
        assert_eq!(messages(&lists.errors), ["a", "b"]);
        assert_eq!(messages(&lists.warnings), ["w"]);
        assert_eq!(messages(&lists.information_messages), ["i"]);
        assert_eq!(messages(&lists.successes), ["s"]);
    }

    #[test]
    fn test_combine_errors_concatenates() {
        let combined = combine_errors(vec![
            vec![ValidationEvent::error("first")],
            vec![],
            vec![ValidationEvent::warning("second")],
        ]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[1].message, "second");
    }

    #[test]
    fn test_event_serializes_with_type_field() {
        let event = ValidationEvent::error("Required")
            .with_key("required")
            .with_data(json!({ "min": 1 }));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "key": "required",
                "message": "Required",
                "type": "Error",
                "additionalData": { "min": 1 }
            })
        );
    }

    #[test]
    fn test_severity_order() {
        assert!(ValidationEventType::Error.severity() > ValidationEventType::Warning.severity());
        assert!(ValidationEventType::Warning.severity() > ValidationEventType::Info.severity());
        assert!(ValidationEventType::Info.severity() > ValidationEventType::Success.severity());
    }
}
