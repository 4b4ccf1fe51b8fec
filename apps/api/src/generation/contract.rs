//! Structural contract for provider output.
//!
//! The provider returns free-form JSON. Nothing reaches the store until it has
//! been checked here: a title, at least one section, and every section carrying
//! a unique module id plus a non-blank title and body. `order_index` is taken
//! from position, never from the payload.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::AppError;
use crate::models::content::ContentSection;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ContractViolation(pub String);

impl From<ContractViolation> for AppError {
    fn from(v: ContractViolation) -> Self {
        AppError::GenerationContractViolation(v.0)
    }
}

/// Validated generation payload, ready to be staged as content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedPayload {
    pub title: String,
    pub description: String,
    pub learning_objectives: Vec<String>,
    pub sections: Vec<ContentSection>,
}

pub fn validate_payload(value: &Value) -> Result<GeneratedPayload, ContractViolation> {
    let object = value
        .as_object()
        .ok_or_else(|| violation("payload is not a JSON object".to_string()))?;

    let title = required_text(object, &["title"], "title")?;
    let description = optional_text(object, &["description"]).unwrap_or_default();
    let learning_objectives = text_list(object, &["learning_objectives", "learningObjectives"])?;

    let items = match object.get("sections") {
        None | Some(Value::Null) => return Err(violation("payload has no `sections`".to_string())),
        Some(Value::Array(items)) if items.is_empty() => {
            return Err(violation("`sections` is empty".to_string()))
        }
        Some(Value::Array(items)) => items,
        Some(_) => return Err(violation("`sections` must be a list".to_string())),
    };

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let section = item
            .as_object()
            .ok_or_else(|| violation(format!("sections[{index}] is not an object")))?;

        let module_id = required_id(
            section,
            &["module_id", "moduleId"],
            &format!("sections[{index}].module_id"),
        )?;
        if !seen.insert(module_id.clone()) {
            return Err(violation(format!(
                "duplicate module_id `{module_id}` at sections[{index}]"
            )));
        }

        sections.push(ContentSection {
            module_id,
            title: required_text(section, &["title"], &format!("sections[{index}].title"))?,
            body: required_text(section, &["body"], &format!("sections[{index}].body"))?,
            order_index: index as i32,
        });
    }

    Ok(GeneratedPayload {
        title,
        description,
        learning_objectives,
        sections,
    })
}

fn violation(message: String) -> ContractViolation {
    ContractViolation(message)
}

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| object.get(*k))
}

fn optional_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(object, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn required_text(
    object: &Map<String, Value>,
    keys: &[&str],
    label: &str,
) -> Result<String, ContractViolation> {
    optional_text(object, keys).ok_or_else(|| violation(format!("`{label}` is missing or blank")))
}

/// Like `required_text`, but numeric ids are accepted and rendered as text.
fn required_id(
    object: &Map<String, Value>,
    keys: &[&str],
    label: &str,
) -> Result<String, ContractViolation> {
    match field(object, keys) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => required_text(object, keys, label),
    }
}

fn text_list(object: &Map<String, Value>, keys: &[&str]) -> Result<Vec<String>, ContractViolation> {
    match field(object, keys) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Some(_) => Err(violation(format!("`{}` must be a list of strings", keys[0]))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "title": "SQL for Finance Analysts",
            "description": "Joins and windows with ledger data",
            "learning_objectives": ["Reconcile ledgers with joins", "  "],
            "sections": [
                {"module_id": "m1", "title": "Joins", "body": "Join the GL to sub-ledgers."},
                {"moduleId": "m2", "title": "Windows", "body": "Running balances."}
            ]
        })
    }

    #[test]
    fn test_valid_payload_assigns_positional_order() {
        let payload = validate_payload(&valid()).unwrap();
        assert_eq!(payload.title, "SQL for Finance Analysts");
        assert_eq!(payload.learning_objectives, vec!["Reconcile ledgers with joins"]);
        assert_eq!(payload.sections.len(), 2);
        assert_eq!(payload.sections[1].module_id, "m2");
        assert_eq!(payload.sections[1].order_index, 1);
    }

    #[test]
    fn test_camel_case_objectives_accepted() {
        let mut value = valid();
        let objectives = value["learning_objectives"].take();
        value["learningObjectives"] = objectives;
        value.as_object_mut().unwrap().remove("learning_objectives");
        let payload = validate_payload(&value).unwrap();
        assert_eq!(payload.learning_objectives.len(), 1);
    }

    #[test]
    fn test_missing_sections_rejected() {
        let err = validate_payload(&json!({"title": "T"})).unwrap_err();
        assert!(err.0.contains("sections"));
    }

    #[test]
    fn test_empty_sections_rejected() {
        let err = validate_payload(&json!({"title": "T", "sections": []})).unwrap_err();
        assert_eq!(err.0, "`sections` is empty");
    }

    #[test]
    fn test_blank_title_rejected() {
        let mut value = valid();
        value["title"] = json!("   ");
        let err = validate_payload(&value).unwrap_err();
        assert_eq!(err.0, "`title` is missing or blank");
    }

    #[test]
    fn test_section_without_body_rejected() {
        let mut value = valid();
        value["sections"][0]["body"] = json!("");
        let err = validate_payload(&value).unwrap_err();
        assert_eq!(err.0, "`sections[0].body` is missing or blank");
    }

    #[test]
    fn test_duplicate_module_ids_rejected() {
        let mut value = valid();
        value["sections"][1] = json!({"module_id": "m1", "title": "Again", "body": "..."});
        let err = validate_payload(&value).unwrap_err();
        assert!(err.0.starts_with("duplicate module_id `m1`"));
    }

    #[test]
    fn test_numeric_module_id_accepted() {
        let value = json!({
            "title": "T",
            "sections": [{"module_id": 7, "title": "S", "body": "B"}]
        });
        let payload = validate_payload(&value).unwrap();
        assert_eq!(payload.sections[0].module_id, "7");
    }

    #[test]
    fn test_numeric_title_and_body_rejected() {
        let mut value = valid();
        value["title"] = json!(5);
        let err = validate_payload(&value).unwrap_err();
        assert_eq!(err.0, "`title` is missing or blank");

        let mut value = valid();
        value["sections"][1]["body"] = json!(42);
        let err = validate_payload(&value).unwrap_err();
        assert_eq!(err.0, "`sections[1].body` is missing or blank");
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(validate_payload(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_violation_maps_to_app_error() {
        let err: AppError = ContractViolation("bad".to_string()).into();
        assert!(matches!(err, AppError::GenerationContractViolation(m) if m == "bad"));
    }
}
