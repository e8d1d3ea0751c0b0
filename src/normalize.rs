//! Input normalization and validation.
//!
//! [`normalize_inputs`] turns caller-supplied `{name: value}` pairs into an
//! [`InputSet`] keyed by the lowercased declared input name. Every violation
//! is collected so callers see all problems at once.

use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{CellValue, InputDef, InputSet, InputType, ServiceDefinition};
use crate::{CellgateError, Result, ValidationIssue};

/// Normalize and validate raw inputs against a service's declarations.
///
/// Keys may use any casing and may name an input by its name, an alias or
/// its cell address. A JSON `null` counts as absent. Unknown keys are
/// ignored.
pub fn normalize_inputs(raw: &Map<String, Value>, service: &ServiceDefinition) -> Result<InputSet> {
    // Resolve caller keys to declaration indices. Iteration over the raw map
    // is ordered, so a duplicate key resolves deterministically (last wins).
    let mut supplied: Vec<Option<&Value>> = vec![None; service.inputs.len()];
    for (key, value) in raw {
        let Some(idx) = service.input_index(key) else {
            debug!(service_id = %service.service_id, key = %key, "ignoring undeclared input");
            continue;
        };
        if !value.is_null() {
            supplied[idx] = Some(value);
        }
    }

    let mut issues = Vec::new();
    let mut set = InputSet::new();

    for (def, value) in service.inputs.iter().zip(supplied) {
        let value = match value {
            Some(v) => v,
            None => match &def.default {
                Some(Value::Null) => {
                    set.insert(&def.name, CellValue::Empty);
                    continue;
                }
                Some(default) => default,
                None if def.mandatory => {
                    issues.push(ValidationIssue::new(&def.name, "is required"));
                    continue;
                }
                None => continue,
            },
        };

        match coerce(def, value) {
            Ok(cell) => set.insert(&def.name, cell),
            Err(message) => issues.push(ValidationIssue::new(&def.name, message)),
        }
    }

    if issues.is_empty() {
        Ok(set)
    } else {
        Err(CellgateError::Validation(issues))
    }
}

fn coerce(def: &InputDef, value: &Value) -> std::result::Result<CellValue, String> {
    match def.input_type {
        InputType::Number => {
            let n = to_number(value).ok_or_else(|| format!("expected a number, got {value}"))?;
            if let Some(min) = def.min
                && n < min
            {
                return Err(format!("must be >= {min}, got {n}"));
            }
            if let Some(max) = def.max
                && n > max
            {
                return Err(format!("must be <= {max}, got {n}"));
            }
            Ok(CellValue::Number(n))
        }
        InputType::Boolean => to_bool(value)
            .map(CellValue::Bool)
            .ok_or_else(|| format!("expected a boolean, got {value}")),
        InputType::String => Ok(match value {
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Number(n) => CellValue::Text(n.to_string()),
            Value::Bool(b) => CellValue::Text(b.to_string()),
            other => CellValue::Text(other.to_string()),
        }),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64()? {
            x if x == 0.0 => Some(false),
            x if x == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> ServiceDefinition {
        ServiceDefinition::new("svc", "{}")
            .input(
                InputDef::new("price", "Sheet1!A1", InputType::Number)
                    .mandatory()
                    .min(0.0)
                    .max(1000.0),
            )
            .input(InputDef::new("active", "Sheet1!A2", InputType::Boolean))
            .input(InputDef::new("label", "Sheet1!A3", InputType::String).default_value(json!("none")))
            .input(InputDef::new("note", "Sheet1!A4", InputType::String).default_value(Value::Null))
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn coerces_and_applies_defaults() {
        let set = normalize_inputs(&raw(json!({"PRICE": "12.5", "Active": "yes"})), &service())
            .unwrap();
        assert_eq!(set.get("price"), Some(&CellValue::Number(12.5)));
        assert_eq!(set.get("active"), Some(&CellValue::Bool(true)));
        assert_eq!(set.get("label"), Some(&CellValue::Text("none".into())));
        assert_eq!(set.get("note"), Some(&CellValue::Empty));
    }

    #[test]
    fn address_resolves_input() {
        let set = normalize_inputs(&raw(json!({"sheet1!a1": 3})), &service()).unwrap();
        assert_eq!(set.get("price"), Some(&CellValue::Number(3.0)));
    }

    #[test]
    fn reports_every_violation() {
        let err = normalize_inputs(&raw(json!({"active": "maybe"})), &service()).unwrap_err();
        let CellgateError::Validation(issues) = err else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["price", "active"]);
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range() {
        for bad in [json!("abc"), json!("NaN"), json!(-1), json!(1001), json!(true)] {
            let result = normalize_inputs(&raw(json!({ "price": bad })), &service());
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn null_counts_as_absent() {
        let result = normalize_inputs(&raw(json!({"price": null})), &service());
        assert!(matches!(result, Err(CellgateError::Validation(_))));
    }

    #[test]
    fn string_inputs_pass_through() {
        let set = normalize_inputs(&raw(json!({"price": 1, "label": 42})), &service()).unwrap();
        assert_eq!(set.get("label"), Some(&CellValue::Text("42".into())));
        assert_eq!(set.get("active"), None);
    }
}
