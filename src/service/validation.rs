//! Request validation from document rules. Every violation is collected before reporting.

use crate::config::{Row, ValidationRule};
use crate::error::{AppError, FieldError};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Check `input` against per-field rules. Fails with the full list of violations.
    pub fn validate(input: &Row, rules: &BTreeMap<String, ValidationRule>) -> Result<(), AppError> {
        let errors = Self::report(input, rules);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }

    /// All violations, in field order. Empty means valid.
    pub fn report(input: &Row, rules: &BTreeMap<String, ValidationRule>) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for (field, rule) in rules {
            match input.get(field) {
                None | Some(Value::Null) => {
                    if rule.required == Some(true) {
                        errors.push(FieldError::new(field, format!("{} is required", field)));
                    }
                }
                Some(v) => validate_field(field, v, rule, &mut errors),
            }
        }
        errors
    }
}

fn validate_field(field: &str, v: &Value, rule: &ValidationRule, errors: &mut Vec<FieldError>) {
    let mut fail = |message: String| errors.push(FieldError::new(field, message));

    if let Some(t) = rule.type_ {
        if !t.matches(v) {
            // Type mismatch makes the remaining checks meaningless.
            fail(format!("{} must be of type {}", field, t.name()));
            return;
        }
    }
    if let Some(format) = &rule.format {
        if let Some(message) = check_format(field, v, format) {
            fail(message);
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                fail(format!("{} must be at most {} characters", field, max));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                fail(format!("{} must be at least {} characters", field, min));
            }
        }
        if let Some(pattern) = &rule.pattern {
            if !pattern.is_match(s) {
                fail(format!("{} does not match required pattern", field));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            fail(format!(
                "{} must be one of: {}",
                field,
                allowed.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                fail(format!("{} must be at least {}", field, min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                fail(format!("{} must be at most {}", field, max));
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(field: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    let ok = match format.to_lowercase().as_str() {
        "email" => match s.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
            None => false,
        },
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "datetime" => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        }
        _ => true,
    };
    (!ok).then(|| format!("{} must be a valid {}", field, format.to_lowercase()))
}
