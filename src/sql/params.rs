//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value that can be bound to a PostgreSQL query. Each variant announces its own wire type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(Value),
    I64Array(Vec<i64>),
    TextArray(Vec<String>),
}

/// Text form used for `column::text` comparisons. None for null.
pub fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numeric reading of a value; numeric strings count.
pub fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer reading of a key: JSON integers and plain decimal digit strings.
fn as_integer(v: &Value) -> Option<i128> {
    match v {
        Value::Number(n) => n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => {
            let s = s.trim();
            let digits = s.strip_prefix('-').unwrap_or(s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse().ok()
        }
        _ => None,
    }
}

/// Key equality across representations: `1` matches `"1"`. Integers compare exactly;
/// floats compare as numbers; everything else by text. Null matches nothing.
pub fn key_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    if let (Some(x), Some(y)) = (as_integer(a), as_integer(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => value_text(a) == value_text(b),
    }
}

impl PgBindValue {
    /// Scalar binding; strings stay text, numbers keep their numeric type.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => PgBindValue::I64(i),
                (None, Some(f)) => PgBindValue::F64(f),
                _ => PgBindValue::Text(n.to_string()),
            },
            Value::String(s) => PgBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    /// Array binding for `= ANY($n)`: integers when every value is one, text otherwise.
    pub fn array_from_json(values: &[Value]) -> Self {
        let ints: Option<Vec<i64>> = values.iter().map(Value::as_i64).collect();
        match ints {
            Some(v) => PgBindValue::I64Array(v),
            None => PgBindValue::TextArray(values.iter().filter_map(value_text).collect()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
            PgBindValue::I64Array(v) => <Vec<i64> as Encode<Postgres>>::encode_by_ref(v, buf)?,
            PgBindValue::TextArray(v) => <Vec<String> as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::Text(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
            PgBindValue::I64Array(_) => <Vec<i64> as Type<Postgres>>::type_info(),
            PgBindValue::TextArray(_) => <Vec<String> as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_conversion() {
        assert_eq!(PgBindValue::from_json(&json!(3)), PgBindValue::I64(3));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from_json(&json!("x")), PgBindValue::Text("x".into()));
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!({"a": 1})), PgBindValue::Json(json!({"a": 1})));
    }

    #[test]
    fn keys_match_across_representations() {
        assert!(key_eq(&json!(1), &json!("1")));
        assert!(key_eq(&json!("abc"), &json!("abc")));
        assert!(!key_eq(&json!(null), &json!(null)));
        assert!(!key_eq(&json!(2), &json!("02x")));
    }

    #[test]
    fn large_ids_and_exponents_stay_distinct() {
        assert!(!key_eq(&json!(9007199254740993_i64), &json!(9007199254740992_i64)));
        assert!(key_eq(&json!(9007199254740993_i64), &json!("9007199254740993")));
        assert!(key_eq(&json!(u64::MAX), &json!("18446744073709551615")));
        assert!(!key_eq(&json!("1e3"), &json!(1000)));
        assert!(key_eq(&json!(1.5), &json!(1.5)));
        assert!(key_eq(&json!(-4), &json!("-4")));
    }

    #[test]
    fn arrays_prefer_integers() {
        assert_eq!(PgBindValue::array_from_json(&[json!(1), json!(2)]), PgBindValue::I64Array(vec![1, 2]));
        assert_eq!(
            PgBindValue::array_from_json(&[json!(1), json!("a")]),
            PgBindValue::TextArray(vec!["1".into(), "a".into()])
        );
    }
}
