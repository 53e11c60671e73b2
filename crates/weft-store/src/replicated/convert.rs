//! Mapping between store [`Value`]s and yrs [`Any`] content.
//!
//! `Absent` travels as `Undefined` so that it stays distinct from `Null`
//! on every replica. Integers use `BigInt`, floats `Number`.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use yrs::Any;

pub(crate) fn to_any(value: &Value) -> Any {
    match value {
        Value::Absent => Any::Undefined,
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Int(i) => Any::BigInt(*i),
        Value::Float(f) => Any::Number(*f),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Bytes(bytes) => Any::Buffer(Arc::from(bytes.as_slice())),
        Value::Array(items) => Any::Array(items.iter().map(to_any).collect::<Vec<_>>().into()),
        Value::Object(fields) => Any::Map(Arc::new(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_any(v)))
                .collect::<HashMap<_, _>>(),
        )),
    }
}

pub(crate) fn from_any(any: &Any) -> Value {
    match any {
        Any::Undefined => Value::Absent,
        Any::Null => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::BigInt(i) => Value::Int(*i),
        Any::Number(f) => Value::Float(*f),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Bytes(bytes.to_vec()),
        Any::Array(items) => Value::Array(items.iter().map(from_any).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), from_any(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_absent_and_null_stay_apart() {
        assert_eq!(from_any(&to_any(&Value::Absent)), Value::Absent);
        assert_eq!(from_any(&to_any(&Value::Null)), Value::Null);
    }

    #[test]
    fn test_numbers_keep_their_kind() {
        assert_eq!(from_any(&to_any(&Value::Int(7))), Value::Int(7));
        assert_eq!(from_any(&to_any(&Value::Float(7.0))), Value::Float(7.0));
    }

    #[test]
    fn test_nested_values() {
        let mut fields = BTreeMap::new();
        fields.insert("tags".to_string(), Value::Array(vec![Value::from("a"), Value::Int(2)]));
        fields.insert("raw".to_string(), Value::Bytes(vec![1, 2, 3]));
        let value = Value::Object(fields);
        assert_eq!(from_any(&to_any(&value)), value);
    }
}
