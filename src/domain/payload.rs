//! Opaque payload codec.
//!
//! The full application state of a record is kept as one JSON string in the
//! `_data` field. Underscore-prefixed fields are transient and never written.

use crate::domain::value::{Value, Values};
use crate::error::{EntityError, Result};
use serde_json::{Map, Value as JsonValue};

pub fn is_transient(field: &str) -> bool {
    field.starts_with('_')
}

pub fn encode(entity: &str, values: &Values) -> Result<String> {
    let object: Map<String, JsonValue> = values
        .iter()
        .filter(|(k, _)| !is_transient(k))
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    serde_json::to_string(&JsonValue::Object(object))
        .map_err(|e| EntityError::Serialization(format!("cannot encode '{}' payload: {}", entity, e)))
}

pub fn decode(entity: &str, payload: &str) -> Result<Values> {
    let json: JsonValue = serde_json::from_str(payload)
        .map_err(|e| EntityError::Serialization(format!("cannot decode '{}' payload: {}", entity, e)))?;
    match Value::revive(json) {
        Value::Object(map) => Ok(map),
        other => Err(EntityError::Serialization(format!(
            "'{}' payload is a {}, expected an object",
            entity,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn transient_fields_are_not_encoded() {
        let mut values = Values::new();
        values.insert("name".into(), Value::from("ann"));
        values.insert("_cache".into(), Value::from(1));
        let payload = encode("person", &values).unwrap();
        assert_eq!(payload, r#"{"name":"ann"}"#);
    }

    #[test]
    fn dates_survive_a_round_trip() {
        let born = Utc.with_ymd_and_hms(1990, 1, 2, 3, 4, 5).unwrap();
        let mut values = Values::new();
        values.insert("born".into(), Value::Date(born));
        let decoded = decode("person", &encode("person", &values).unwrap()).unwrap();
        assert_eq!(decoded["born"], Value::Date(born));
    }

    #[test]
    fn malformed_payloads_are_serialization_errors() {
        assert!(matches!(decode("person", "{oops"), Err(EntityError::Serialization(_))));
        assert!(matches!(decode("person", "[1]"), Err(EntityError::Serialization(_))));
    }
}
