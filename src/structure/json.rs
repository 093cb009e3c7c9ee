//! Bridge between the structure tree and `serde_json` host values.
//!
//! JSON objects mold to records of slots, arrays to records of values, and
//! `null` to `Extant`. Going back, attributes become `"@name"` keys and data
//! becomes base64 text.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number};

use super::item::{Field, Item};
use super::num::Num;
use super::record::Record;
use super::value::Value;

impl Value {
    /// Molds a dynamically typed host value into a structure value.
    pub fn from_any(any: serde_json::Value) -> Value {
        match any {
            serde_json::Value::Null => Value::Extant,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => num_from_json(&n),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Record(items.into_iter().map(|v| Item::Value(Value::from_any(v))).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| match k.strip_prefix('@') {
                        Some(name) if !name.is_empty() => Item::attr(name, Value::from_any(v)),
                        _ => Item::slot(k, Value::from_any(v)),
                    })
                    .collect(),
            ),
        }
    }

    /// Best-effort conversion back to a host value.
    ///
    /// Records with any field become objects (positional values are keyed
    /// by their index); pure arrays become arrays. Expressions and `Absent`
    /// map to `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Absent | Value::Extant | Value::Expr(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Num(n) => num_to_json(*n),
            Value::Text(t) => serde_json::Value::String(t.to_string()),
            Value::Data(d) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(d.as_bytes()),
            ),
            Value::Record(r) if r.is_array() => {
                serde_json::Value::Array(r.iter().map(|item| item.to_value().to_json()).collect())
            }
            Value::Record(r) => {
                let mut map = Map::new();
                for (index, item) in r.iter().enumerate() {
                    match item {
                        Item::Field(Field::Attr(k, v)) => {
                            map.insert(format!("@{}", k), v.to_json());
                        }
                        Item::Field(Field::Slot(k, v)) => {
                            map.insert(json_key(k), v.to_json());
                        }
                        Item::Value(v) => {
                            map.insert(index.to_string(), v.to_json());
                        }
                    }
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

fn json_key(key: &Value) -> String {
    match key {
        Value::Text(t) => t.to_string(),
        other => other.to_string(),
    }
}

fn num_from_json(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Num(Num::Int(i))
    } else if let Some(u) = n.as_u64() {
        Value::Num(Num::from(u))
    } else {
        n.as_f64().map(|f| Value::Num(Num::Float(f))).unwrap_or(Value::Absent)
    }
}

fn num_to_json(n: Num) -> serde_json::Value {
    match n {
        Num::Int(i) => serde_json::Value::Number(i.into()),
        Num::Float(f) => Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Molds any serializable host value; serialization failures mold to
/// `Absent` rather than erroring.
pub fn mold_serde<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(json) => Value::from_any(json),
        Err(e) => {
            tracing::trace!(error = %e, "mold failed");
            Value::Absent
        }
    }
}

/// Casts a structure value into a deserializable host type, or `None` when
/// its shape does not match.
pub fn cast_serde<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.to_json()).ok()
}

impl Record {
    /// Object view of the record's text-keyed slots.
    pub fn to_json_object(&self) -> Map<String, serde_json::Value> {
        match Value::Record(self.clone()).to_json() {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Point {
        x: i64,
        y: f64,
        label: Option<String>,
    }

    #[test]
    fn test_from_any_object() {
        let value = Value::from_any(json!({"@tag": null, "a": 1, "b": [true, "x"]}));
        let record = value.as_record().cloned().unwrap_or_default();
        assert_eq!(record.tag(), Some("tag"));
        assert_eq!(record.header(), &Value::Extant);
        assert_eq!(record.get_str("a"), &Value::from(1));
        assert_eq!(
            record.get_str("b"),
            &Value::Record(Record::new().with_item(true).with_item("x"))
        );
    }

    #[test]
    fn test_object_order_survives_both_ways() {
        let text = r#"{"@event":{"node":"/house"},"zone":1,"area":2}"#;
        let value = Value::from_any(serde_json::from_str(text).unwrap());
        assert_eq!(value.tag(), Some("event"));
        let keys: Vec<Value> = value.as_record().map(|r| r.keys().collect()).unwrap_or_default();
        assert_eq!(keys, vec![Value::from("event"), Value::from("zone"), Value::from("area")]);
        assert_eq!(value.to_json().to_string(), text);
    }

    #[test]
    fn test_serde_mold_and_cast() {
        let point = Point { x: 3, y: 0.5, label: Some("p".into()) };
        let value = mold_serde(&point);
        assert_eq!(value.get_str("x"), &Value::from(3));
        assert_eq!(cast_serde::<Point>(&value), Some(point));
    }

    #[test]
    fn test_cast_shape_mismatch_is_none() {
        assert_eq!(cast_serde::<Point>(&Value::from("nope")), None);
    }
}
