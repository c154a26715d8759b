//! Records, their ordering keys and delete markers.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Field that turns a pushed item into a delete marker. Its value is the key to remove.
pub const DELETE_FIELD: &str = "_del_key";

/// A flat record as pushed by the server. Identity is its key field, nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

/// One item of a push event after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Upsert { key: RecordKey, record: Record },
    Delete { key: RecordKey },
}

impl StreamItem {
    /// Classifies a pushed value.
    ///
    /// Anything that is not an object, and any record without `key_field`, is rejected
    /// so that it can never land in a window without a position.
    pub fn classify(value: Value, key_field: &str) -> Result<Self, String> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(format!("expected an object, got {}", other)),
        };

        if let Some(del) = map.get(DELETE_FIELD) {
            return Ok(StreamItem::Delete {
                key: RecordKey(del.clone()),
            });
        }

        match map.get(key_field) {
            Some(k) => {
                let key = RecordKey(k.clone());
                Ok(StreamItem::Upsert {
                    key,
                    record: Record(map),
                })
            }
            None => Err(format!("record has no '{}' field", key_field)),
        }
    }

    /// The item as it arrived on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            StreamItem::Upsert { record, .. } => Value::Object(record.0.clone()),
            StreamItem::Delete { key } => {
                let mut map = Map::new();
                map.insert(DELETE_FIELD.to_string(), key.0.clone());
                Value::Object(map)
            }
        }
    }
}

/// # Record Key
///
/// A JSON value with a total order, so keys of any type can be compared:
/// `null < bool < number < string < array < object`. Numbers compare numerically,
/// strings by bytes, arrays and objects by their serialized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub Value);

impl RecordKey {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn rank(&self) -> u8 {
        match self.0 {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
}

impl From<Value> for RecordKey {
    fn from(v: Value) -> Self {
        RecordKey(v)
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => cmp_numbers(a, b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                self.0.to_string().cmp(&other.0.to_string())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Exact numeric order. Integers are never rounded through `f64`, so keys above 2^53
/// stay distinct from nearby floats.
fn cmp_numbers(a: &Number, b: &Number) -> Ordering {
    match (as_integer(a), as_integer(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(x), None) => cmp_int_float(x, b.as_f64().unwrap_or(f64::NAN)),
        (None, Some(y)) => cmp_int_float(y, a.as_f64().unwrap_or(f64::NAN)).reverse(),
        (None, None) => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
        }
    }
}

fn cmp_int_float(i: i128, f: f64) -> Ordering {
    // 2^127: every float at or beyond it is outside i128.
    const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;
    if f.is_nan() || f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i128)) {
        Ordering::Equal => whole.partial_cmp(&f).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RecordKey {}
