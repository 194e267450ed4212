//! Payload schema for Qdrant points

use crate::corpus::DocumentRecord;
use qdrant_client::qdrant::{value::Kind, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Metadata projection stored alongside each vector.
///
/// Every field is optional: an abstract without a year, or a point written
/// by an older loader, reads back with the missing fields as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,

    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i64>,
}

impl From<&DocumentRecord> for DocumentPayload {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            pmid: Some(record.id),
            title: record.title.clone(),
            authors: record.authors.clone(),
            abstract_text: record.abstract_text.clone(),
            publication_year: record.publication_year,
        }
    }
}

impl DocumentPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(&self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();

        if let Some(pmid) = self.pmid {
            map.insert("pmid".to_string(), int_to_qdrant(pmid));
        }
        if let Some(ref title) = self.title {
            map.insert("title".to_string(), string_to_qdrant(title));
        }
        if let Some(ref authors) = self.authors {
            map.insert("authors".to_string(), string_to_qdrant(authors));
        }
        if let Some(ref abstract_text) = self.abstract_text {
            map.insert("abstract".to_string(), string_to_qdrant(abstract_text));
        }
        if let Some(year) = self.publication_year {
            map.insert("publication_year".to_string(), int_to_qdrant(year));
        }

        map
    }

    /// Read a payload field by field; unreadable fields become `None`
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        Self {
            pmid: map.get("pmid").and_then(value_as_i64),
            title: map.get("title").and_then(value_as_string),
            authors: map.get("authors").and_then(value_as_string),
            abstract_text: map.get("abstract").and_then(value_as_string),
            publication_year: map.get("publication_year").and_then(value_as_i64),
        }
    }

    /// Read a payload returned by Qdrant
    pub fn from_qdrant_payload(payload: HashMap<String, QdrantValue>) -> Self {
        let map: Map<String, Value> = payload
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect();
        Self::from_json_map(&map)
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::IntegerValue(i)),
    }
}

/// Convert Qdrant value to serde_json Value
pub(crate) fn json_from_qdrant_value(v: QdrantValue) -> Value {
    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}
