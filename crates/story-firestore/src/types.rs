//! Firestore REST API types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FirestoreError, FirestoreResult};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

pub type Fields = HashMap<String, Value>;

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Option<Fields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Used as the optimistic-lock token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: Fields) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Last path segment of the resource name.
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }

    pub fn field<T: FromFirestoreValue>(&self, key: &str) -> Option<T> {
        self.fields
            .as_ref()
            .and_then(|f| f.get(key))
            .and_then(T::from_firestore_value)
    }

    /// Decode the document's fields into a serde type.
    pub fn decode<T: DeserializeOwned>(&self) -> FirestoreResult<T> {
        let fields = self.fields.clone().unwrap_or_default();
        serde_json::from_value(fields_to_json(&fields)).map_err(|e| {
            FirestoreError::serialization(format!(
                "Failed to decode {}: {}",
                self.name.as_deref().unwrap_or("<unnamed>"),
                e
            ))
        })
    }
}

/// Encode a serde type as document fields. The type must serialize to a JSON object.
pub fn encode_fields<T: Serialize>(value: &T) -> FirestoreResult<Fields> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, json_to_value(v)))
            .collect()),
        other => Err(FirestoreError::serialization(format!(
            "Expected an object, got {}",
            other
        ))),
    }
}

/// Convert JSON into a Firestore value.
pub fn json_to_value(json: serde_json::Value) -> Value {
    use serde_json::Value as J;
    match json {
        J::Null => Value::NullValue(()),
        J::Bool(b) => Value::BooleanValue(b),
        J::Number(n) => match n.as_i64() {
            Some(i) => Value::IntegerValue(i.to_string()),
            None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        J::String(s) => Value::StringValue(s),
        J::Array(items) => Value::ArrayValue(ArrayValue {
            values: Some(items.into_iter().map(json_to_value).collect()),
        }),
        J::Object(map) => Value::MapValue(MapValue {
            fields: Some(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect()),
        }),
    }
}

/// Convert a Firestore value back into JSON.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        Value::NullValue(()) => J::Null,
        Value::BooleanValue(b) => J::Bool(*b),
        Value::IntegerValue(s) => s
            .parse::<i64>()
            .map(J::from)
            .unwrap_or_else(|_| J::String(s.clone())),
        Value::DoubleValue(f) => serde_json::Number::from_f64(*f)
            .map(J::Number)
            .unwrap_or(J::Null),
        Value::TimestampValue(s)
        | Value::StringValue(s)
        | Value::BytesValue(s)
        | Value::ReferenceValue(s) => J::String(s.clone()),
        Value::ArrayValue(arr) => J::Array(
            arr.values
                .as_ref()
                .map(|v| v.iter().map(value_to_json).collect())
                .unwrap_or_default(),
        ),
        Value::MapValue(map) => fields_to_json(map.fields.as_ref().unwrap_or(&HashMap::new())),
    }
}

fn fields_to_json(fields: &Fields) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

/// List documents response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    pub documents: Option<Vec<Document>>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Batch Write Types
// ============================================================================

/// A single write operation in a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Document>,

    /// Full resource name of a document to delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

impl Write {
    /// Create-only write: fails if the document already exists.
    pub fn create(name: String, fields: Fields) -> Self {
        Self {
            update: Some(Document {
                name: Some(name),
                ..Document::new(fields)
            }),
            current_document: Some(Precondition {
                exists: Some(false),
                update_time: None,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWriteRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub update_time: Option<String>,
}

/// gRPC status of a single write in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// 0 = OK
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// gRPC code for ALREADY_EXISTS.
const GRPC_ALREADY_EXISTS: i32 = 6;
/// gRPC code for FAILED_PRECONDITION.
const GRPC_FAILED_PRECONDITION: i32 = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWriteResponse {
    pub write_results: Option<Vec<WriteResult>>,
    pub status: Option<Vec<Status>>,
}

impl BatchWriteResponse {
    pub fn empty() -> Self {
        Self {
            write_results: Some(vec![]),
            status: Some(vec![]),
        }
    }

    /// Surface the first failed write as an error.
    pub fn check_for_errors(&self) -> FirestoreResult<()> {
        let Some(statuses) = &self.status else {
            return Ok(());
        };
        for (i, status) in statuses.iter().enumerate() {
            let code = status.code.unwrap_or(0);
            if code == 0 {
                continue;
            }
            let msg = format!(
                "Batch write failed at index {}: {} (code {})",
                i,
                status.message.as_deref().unwrap_or("Unknown error"),
                code
            );
            return Err(match code {
                GRPC_ALREADY_EXISTS => FirestoreError::AlreadyExists(msg),
                GRPC_FAILED_PRECONDITION => FirestoreError::PreconditionFailed(msg),
                _ => FirestoreError::request_failed(msg),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Query Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#where: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<Order>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

impl StructuredQuery {
    /// Query one collection under the request's parent path.
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.into(),
                all_descendants: None,
            }],
            r#where: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field_path: impl Into<String>, value: Value) -> Self {
        self.r#where = Some(Filter {
            field_filter: Some(FieldFilter {
                field: FieldReference {
                    field_path: field_path.into(),
                },
                op: "EQUAL".to_string(),
                value,
            }),
        });
        self
    }

    pub fn order_by_desc(mut self, field_path: impl Into<String>) -> Self {
        self.order_by = Some(vec![Order {
            field: FieldReference {
                field_path: field_path.into(),
            },
            direction: "DESCENDING".to_string(),
        }]);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit as i32);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_descendants: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_filter: Option<FieldFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub field: FieldReference,
    pub direction: String,
}

// ============================================================================
// Scalar Conversions
// ============================================================================

/// Convert a Rust value to Firestore Value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u32 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

/// Convert Firestore Value to Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u32 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) if *f >= 0.0 => Some(*f as u32),
            _ => None,
        }
    }
}

impl FromFirestoreValue for bool {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) | Value::StringValue(s) => {
                DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
        tags: Vec<String>,
        nested: Option<HashMap<String, bool>>,
        missing: Option<String>,
    }

    #[test]
    fn test_encode_decode_preserves_struct() {
        let sample = Sample {
            name: "page".into(),
            count: 3,
            tags: vec!["a".into(), "b".into()],
            nested: Some(HashMap::from([("ok".to_string(), true)])),
            missing: None,
        };
        let doc = Document::new(encode_fields(&sample).unwrap());
        assert_eq!(doc.field::<u32>("count"), Some(3));
        assert_eq!(doc.decode::<Sample>().unwrap(), sample);
    }

    #[test]
    fn test_integers_are_sent_as_strings() {
        let value = json_to_value(json!(42));
        assert_eq!(value, Value::IntegerValue("42".into()));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"integerValue": "42"})
        );
    }

    #[test]
    fn test_encode_rejects_non_objects() {
        assert!(encode_fields(&5u32).is_err());
    }

    #[test]
    fn test_doc_id_from_name() {
        let doc = Document {
            name: Some("projects/p/databases/(default)/documents/stories/abc".into()),
            ..Document::new(Fields::new())
        };
        assert_eq!(doc.doc_id(), Some("abc"));
    }

    #[test]
    fn test_batch_status_maps_precondition() {
        let response = BatchWriteResponse {
            write_results: None,
            status: Some(vec![
                Status {
                    code: Some(0),
                    message: None,
                },
                Status {
                    code: Some(9),
                    message: Some("stale".into()),
                },
            ]),
        };
        assert!(response.check_for_errors().unwrap_err().is_precondition_failed());
    }
}
