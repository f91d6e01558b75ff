use crate::{Result, TaskError, MAX_RECORD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Task payload (opaque JSON, never inspected by the queue)
pub type TaskPayload = Value;

/// A unit of work as it travels through the queues.
///
/// The encoded form is the list element stored in the backing store, and
/// removal matches on exact bytes. A record is therefore immutable once
/// created: fields are private and only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    id: TaskId,
    payload: TaskPayload,
    created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a new record with a fresh id, stamped now
    pub fn new(payload: TaskPayload) -> Self {
        TaskRecord {
            id: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a record from known parts (e.g. when importing from elsewhere)
    pub fn from_parts(id: TaskId, payload: TaskPayload, created_at: DateTime<Utc>) -> Self {
        TaskRecord {
            id,
            payload,
            created_at,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Consume the record, returning its payload
    pub fn into_payload(self) -> TaskPayload {
        self.payload
    }

    /// Serialize to the canonical wire form.
    ///
    /// Fields are written in declaration order, payload object keys come out
    /// sorted and floats use shortest round-trip formatting. As a result
    /// `encode(decode(bytes)) == bytes` for anything this function produced.
    pub fn encode(&self) -> Result<String> {
        let encoded = serde_json::to_string(self)?;
        if encoded.len() > MAX_RECORD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_RECORD_SIZE,
                actual: encoded.len(),
            });
        }
        Ok(encoded)
    }

    /// Deserialize from the wire form
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(TaskError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_record_creation() {
        let record = TaskRecord::new(json!({"kind": "report", "id": 7}));

        assert_eq!(record.payload()["kind"], "report");
        assert!(!record.id().is_nil());
        assert!(record.created_at() <= Utc::now());
    }

    #[test]
    fn test_record_round_trip_is_byte_exact() {
        let record = TaskRecord::new(json!({
            "zeta": [1, 2.5, -3e-7, null],
            "alpha": {"nested": true, "text": "caf\u{e9} \"quoted\""},
            "ratio": 0.1,
        }));

        let bytes = record.encode().unwrap();
        let decoded = TaskRecord::decode(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_encoded_keys_are_canonical() {
        let record = TaskRecord::new(json!({"b": 1, "a": 2}));
        let bytes = record.encode().unwrap();

        let a = bytes.find("\"a\"").unwrap();
        let b = bytes.find("\"b\"").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            TaskRecord::decode("{not json"),
            Err(TaskError::SerializationError(_))
        ));
        assert!(TaskRecord::decode(r#"{"id":"nope","payload":1,"created_at":"x"}"#).is_err());
    }

    #[test]
    fn test_record_size_limit() {
        let record = TaskRecord::new(Value::String("x".repeat(MAX_RECORD_SIZE)));

        match record.encode() {
            Err(TaskError::PayloadTooLarge { max, actual }) => {
                assert_eq!(max, MAX_RECORD_SIZE);
                assert!(actual > MAX_RECORD_SIZE);
            }
            other => panic!("Expected PayloadTooLarge error, got {:?}", other),
        }
    }

    fn arb_payload() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::from),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map(".{0,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_encode_is_stable(payload in arb_payload()) {
            let record = TaskRecord::new(payload);
            let bytes = record.encode().unwrap();
            let decoded = TaskRecord::decode(&bytes).unwrap();

            prop_assert_eq!(&decoded, &record);
            prop_assert_eq!(decoded.encode().unwrap(), bytes);
        }
    }
}
