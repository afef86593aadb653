//! Change events decoded from database notification payloads.
//!
//! The upstream trigger publishes one JSON object per row change:
//!
//! ```json
//! {"table": "profiles", "operation": "update", "data": {"id": 1}}
//! ```
//!
//! `data` is opaque to the relay. It must be present but may be `null`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PayloadError;

/// Kind of row change that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `TG_OP` spelling (`INSERT`) as well as lowercase.
impl FromStr for Operation {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(PayloadError::UnknownOperation {
                value: s.to_string(),
            }),
        }
    }
}

/// A single row change, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    table: String,
    operation: Operation,
    data: Value,
}

/// Wire shape of a notification payload before validation.
#[derive(Deserialize)]
struct RawPayload {
    table: Option<String>,
    operation: Option<String>,
    #[serde(default, deserialize_with = "present")]
    data: Option<Value>,
}

/// Distinguishes `"data": null` (present) from a missing key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, operation: Operation, data: Value) -> Self {
        Self {
            table: table.into(),
            operation,
            data,
        }
    }

    /// Parse a raw notification payload.
    ///
    /// Fails when the payload is not a JSON object, when `table`,
    /// `operation` or `data` is missing, or when `operation` is not one
    /// of insert/update/delete (case-insensitive).
    pub fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        let raw: RawPayload = serde_json::from_str(payload)?;

        let table = raw
            .table
            .ok_or(PayloadError::MissingField { field: "table" })?;
        let operation = raw
            .operation
            .ok_or(PayloadError::MissingField { field: "operation" })?
            .parse()?;
        let data = raw.data.ok_or(PayloadError::MissingField { field: "data" })?;

        Ok(Self {
            table,
            operation,
            data,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_payload() {
        let event =
            ChangeEvent::from_payload(r#"{"table":"profiles","operation":"update","data":{"id":1}}"#)
                .unwrap();

        assert_eq!(event.table(), "profiles");
        assert_eq!(event.operation(), Operation::Update);
        assert_eq!(event.data(), &json!({"id": 1}));
    }

    #[test]
    fn accepts_trigger_spelling_of_operation() {
        let event =
            ChangeEvent::from_payload(r#"{"table":"roles","operation":"DELETE","data":null}"#)
                .unwrap();
        assert_eq!(event.operation(), Operation::Delete);
        assert_eq!(event.data(), &Value::Null);
    }

    #[test]
    fn missing_operation_is_rejected() {
        let err = ChangeEvent::from_payload(r#"{"table":"profiles"}"#).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::MissingField { field: "operation" }
        ));
    }

    #[test]
    fn missing_data_is_rejected_but_null_data_is_not() {
        let err = ChangeEvent::from_payload(r#"{"table":"t","operation":"insert"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingField { field: "data" }));

        assert!(ChangeEvent::from_payload(r#"{"table":"t","operation":"insert","data":null}"#).is_ok());
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = ChangeEvent::from_payload(r#"{"table":"t","operation":"truncate","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, PayloadError::UnknownOperation { ref value } if value == "truncate"));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(
            ChangeEvent::from_payload("not json").unwrap_err(),
            PayloadError::Json { .. }
        ));
        assert!(matches!(
            ChangeEvent::from_payload("[1,2,3]").unwrap_err(),
            PayloadError::Json { .. }
        ));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let event = ChangeEvent::from_payload(
            r#"{"table":"t","operation":"insert","data":1,"txid":99}"#,
        )
        .unwrap();
        assert_eq!(event.data(), &json!(1));
    }
}
