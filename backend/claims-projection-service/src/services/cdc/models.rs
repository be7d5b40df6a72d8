use rdkafka::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProjectionError, Result};

/// Column names of the `quotes` table as emitted by Debezium (PostgreSQL lowercases them)
pub mod fields {
    pub const QUOTE_ID: &str = "quoteid";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const ADDRESS: &str = "address";
    pub const US_STATE: &str = "usstate";
    pub const LICENSE_PLATE: &str = "licenseplate";
    pub const DESCRIPTION_OF_DAMAGE: &str = "descriptionofdamage";
    pub const CLAIM_STATUS: &str = "claimstatus";
    pub const CLAIM_COST: &str = "claimcost";
}

/// One message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEnvelope {
    pub key: Option<Vec<u8>>,
    /// `None` is a tombstone
    pub value: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl ChangeEnvelope {
    pub fn from_message<M: Message>(msg: &M) -> Self {
        Self {
            key: msg.key().map(<[u8]>::to_vec),
            value: msg.payload().map(<[u8]>::to_vec),
            partition: msg.partition(),
            offset: msg.offset(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// CDC operation types from Debezium
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CdcOperation {
    /// Insert operation (c = create)
    #[serde(rename = "c")]
    Insert,
    /// Update operation (u = update)
    #[serde(rename = "u")]
    Update,
    /// Delete operation (d = delete)
    #[serde(rename = "d")]
    Delete,
    /// Read operation (r = read, initial snapshot)
    #[serde(rename = "r")]
    Read,
}

/// CDC message structure from Debezium
///
/// When `value.converter.schemas.enable = false`, Debezium sends the payload directly
/// without a wrapper object. This enum handles both formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdcMessage {
    /// Format with schema wrapper (value.converter.schemas.enable = true)
    WithSchema { payload: CdcPayload },
    /// Format without schema wrapper (value.converter.schemas.enable = false)
    WithoutSchema(CdcPayload),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CdcPayload {
    /// State before the change (null for Insert)
    pub before: Option<Value>,

    /// State after the change (absent or null for Delete)
    pub after: Option<Value>,

    /// Source metadata (database, table, timestamp, etc.)
    pub source: Option<CdcSource>,

    /// Operation type (c/u/d/r)
    pub op: Option<CdcOperation>,

    /// Transaction timestamp in milliseconds since epoch
    pub ts_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CdcSource {
    pub version: Option<String>,
    pub connector: Option<String>,
    pub name: Option<String>,
    pub ts_ms: Option<i64>,
    pub db: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

impl CdcMessage {
    /// Decode and validate a message value
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let msg: CdcMessage = serde_json::from_slice(bytes)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Get the payload regardless of message format
    pub fn payload(&self) -> &CdcPayload {
        match self {
            CdcMessage::WithSchema { payload } => payload,
            CdcMessage::WithoutSchema(payload) => payload,
        }
    }

    fn into_payload(self) -> CdcPayload {
        match self {
            CdcMessage::WithSchema { payload } => payload,
            CdcMessage::WithoutSchema(payload) => payload,
        }
    }

    /// Validate the CDC message structure
    ///
    /// A bare payload must name its operation, otherwise any JSON object would pass
    /// as a delete. A present `after` must be a row object.
    pub fn validate(&self) -> Result<()> {
        if let CdcMessage::WithoutSchema(payload) = self {
            if payload.op.is_none() {
                return Err(ProjectionError::Decode(
                    "message has neither a 'payload' wrapper nor an 'op' field".to_string(),
                ));
            }
        }

        match &self.payload().after {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(other) => Err(ProjectionError::Decode(format!(
                "'after' must be an object, got {}",
                json_type_name(other)
            ))),
        }
    }

    /// Get the operation type, when the producer supplied one
    pub fn operation(&self) -> Option<CdcOperation> {
        self.payload().op
    }

    /// Get the table name from the CDC message
    pub fn table(&self) -> Option<&str> {
        self.payload()
            .source
            .as_ref()
            .and_then(|s| s.table.as_deref())
    }

    /// Pre-change row, when the producer supplied one as an object
    pub fn before(&self) -> Option<Record> {
        match &self.payload().before {
            Some(Value::Object(map)) => Some(Record(map.clone())),
            _ => None,
        }
    }

    /// Consume the message, yielding the post-change row if the row still exists
    pub fn into_after(self) -> Result<Option<Record>> {
        match self.into_payload().after {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Record::from_value(value).map(Some),
        }
    }
}

/// A full row of the projected table
///
/// Serializes exactly as the `after` object it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProjectionError::Decode(format!(
                "record must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String attribute, `None` when absent or not a string
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Business identifier rendered as text
    pub fn quote_id(&self) -> Option<String> {
        self.0.get(fields::QUOTE_ID).and_then(scalar_text)
    }

    pub fn name(&self) -> Option<&str> {
        self.text(fields::NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.text(fields::EMAIL)
    }

    pub fn address(&self) -> Option<&str> {
        self.text(fields::ADDRESS)
    }

    pub fn us_state(&self) -> Option<&str> {
        self.text(fields::US_STATE)
    }

    pub fn license_plate(&self) -> Option<&str> {
        self.text(fields::LICENSE_PLATE)
    }

    pub fn description_of_damage(&self) -> Option<&str> {
        self.text(fields::DESCRIPTION_OF_DAMAGE)
    }

    /// Claim status is numeric in the system of record but may be text elsewhere
    pub fn claim_status(&self) -> Option<&Value> {
        self.get(fields::CLAIM_STATUS)
    }

    pub fn claim_cost(&self) -> Option<&Value> {
        self.get(fields::CLAIM_COST)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Derive the store key for an envelope.
///
/// Debezium keys are JSON documents (`{"payload":{"quoteid":..}}` with schemas,
/// `{"quoteid":..}` without); plain string/number keys are used as-is. When the
/// broker key is missing the `quoteid` of `row` is used: the post-change row, or
/// the pre-change row of a delete.
pub fn resolve_store_key(key: Option<&[u8]>, row: Option<&Record>) -> Option<String> {
    key.filter(|bytes| !bytes.is_empty())
        .map(key_from_bytes)
        .or_else(|| row.and_then(Record::quote_id))
}

fn key_from_bytes(bytes: &[u8]) -> String {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .as_ref()
        .and_then(key_from_json)
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

fn key_from_json(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(payload) = map.get("payload").filter(|p| p.is_object()) {
                return key_from_json(payload);
            }
            if let Some(id) = map.get(fields::QUOTE_ID) {
                return scalar_text(id);
            }
            // Single-column primary key under another name
            if map.len() == 1 {
                return map.values().next().and_then(scalar_text);
            }
            None
        }
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
