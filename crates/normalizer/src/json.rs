//! JSON object payload parsing.
//!
//! JSON payloads are shallow objects of scalars. Scalar values map
//! directly to typed event fields; `null`, arrays, and nested objects
//! have no field representation and are dropped key-by-key rather than
//! failing the record. The identity keys `sessionId` and `userId` are
//! extracted separately and never appear as payload fields.

use crate::NormalizeError;
use drivetrace_events::EventValue;
use std::collections::HashMap;

const SESSION_ID_KEY: &str = "sessionId";
const USER_ID_KEY: &str = "userId";

/// Outcome of parsing one payload: typed fields plus any inline identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPayload {
    /// Typed payload fields.
    pub fields: HashMap<String, EventValue>,
    /// Inline `sessionId`, if the payload carried one.
    pub session_id: Option<String>,
    /// Inline `userId`, if the payload carried one.
    pub user_id: Option<String>,
}

impl ParsedPayload {
    /// Wrap fields that carry no inline identity (the pipe format).
    pub fn from_fields(fields: HashMap<String, EventValue>) -> Self {
        Self {
            fields,
            session_id: None,
            user_id: None,
        }
    }
}

/// Parse a JSON object payload.
///
/// # Errors
/// [`NormalizeError::MalformedPayload`] when the payload is not valid
/// JSON or the top-level value is not an object.
pub fn parse_json_payload(payload: &str) -> Result<ParsedPayload, NormalizeError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| NormalizeError::MalformedPayload {
            reason: e.to_string(),
        })?;

    let Some(object) = value.as_object() else {
        return Err(NormalizeError::MalformedPayload {
            reason: "top-level JSON value is not an object".to_owned(),
        });
    };

    let mut parsed = ParsedPayload::default();
    for (key, entry) in object {
        match key.as_str() {
            SESSION_ID_KEY => parsed.session_id = entry.as_str().map(str::to_owned),
            USER_ID_KEY => parsed.user_id = entry.as_str().map(str::to_owned),
            _ => {
                if let Some(field) = EventValue::from_json(entry) {
                    parsed.fields.insert(key.clone(), field);
                }
            }
        }
    }
    Ok(parsed)
}
