use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DecodeError;

/// One unit of work pulled off the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionEvent {
    pub action: String,
    pub message: String,
    pub link: String,
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawActionEvent {
    action: String,
    message: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    emails: JsonValue,
}

impl ActionEvent {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawActionEvent = serde_json::from_slice(payload).map_err(DecodeError::Payload)?;

        Ok(Self {
            action: raw.action,
            message: raw.message,
            link: raw.link,
            emails: decode_emails(raw.emails)?,
        })
    }
}

/// Producers send `emails` either as `["a@x.com"]` or as `{"0": "a@x.com"}`.
///
/// The object form is tried first and yields values in key order; only when it
/// does not fit is the array form tried. Absent and `null` mean no emails.
fn decode_emails(value: JsonValue) -> Result<Vec<String>, DecodeError> {
    if value.is_null() {
        return Ok(Vec::new());
    }

    match serde_json::from_value::<BTreeMap<String, String>>(value.clone()) {
        Ok(by_key) => Ok(by_key.into_values().collect()),
        Err(_) => serde_json::from_value::<Vec<String>>(value).map_err(DecodeError::Emails),
    }
}
