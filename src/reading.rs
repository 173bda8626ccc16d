use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Fractional digits kept by the `value` column (NUMERIC(18, 15)).
pub const VALUE_SCALE: u32 = 15;
/// NUMERIC(18, 15) leaves three integer digits.
const VALUE_LIMIT: Decimal = Decimal::ONE_THOUSAND;

const SUBSCRIPTION_QUERY: &str = "subscription { temperature }";

/// graphql-ws frames that carry no data and are skipped without a warning.
const CONTROL_MESSAGE_TYPES: [&str; 3] = ["connection_ack", "ka", "complete"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, value: Decimal) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<FeedPayload>,
}

#[derive(Debug, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    data: Option<FeedData>,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default)]
    temperature: Option<serde_json::Number>,
}

/// Message sent once per connection to open the subscription.
pub fn subscription_start() -> serde_json::Value {
    serde_json::json!({
        "type": "start",
        "payload": { "query": SUBSCRIPTION_QUERY },
    })
}

/// Extracts `payload.data.temperature` from an inbound feed message.
///
/// Returns `Ok(None)` for protocol frames that never carry a reading
/// (`connection_ack`, `ka`, `complete`). Values are rounded to the storage
/// scale; anything the value column cannot hold is rejected here instead of
/// failing the whole batch at write time.
pub fn decode_temperature(payload: &[u8]) -> Result<Option<Decimal>, DecodeError> {
    let envelope: FeedEnvelope = serde_json::from_slice(payload)?;

    let number = envelope
        .payload
        .and_then(|payload| payload.data)
        .and_then(|data| data.temperature);

    let Some(number) = number else {
        if envelope
            .kind
            .as_deref()
            .is_some_and(|kind| CONTROL_MESSAGE_TYPES.contains(&kind))
        {
            return Ok(None);
        }
        return Err(DecodeError::MissingTemperature {
            kind: envelope.kind,
        });
    };

    let raw = number.to_string();
    let value = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| DecodeError::InvalidNumber(raw))?
        .round_dp(VALUE_SCALE);

    if value.abs() >= VALUE_LIMIT {
        return Err(DecodeError::OutOfRange(value));
    }

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_start_matches_wire_shape() {
        let start = subscription_start();
        assert_eq!(start["type"], "start");
        assert_eq!(start["payload"]["query"], "subscription { temperature }");
        assert_eq!(start.as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn decodes_temperature_from_data_message() {
        let payload = br#"{"type":"data","id":"1","payload":{"data":{"temperature":20.5}}}"#;
        let value = decode_temperature(payload).unwrap();
        assert_eq!(value, Some(Decimal::new(205, 1)));
    }

    #[test]
    fn decodes_integers_and_negative_values() {
        assert_eq!(
            decode_temperature(br#"{"payload":{"data":{"temperature":-12}}}"#).unwrap(),
            Some(Decimal::new(-12, 0))
        );
    }

    #[test]
    fn rounds_to_storage_scale() {
        let payload = br#"{"payload":{"data":{"temperature":1.1234567890123456789}}}"#;
        let value = decode_temperature(payload).unwrap().unwrap();
        assert!(value.scale() <= VALUE_SCALE);
    }

    #[test]
    fn decodes_exponent_notation() {
        let payload = br#"{"payload":{"data":{"temperature":1e-7}}}"#;
        assert_eq!(
            decode_temperature(payload).unwrap(),
            Some(Decimal::new(1, 7))
        );
    }

    #[test]
    fn skips_protocol_frames() {
        assert_eq!(decode_temperature(br#"{"type":"ka"}"#).unwrap(), None);
        assert_eq!(
            decode_temperature(br#"{"type":"connection_ack"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn rejects_messages_without_temperature() {
        let err = decode_temperature(br#"{"type":"data","payload":{"data":{}}}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingTemperature { kind: Some(ref kind) } if kind == "data"
        ));
        assert!(matches!(
            decode_temperature(br#"{"payload":{"errors":[]}}"#),
            Err(DecodeError::MissingTemperature { kind: None })
        ));
    }

    #[test]
    fn rejects_malformed_json_and_wrong_types() {
        assert!(matches!(
            decode_temperature(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_temperature(br#"{"payload":{"data":{"temperature":"warm"}}}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn rejects_values_the_column_cannot_hold() {
        let err = decode_temperature(br#"{"payload":{"data":{"temperature":1000.0}}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange(_)));
        assert!(decode_temperature(br#"{"payload":{"data":{"temperature":999.5}}}"#).is_ok());
    }
}
