use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::CodecError;
use super::event::{Event, Version};

// ============================================================================
// Record Codec
// ============================================================================
//
// Events are stored as flat attribute maps. Every read goes through a checked
// accessor so that a record with an unexpected attribute type surfaces as a
// `CodecError` rather than a panic.
//
// Layout: identity = (AggregateID, Version), everything else is an attribute.
//
// ============================================================================

pub mod attr {
    pub const AGGREGATE_ID: &str = "AggregateID";
    pub const VERSION: &str = "Version";
    pub const AGGREGATE_TYPE: &str = "AggregateType";
    pub const GLOBAL_VERSION: &str = "GlobalVersion";
    pub const DATA: &str = "Data";
    pub const REASON: &str = "Reason";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const METADATA: &str = "Metadata";
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Number(i64),
    Binary(Vec<u8>),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Number(_) => "number",
            AttributeValue::Binary(_) => "binary",
        }
    }
}

/// A single stored record.
pub type Item = BTreeMap<String, AttributeValue>;

pub fn encode_event(event: &Event) -> Result<Item, CodecError> {
    let mut item = Item::new();
    item.insert(attr::AGGREGATE_ID.into(), AttributeValue::Text(event.aggregate_id.clone()));
    item.insert(attr::VERSION.into(), number(attr::VERSION, event.version)?);
    item.insert(attr::AGGREGATE_TYPE.into(), AttributeValue::Text(event.aggregate_type.clone()));
    item.insert(attr::GLOBAL_VERSION.into(), number(attr::GLOBAL_VERSION, event.global_version)?);
    item.insert(attr::DATA.into(), AttributeValue::Binary(event.data.clone()));
    item.insert(attr::REASON.into(), AttributeValue::Text(event.reason.clone()));
    item.insert(
        attr::TIMESTAMP.into(),
        AttributeValue::Text(event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    );
    item.insert(attr::METADATA.into(), AttributeValue::Binary(event.metadata.clone()));
    Ok(item)
}

pub fn decode_event(item: &Item) -> Result<Event, CodecError> {
    let raw_timestamp = read_text(item, attr::TIMESTAMP)?;
    let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|_| CodecError::InvalidTimestamp {
            attribute: attr::TIMESTAMP.to_string(),
            value: raw_timestamp.to_string(),
        })?
        .with_timezone(&Utc);

    Ok(Event {
        aggregate_id: read_text(item, attr::AGGREGATE_ID)?.to_string(),
        aggregate_type: read_text(item, attr::AGGREGATE_TYPE)?.to_string(),
        version: read_u64(item, attr::VERSION)?,
        global_version: read_u64(item, attr::GLOBAL_VERSION)?,
        timestamp,
        reason: read_optional_text(item, attr::REASON)?.unwrap_or_default().to_string(),
        data: read_binary(item, attr::DATA)?.to_vec(),
        metadata: read_optional_binary(item, attr::METADATA)?
            .map(<[u8]>::to_vec)
            .unwrap_or_default(),
    })
}

/// Encode a version as a stored number. Versions beyond `i64::MAX` cannot be stored.
pub fn number(attribute: &str, value: Version) -> Result<AttributeValue, CodecError> {
    i64::try_from(value)
        .map(AttributeValue::Number)
        .map_err(|_| CodecError::OutOfRange {
            attribute: attribute.to_string(),
            value: value.to_string(),
        })
}

fn require<'a>(item: &'a Item, attribute: &str) -> Result<&'a AttributeValue, CodecError> {
    item.get(attribute)
        .ok_or_else(|| CodecError::MissingAttribute(attribute.to_string()))
}

fn mismatch(attribute: &str, expected: &'static str, found: &AttributeValue) -> CodecError {
    CodecError::TypeMismatch {
        attribute: attribute.to_string(),
        expected,
        found: found.type_name(),
    }
}

pub fn read_u64(item: &Item, attribute: &str) -> Result<u64, CodecError> {
    match require(item, attribute)? {
        AttributeValue::Number(n) => u64::try_from(*n).map_err(|_| CodecError::OutOfRange {
            attribute: attribute.to_string(),
            value: n.to_string(),
        }),
        other => Err(mismatch(attribute, "number", other)),
    }
}

pub fn read_text<'a>(item: &'a Item, attribute: &str) -> Result<&'a str, CodecError> {
    match require(item, attribute)? {
        AttributeValue::Text(s) => Ok(s),
        other => Err(mismatch(attribute, "text", other)),
    }
}

pub fn read_binary<'a>(item: &'a Item, attribute: &str) -> Result<&'a [u8], CodecError> {
    match require(item, attribute)? {
        AttributeValue::Binary(b) => Ok(b),
        other => Err(mismatch(attribute, "binary", other)),
    }
}

fn read_optional_text<'a>(item: &'a Item, attribute: &str) -> Result<Option<&'a str>, CodecError> {
    match item.get(attribute) {
        None => Ok(None),
        Some(_) => read_text(item, attribute).map(Some),
    }
}

fn read_optional_binary<'a>(
    item: &'a Item,
    attribute: &str,
) -> Result<Option<&'a [u8]>, CodecError> {
    match item.get(attribute) {
        None => Ok(None),
        Some(_) => read_binary(item, attribute).map(Some),
    }
}
