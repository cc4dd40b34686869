//! CBOR wire schemas for binding entries, report configurations,
//! notifications and attribute payloads
//!
//! All request and response payloads are CBOR maps with single-character
//! text keys (`u`, `r`, `a`, `n`, `x`, `b`, `t`); attribute identifiers
//! appear as integer keys. Decoders validate the full schema and reject
//! unknown keys so partially understood payloads never reach storage.

use crate::device::{Binding, Notification, Report, ReportAttribute};
use crate::uri::{Uri, UriError};
use crate::value::{InvalidValue, Value};
use ciborium::value::{Integer, Value as Cbor};

/// Error produced when a payload doesn't match its schema; handlers map
/// every variant to 4.00 Bad Request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not well-formed CBOR")]
    Cbor,
    #[error("unexpected payload structure: {0}")]
    Schema(&'static str),
    #[error("invalid destination URI: {0}")]
    Uri(#[from] UriError),
    #[error("invalid attribute value: {0}")]
    Value(#[from] InvalidValue),
}

/// Binding entry as carried by POST/PUT on the binding collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    pub uri: Uri,
    /// Referenced report configuration id, 0 when absent
    pub rid: u8,
}

/// Report configuration entry as carried by POST/PUT on the report
/// collection. A destination URI may ride along to request a companion
/// binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub min_interval: u16,
    pub max_interval: u16,
    pub attributes: Vec<ReportAttribute>,
    pub uri: Option<Uri>,
}

pub fn from_bytes(payload: &[u8]) -> Result<Cbor, DecodeError> {
    ciborium::de::from_reader(payload).map_err(|_| DecodeError::Cbor)
}

pub fn to_bytes(value: &Cbor) -> Vec<u8> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .expect("CBOR encoding into memory cannot fail");
    buffer
}

/// Decodes a binding entry map `{"u": <uri>, "r": <rid>}`; `u` is
/// required, `r` defaults to 0
pub fn decode_binding_entry(payload: &[u8]) -> Result<BindingEntry, DecodeError> {
    let item = from_bytes(payload)?;
    let entries = as_map(&item, "binding entry must be a map")?;
    if entries.is_empty() || entries.len() > 2 {
        return Err(DecodeError::Schema("binding entry expects 1 or 2 keys"));
    }

    let mut rid = 0u8;
    let mut uri = None;
    for (key, value) in entries {
        match key_char(key)? {
            'r' => rid = as_bounded(value, u8::MAX as u64, "report id must be a uint8")? as u8,
            'u' => uri = Some(decode_uri(value)?),
            _ => return Err(DecodeError::Schema("unexpected key in binding entry")),
        }
    }

    let uri = uri.ok_or(DecodeError::Schema("binding entry requires a uri"))?;
    Ok(BindingEntry { uri, rid })
}

/// Encodes a binding instance as `{"u": <uri>, "r": <rid>}`
pub fn encode_binding_entry(binding: &Binding) -> Vec<u8> {
    to_bytes(&Cbor::Map(vec![
        (text('u'), Cbor::Text(binding.uri.to_string())),
        (text('r'), Cbor::Integer(Integer::from(binding.rid))),
    ]))
}

/// Decodes a report configuration map `{"a": …, "n": …, "x": …[, "u": …]}`.
/// The required key set is {a, n, x}.
pub fn decode_report_entry(payload: &[u8]) -> Result<ReportEntry, DecodeError> {
    let item = from_bytes(payload)?;
    let entries = as_map(&item, "report entry must be a map")?;
    if entries.is_empty() || entries.len() > 4 {
        return Err(DecodeError::Schema("report entry expects 1 to 4 keys"));
    }

    let mut attributes = None;
    let mut min_interval = None;
    let mut max_interval = None;
    let mut uri = None;
    for (key, value) in entries {
        match key_char(key)? {
            'a' => attributes = Some(decode_report_attributes(value)?),
            'n' => {
                min_interval = Some(as_bounded(
                    value,
                    u16::MAX as u64,
                    "min interval must be a uint16",
                )? as u16)
            }
            'x' => {
                max_interval = Some(as_bounded(
                    value,
                    u16::MAX as u64,
                    "max interval must be a uint16",
                )? as u16)
            }
            'u' => uri = Some(decode_uri(value)?),
            _ => return Err(DecodeError::Schema("unexpected key in report entry")),
        }
    }

    match (attributes, min_interval, max_interval) {
        (Some(attributes), Some(min_interval), Some(max_interval)) => Ok(ReportEntry {
            min_interval,
            max_interval,
            attributes,
            uri,
        }),
        _ => Err(DecodeError::Schema("report entry requires a, n and x")),
    }
}

/// Decodes the `a` key of a report entry: a map of attribute id to
/// threshold map, at least one attribute, at least one threshold each
fn decode_report_attributes(item: &Cbor) -> Result<Vec<ReportAttribute>, DecodeError> {
    let entries = as_map(item, "attribute configurations must be a map")?;
    if entries.is_empty() {
        return Err(DecodeError::Schema(
            "report entry requires at least one attribute",
        ));
    }

    let mut attributes = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let aid = as_bounded(key, u16::MAX as u64, "attribute id must be a uint16")? as u16;
        let thresholds = as_map(value, "attribute configuration must be a map")?;
        if thresholds.is_empty() {
            return Err(DecodeError::Schema(
                "attribute configuration requires at least one threshold",
            ));
        }

        let mut attribute = ReportAttribute {
            aid,
            ..Default::default()
        };
        for (threshold_key, threshold_value) in thresholds {
            let value = Value::from_cbor(threshold_value)?;
            match key_char(threshold_key)? {
                'h' => attribute.high_threshold = Some(value),
                'l' => attribute.low_threshold = Some(value),
                'r' => attribute.reportable_change = Some(value),
                _ => {
                    return Err(DecodeError::Schema(
                        "unexpected key in attribute configuration",
                    ))
                }
            }
        }
        attributes.push(attribute);
    }
    Ok(attributes)
}

/// Encodes a report configuration as `{"a": …, "n": …, "x": …}`
pub fn encode_report_entry(report: &Report) -> Vec<u8> {
    let mut attributes = Vec::with_capacity(report.attributes.len());
    for attribute in &report.attributes {
        let mut thresholds = Vec::new();
        if let Some(value) = &attribute.high_threshold {
            thresholds.push((text('h'), value.to_cbor()));
        }
        if let Some(value) = &attribute.low_threshold {
            thresholds.push((text('l'), value.to_cbor()));
        }
        if let Some(value) = &attribute.reportable_change {
            thresholds.push((text('r'), value.to_cbor()));
        }
        attributes.push((
            Cbor::Integer(Integer::from(attribute.aid)),
            Cbor::Map(thresholds),
        ));
    }

    to_bytes(&Cbor::Map(vec![
        (text('a'), Cbor::Map(attributes)),
        (
            text('n'),
            Cbor::Integer(Integer::from(report.min_interval)),
        ),
        (
            text('x'),
            Cbor::Integer(Integer::from(report.max_interval)),
        ),
    ]))
}

/// Decodes an inbound notification map with keys {a, b, r, t, u}
pub fn decode_notification(payload: &[u8]) -> Result<Notification, DecodeError> {
    let item = from_bytes(payload)?;
    let entries = as_map(&item, "notification must be a map")?;
    if entries.is_empty() || entries.len() > 5 {
        return Err(DecodeError::Schema("notification expects 1 to 5 keys"));
    }

    let mut notification = Notification {
        attributes: Vec::new(),
        bid: 0,
        rid: 0,
        timestamp: 0,
        uri: None,
    };
    for (key, value) in entries {
        match key_char(key)? {
            'a' => {
                let attributes = as_map(value, "notification attributes must be a map")?;
                for (aid, attribute_value) in attributes {
                    let aid =
                        as_bounded(aid, u16::MAX as u64, "attribute id must be a uint16")? as u16;
                    notification
                        .attributes
                        .push((aid, Value::from_cbor(attribute_value)?));
                }
            }
            'b' => {
                notification.bid =
                    as_bounded(value, u8::MAX as u64, "binding id must be a uint8")? as u8
            }
            'r' => {
                notification.rid =
                    as_bounded(value, u8::MAX as u64, "report id must be a uint8")? as u8
            }
            't' => match Value::from_cbor(value)? {
                Value::Time(seconds) => notification.timestamp = seconds,
                _ => return Err(DecodeError::Schema("timestamp must be an epoch date")),
            },
            'u' => notification.uri = Some(decode_uri(value)?),
            _ => return Err(DecodeError::Schema("unexpected key in notification")),
        }
    }
    Ok(notification)
}

/// Encodes an outbound notification map `{a, b, r, t, u}`
pub fn encode_notification(
    attributes: &[(u16, Value)],
    bid: u8,
    rid: u8,
    timestamp: u64,
    sender: &Uri,
) -> Vec<u8> {
    let attributes = attributes
        .iter()
        .map(|(aid, value)| (Cbor::Integer(Integer::from(*aid)), value.to_cbor()))
        .collect();

    to_bytes(&Cbor::Map(vec![
        (text('a'), Cbor::Map(attributes)),
        (text('b'), Cbor::Integer(Integer::from(bid))),
        (text('r'), Cbor::Integer(Integer::from(rid))),
        (text('t'), Value::Time(timestamp).to_cbor()),
        (text('u'), Cbor::Text(sender.to_string())),
    ]))
}

/// Decodes an attribute write payload: a single-entry map whose integer
/// key is the attribute id
pub fn decode_attribute_write(payload: &[u8]) -> Result<(u16, Value), DecodeError> {
    let item = from_bytes(payload)?;
    let entries = as_map(&item, "attribute write must be a map")?;
    let (key, value) = match entries {
        [entry] => entry,
        _ => return Err(DecodeError::Schema("attribute write expects exactly 1 key")),
    };
    let aid = as_bounded(key, u16::MAX as u64, "attribute id must be a uint16")? as u16;
    Ok((aid, Value::from_cbor(value)?))
}

/// Encodes an attribute read result `{aid: value}`
pub fn encode_attribute_value(aid: u16, value: &Value) -> Vec<u8> {
    to_bytes(&Cbor::Map(vec![(
        Cbor::Integer(Integer::from(aid)),
        value.to_cbor(),
    )]))
}

/// Encodes a CBOR array of numeric identifiers
pub fn encode_id_array(ids: impl IntoIterator<Item = u64>) -> Vec<u8> {
    to_bytes(&Cbor::Array(
        ids.into_iter()
            .map(|id| Cbor::Integer(Integer::from(id)))
            .collect(),
    ))
}

/// Encodes a CBOR array of text items
pub fn encode_text_array(items: impl IntoIterator<Item = String>) -> Vec<u8> {
    to_bytes(&Cbor::Array(items.into_iter().map(Cbor::Text).collect()))
}

fn text(key: char) -> Cbor {
    Cbor::Text(key.to_string())
}

fn as_map<'a>(
    item: &'a Cbor,
    what: &'static str,
) -> Result<&'a [(Cbor, Cbor)], DecodeError> {
    match item {
        Cbor::Map(entries) => Ok(entries),
        _ => Err(DecodeError::Schema(what)),
    }
}

/// Expects a single-character text key
fn key_char(key: &Cbor) -> Result<char, DecodeError> {
    match key {
        Cbor::Text(key) if key.chars().count() == 1 => {
            Ok(key.chars().next().unwrap_or_default())
        }
        _ => Err(DecodeError::Schema("keys must be single-character text")),
    }
}

/// Expects a non-negative integer no larger than `max`
fn as_bounded(item: &Cbor, max: u64, what: &'static str) -> Result<u64, DecodeError> {
    let value = match item {
        Cbor::Integer(value) => u64::try_from(*value).ok(),
        _ => None,
    };
    match value {
        Some(value) if value <= max => Ok(value),
        _ => Err(DecodeError::Schema(what)),
    }
}

fn decode_uri(item: &Cbor) -> Result<Uri, DecodeError> {
    match item {
        Cbor::Text(uri) => Ok(Uri::parse(uri)?),
        _ => Err(DecodeError::Schema("uri must be a text string")),
    }
}

#[cfg(test)]
mod test {
    use super::{
        decode_attribute_write, decode_binding_entry, decode_notification, decode_report_entry,
        encode_binding_entry, encode_report_entry,
    };
    use crate::device::{Binding, Report};
    use crate::uri::Scheme;
    use crate::value::Value;
    use ciborium::value::{Integer, Value as Cbor};

    fn bytes(value: &Cbor) -> Vec<u8> {
        super::to_bytes(value)
    }

    fn text(key: &str) -> Cbor {
        Cbor::Text(key.to_string())
    }

    fn uint(value: u64) -> Cbor {
        Cbor::Integer(Integer::from(value))
    }

    /// Binding entries decode uri and report id; `r` is optional
    #[test]
    fn test_binding_entry() {
        let payload = bytes(&Cbor::Map(vec![
            (text("u"), text("coap://node1/zcl/e/1/s3/n")),
            (text("r"), uint(2)),
        ]));
        let entry = decode_binding_entry(&payload).unwrap();
        assert_eq!(entry.uri.scheme, Scheme::Coap);
        assert_eq!(entry.uri.host, "node1");
        assert_eq!(entry.rid, 2);

        let payload = bytes(&Cbor::Map(vec![(text("u"), text("//peer/n"))]));
        assert_eq!(decode_binding_entry(&payload).unwrap().rid, 0);
    }

    /// A binding entry without its required uri is rejected, as are
    /// unknown keys and out-of-range report ids
    #[test]
    fn test_binding_entry_rejects() {
        let no_uri = bytes(&Cbor::Map(vec![(text("r"), uint(1))]));
        assert!(decode_binding_entry(&no_uri).is_err());

        let unknown = bytes(&Cbor::Map(vec![
            (text("u"), text("//peer/n")),
            (text("z"), uint(1)),
        ]));
        assert!(decode_binding_entry(&unknown).is_err());

        let big_rid = bytes(&Cbor::Map(vec![
            (text("u"), text("//peer/n")),
            (text("r"), uint(256)),
        ]));
        assert!(decode_binding_entry(&big_rid).is_err());

        assert!(decode_binding_entry(&bytes(&Cbor::Array(vec![]))).is_err());
        assert!(decode_binding_entry(b"not cbor at all").is_err());
    }

    /// Bindings round-trip through their wire representation
    #[test]
    fn test_binding_entry_round_trip() {
        let binding = Binding {
            id: 1,
            rid: 3,
            timestamp: 0,
            uri: crate::uri::Uri::new(Scheme::Coaps, "peer", 5684, "/zcl/e/1/s2/n"),
        };
        let entry = decode_binding_entry(&encode_binding_entry(&binding)).unwrap();
        assert_eq!(entry.uri, binding.uri);
        assert_eq!(entry.rid, binding.rid);
    }

    /// Report entries require the full {a, n, x} key set
    #[test]
    fn test_report_entry() {
        let payload = bytes(&Cbor::Map(vec![
            (
                text("a"),
                Cbor::Map(vec![(uint(0), Cbor::Map(vec![(text("r"), uint(1))]))]),
            ),
            (text("n"), uint(2)),
            (text("x"), uint(10)),
        ]));
        let entry = decode_report_entry(&payload).unwrap();
        assert_eq!(entry.min_interval, 2);
        assert_eq!(entry.max_interval, 10);
        assert_eq!(entry.attributes.len(), 1);
        assert_eq!(entry.attributes[0].aid, 0);
        assert_eq!(entry.attributes[0].reportable_change, Some(Value::Uint(1)));
        assert!(entry.uri.is_none());

        let missing = bytes(&Cbor::Map(vec![(text("n"), uint(2)), (text("x"), uint(10))]));
        assert!(decode_report_entry(&missing).is_err());
    }

    /// The optional `u` key carries a companion binding destination
    #[test]
    fn test_report_entry_with_uri() {
        let payload = bytes(&Cbor::Map(vec![
            (
                text("a"),
                Cbor::Map(vec![(uint(1), Cbor::Map(vec![(text("h"), uint(30))]))]),
            ),
            (text("n"), uint(1)),
            (text("x"), uint(60)),
            (text("u"), text("coap://sink/zcl/e/1/s2/n")),
        ]));
        let entry = decode_report_entry(&payload).unwrap();
        assert_eq!(entry.uri.unwrap().host, "sink");
        assert_eq!(entry.attributes[0].high_threshold, Some(Value::Uint(30)));
    }

    /// Report entries round-trip through their wire representation
    #[test]
    fn test_report_entry_round_trip() {
        let report = Report {
            id: 1,
            min_interval: 5,
            max_interval: 300,
            attributes: vec![crate::device::ReportAttribute {
                aid: 7,
                reportable_change: Some(Value::Uint(2)),
                low_threshold: Some(Value::Int(-10)),
                high_threshold: None,
            }],
        };
        let entry = decode_report_entry(&encode_report_entry(&report)).unwrap();
        assert_eq!(entry.min_interval, report.min_interval);
        assert_eq!(entry.max_interval, report.max_interval);
        assert_eq!(entry.attributes, report.attributes);
    }

    /// Notifications decode every field the sender included
    #[test]
    fn test_notification() {
        let payload = bytes(&Cbor::Map(vec![
            (
                text("a"),
                Cbor::Map(vec![(uint(0), Cbor::Text("on".to_string()))]),
            ),
            (text("b"), uint(1)),
            (text("r"), uint(2)),
            (text("t"), Cbor::Tag(1, Box::new(uint(1700000000)))),
            (text("u"), text("coap://node1/zcl/e/1/s3")),
        ]));
        let notification = decode_notification(&payload).unwrap();
        assert_eq!(notification.bid, 1);
        assert_eq!(notification.rid, 2);
        assert_eq!(notification.timestamp, 1700000000);
        assert_eq!(
            notification.attributes,
            vec![(0, Value::String("on".to_string()))]
        );
        assert_eq!(notification.uri.unwrap().host, "node1");

        let bad_time = bytes(&Cbor::Map(vec![(text("t"), uint(5))]));
        assert!(decode_notification(&bad_time).is_err());
    }

    /// Attribute writes must be a single-entry map keyed by the id
    #[test]
    fn test_attribute_write() {
        let payload = bytes(&Cbor::Map(vec![(uint(0), Cbor::Bool(true))]));
        assert_eq!(
            decode_attribute_write(&payload).unwrap(),
            (0, Value::Bool(true))
        );

        let two_keys = bytes(&Cbor::Map(vec![
            (uint(0), Cbor::Bool(true)),
            (uint(1), Cbor::Bool(false)),
        ]));
        assert!(decode_attribute_write(&two_keys).is_err());

        let big_key = bytes(&Cbor::Map(vec![(uint(0x1_0000), Cbor::Bool(true))]));
        assert!(decode_attribute_write(&big_key).is_err());

        let negative_key = bytes(&Cbor::Map(vec![(
            Cbor::Integer(Integer::from(-1)),
            Cbor::Bool(true),
        )]));
        assert!(decode_attribute_write(&negative_key).is_err());
    }
}
