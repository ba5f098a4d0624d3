use metrad_types::status_code::{MetricCode, StatusCode};
use metrad_types::{
    make_error_msg, ConfigDataNode, ConfigValue, Label, Metric, MetricData, Namespace,
    NamespaceElement, Result, UtcTime,
};

use crate::wire::{take, WireDecode, WireEncode, WireError};

/// Wildcard accepting any metrad content type. Resolves to the binary form.
pub const CONTENT_TYPE_ALL: &str = "metrad.*";
/// Self-describing binary metric batches.
pub const CONTENT_TYPE_BIN: &str = "metrad.bin";
/// JSON metric batches with canonical key order.
pub const CONTENT_TYPE_JSON: &str = "metrad.json";

// Field tags of the binary metric record. A decoder skips tags it does not
// recognize, so new fields can be added without breaking old receivers.
const FIELD_NAMESPACE: u8 = 1;
const FIELD_VERSION: u8 = 2;
const FIELD_TIMESTAMP: u8 = 3;
const FIELD_TAGS: u8 = 4;
const FIELD_LABELS: u8 = 5;
const FIELD_DATA: u8 = 6;
const FIELD_CONFIG: u8 = 7;

const DATA_INT64: u8 = 0;
const DATA_UINT64: u8 = 1;
const DATA_FLOAT64: u8 = 2;
const DATA_STR: u8 = 3;
const DATA_BYTES: u8 = 4;
const DATA_BOOL: u8 = 5;

const VALUE_INTEGER: u8 = 0;
const VALUE_STR: u8 = 1;
const VALUE_FLOAT: u8 = 2;
const VALUE_BOOL: u8 = 3;

fn wire_status(err: WireError) -> metrad_types::Status {
    metrad_types::Status::with_message(StatusCode::INVALID_FORMAT, err.to_string())
}

fn encode_namespace(ns: &Namespace, buf: &mut Vec<u8>) {
    (ns.len() as u32).encode(buf);
    for element in ns.elements() {
        match element {
            NamespaceElement::Literal(value) => {
                0u8.encode(buf);
                value.encode(buf);
            }
            NamespaceElement::Dynamic { name, description } => {
                1u8.encode(buf);
                name.encode(buf);
                description.encode(buf);
            }
        }
    }
}

fn decode_namespace(buf: &[u8], offset: &mut usize) -> std::result::Result<Namespace, WireError> {
    let count = u32::decode(buf, offset)? as usize;
    let mut ns = Namespace::default();
    for _ in 0..count {
        match u8::decode(buf, offset)? {
            0 => ns.push(NamespaceElement::Literal(String::decode(buf, offset)?)),
            1 => {
                let name = String::decode(buf, offset)?;
                let description = String::decode(buf, offset)?;
                ns.push(NamespaceElement::Dynamic { name, description });
            }
            value => {
                return Err(WireError::InvalidTag {
                    what: "namespace element",
                    value,
                })
            }
        }
    }
    Ok(ns)
}

fn encode_data(data: &MetricData, buf: &mut Vec<u8>) {
    match data {
        MetricData::Int64(v) => {
            DATA_INT64.encode(buf);
            v.encode(buf);
        }
        MetricData::Uint64(v) => {
            DATA_UINT64.encode(buf);
            v.encode(buf);
        }
        MetricData::Float64(v) => {
            DATA_FLOAT64.encode(buf);
            v.encode(buf);
        }
        MetricData::Str(v) => {
            DATA_STR.encode(buf);
            v.encode(buf);
        }
        MetricData::Bytes(v) => {
            DATA_BYTES.encode(buf);
            v.encode(buf);
        }
        MetricData::Bool(v) => {
            DATA_BOOL.encode(buf);
            v.encode(buf);
        }
    }
}

fn decode_data(buf: &[u8], offset: &mut usize) -> std::result::Result<MetricData, WireError> {
    match u8::decode(buf, offset)? {
        DATA_INT64 => Ok(MetricData::Int64(i64::decode(buf, offset)?)),
        DATA_UINT64 => Ok(MetricData::Uint64(u64::decode(buf, offset)?)),
        DATA_FLOAT64 => Ok(MetricData::Float64(f64::decode(buf, offset)?)),
        DATA_STR => Ok(MetricData::Str(String::decode(buf, offset)?)),
        DATA_BYTES => Ok(MetricData::Bytes(Vec::<u8>::decode(buf, offset)?)),
        DATA_BOOL => Ok(MetricData::Bool(bool::decode(buf, offset)?)),
        value => Err(WireError::InvalidTag {
            what: "metric data",
            value,
        }),
    }
}

fn encode_config(node: &ConfigDataNode, buf: &mut Vec<u8>) {
    (node.len() as u32).encode(buf);
    for (key, value) in node.iter() {
        key.encode(buf);
        match value {
            ConfigValue::Integer(v) => {
                VALUE_INTEGER.encode(buf);
                v.encode(buf);
            }
            ConfigValue::Str(v) => {
                VALUE_STR.encode(buf);
                v.encode(buf);
            }
            ConfigValue::Float(v) => {
                VALUE_FLOAT.encode(buf);
                v.encode(buf);
            }
            ConfigValue::Bool(v) => {
                VALUE_BOOL.encode(buf);
                v.encode(buf);
            }
        }
    }
}

fn decode_config(buf: &[u8], offset: &mut usize) -> std::result::Result<ConfigDataNode, WireError> {
    let count = u32::decode(buf, offset)? as usize;
    let mut node = ConfigDataNode::new();
    for _ in 0..count {
        let key = String::decode(buf, offset)?;
        let value = match u8::decode(buf, offset)? {
            VALUE_INTEGER => ConfigValue::Integer(i64::decode(buf, offset)?),
            VALUE_STR => ConfigValue::Str(String::decode(buf, offset)?),
            VALUE_FLOAT => ConfigValue::Float(f64::decode(buf, offset)?),
            VALUE_BOOL => ConfigValue::Bool(bool::decode(buf, offset)?),
            value => {
                return Err(WireError::InvalidTag {
                    what: "config value",
                    value,
                })
            }
        };
        node.add_item(key, value);
    }
    Ok(node)
}

fn push_field(tag: u8, body: Vec<u8>, buf: &mut Vec<u8>) {
    tag.encode(buf);
    (body.len() as u32).encode(buf);
    buf.extend(body);
}

fn encode_metric(metric: &Metric, buf: &mut Vec<u8>) {
    let mut fields: Vec<(u8, Vec<u8>)> = Vec::with_capacity(7);

    let mut body = Vec::new();
    encode_namespace(&metric.namespace, &mut body);
    fields.push((FIELD_NAMESPACE, body));

    let mut body = Vec::new();
    metric.version.encode(&mut body);
    fields.push((FIELD_VERSION, body));

    let mut body = Vec::new();
    metric.timestamp.timestamp_nanos().encode(&mut body);
    fields.push((FIELD_TIMESTAMP, body));

    if !metric.tags.is_empty() {
        let mut body = Vec::new();
        metric.tags.encode(&mut body);
        fields.push((FIELD_TAGS, body));
    }

    if !metric.labels.is_empty() {
        let mut body = Vec::new();
        (metric.labels.len() as u32).encode(&mut body);
        for label in &metric.labels {
            (label.index as u32).encode(&mut body);
            label.name.encode(&mut body);
        }
        fields.push((FIELD_LABELS, body));
    }

    let mut body = Vec::new();
    encode_data(&metric.data, &mut body);
    fields.push((FIELD_DATA, body));

    if let Some(ref config) = metric.config {
        let mut body = Vec::new();
        encode_config(config, &mut body);
        fields.push((FIELD_CONFIG, body));
    }

    (fields.len() as u8).encode(buf);
    for (tag, body) in fields {
        push_field(tag, body, buf);
    }
}

fn decode_metric(buf: &[u8], offset: &mut usize) -> std::result::Result<Metric, WireError> {
    let field_count = u8::decode(buf, offset)?;
    let mut metric = Metric::new(Namespace::default(), 0, MetricData::Bool(false));
    metric.timestamp = UtcTime::default();

    for _ in 0..field_count {
        let tag = u8::decode(buf, offset)?;
        let len = u32::decode(buf, offset)? as usize;
        let body = take(buf, offset, len)?;
        let mut cursor = 0;
        match tag {
            FIELD_NAMESPACE => metric.namespace = decode_namespace(body, &mut cursor)?,
            FIELD_VERSION => metric.version = u32::decode(body, &mut cursor)?,
            FIELD_TIMESTAMP => {
                metric.timestamp = UtcTime::from_timestamp_nanos(i64::decode(body, &mut cursor)?)
            }
            FIELD_TAGS => metric.tags = WireDecode::decode(body, &mut cursor)?,
            FIELD_LABELS => {
                let count = u32::decode(body, &mut cursor)? as usize;
                for _ in 0..count {
                    let index = u32::decode(body, &mut cursor)? as usize;
                    let name = String::decode(body, &mut cursor)?;
                    metric.labels.push(Label { index, name });
                }
            }
            FIELD_DATA => metric.data = decode_data(body, &mut cursor)?,
            FIELD_CONFIG => metric.config = Some(decode_config(body, &mut cursor)?),
            // Unknown field: the length prefix already skipped it.
            _ => {}
        }
    }
    Ok(metric)
}

/// Serialize a metric batch under a content type.
///
/// Returns the payload and the concrete content type used (the wildcard
/// resolves to the binary form).
pub fn encode_metrics(content_type: &str, metrics: &[Metric]) -> Result<(Vec<u8>, String)> {
    if metrics.is_empty() {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("attempt to encode empty metric batch as {}", content_type),
        );
    }
    match content_type {
        CONTENT_TYPE_ALL | CONTENT_TYPE_BIN => {
            let mut buf = Vec::new();
            (metrics.len() as u32).encode(&mut buf);
            for metric in metrics {
                encode_metric(metric, &mut buf);
            }
            Ok((buf, CONTENT_TYPE_BIN.to_string()))
        }
        CONTENT_TYPE_JSON => {
            let payload = serde_json::to_vec(metrics).map_err(|e| {
                metrad_types::Status::with_message(StatusCode::INVALID_FORMAT, e.to_string())
            })?;
            Ok((payload, CONTENT_TYPE_JSON.to_string()))
        }
        other => make_error_msg(
            MetricCode::CONTENT_TYPE_MISMATCH,
            format!("invalid metrad content type: {}", other),
        ),
    }
}

/// Deserialize a metric batch previously encoded under `content_type`.
pub fn decode_metrics(content_type: &str, payload: &[u8]) -> Result<Vec<Metric>> {
    match content_type {
        CONTENT_TYPE_BIN => {
            let mut offset = 0;
            let count = u32::decode(payload, &mut offset).map_err(wire_status)? as usize;
            let mut metrics = Vec::new();
            for _ in 0..count {
                metrics.push(decode_metric(payload, &mut offset).map_err(wire_status)?);
            }
            Ok(metrics)
        }
        CONTENT_TYPE_JSON => serde_json::from_slice(payload).map_err(|e| {
            metrad_types::Status::with_message(StatusCode::INVALID_FORMAT, e.to_string())
        }),
        other => make_error_msg(
            MetricCode::CONTENT_TYPE_MISMATCH,
            format!("invalid metrad content type for decoding: {}", other),
        ),
    }
}

/// Re-encode a payload from one content type to another.
///
/// Decoding under `from` and encoding under `to` loses nothing for the
/// shared primitive union, so `swap(A, B, swap(B, A, x)) == x`.
pub fn swap_content_type(from: &str, to: &str, payload: &[u8]) -> Result<(Vec<u8>, String)> {
    let metrics = decode_metrics(from, payload)?;
    encode_metrics(to, &metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> Vec<Metric> {
        let mut dynamic_ns = Namespace::from_literals(&["intel", "disk"]);
        dynamic_ns.push(NamespaceElement::dynamic("id", "disk id"));
        dynamic_ns.push(NamespaceElement::literal("read_bytes"));

        let mut with_everything = Metric::new(dynamic_ns, 3, MetricData::Uint64(88_000));
        with_everything.tags.insert("host".into(), "node-7".into());
        with_everything.labels.push(Label {
            index: 2,
            name: "id".into(),
        });
        let mut config = ConfigDataNode::new();
        config.add_item("device", "sda");
        config.add_item("raw", true);
        with_everything.config = Some(config);

        vec![
            Metric::new(
                Namespace::from_literals(&["intel", "dummy", "foo"]),
                2,
                MetricData::Int64(-42),
            ),
            Metric::new(
                Namespace::from_literals(&["intel", "dummy", "bar"]),
                2,
                MetricData::Float64(3.25),
            ),
            Metric::new(
                Namespace::from_literals(&["intel", "dummy", "baz"]),
                1,
                MetricData::Bytes(vec![0, 1, 2, 255]),
            ),
            with_everything,
        ]
    }

    #[test]
    fn test_binary_roundtrip() {
        let metrics = sample_metrics();
        let (payload, ct) = encode_metrics(CONTENT_TYPE_BIN, &metrics).unwrap();
        assert_eq!(ct, CONTENT_TYPE_BIN);
        let decoded = decode_metrics(&ct, &payload).unwrap();
        assert_eq!(decoded, metrics);
    }

    #[test]
    fn test_json_roundtrip() {
        let metrics = sample_metrics();
        let (payload, ct) = encode_metrics(CONTENT_TYPE_JSON, &metrics).unwrap();
        let decoded = decode_metrics(&ct, &payload).unwrap();
        assert_eq!(decoded, metrics);
    }

    #[test]
    fn test_wildcard_resolves_to_binary() {
        let metrics = sample_metrics();
        let (_, ct) = encode_metrics(CONTENT_TYPE_ALL, &metrics).unwrap();
        assert_eq!(ct, CONTENT_TYPE_BIN);
    }

    #[test]
    fn test_swap_is_lossless_both_ways() {
        let metrics = sample_metrics();
        let (bin, _) = encode_metrics(CONTENT_TYPE_BIN, &metrics).unwrap();

        let (json, _) = swap_content_type(CONTENT_TYPE_BIN, CONTENT_TYPE_JSON, &bin).unwrap();
        let (bin_again, _) = swap_content_type(CONTENT_TYPE_JSON, CONTENT_TYPE_BIN, &json).unwrap();
        assert_eq!(bin_again, bin);
    }

    #[test]
    fn test_int_float_stay_distinct_through_json() {
        let metrics = vec![
            Metric::new(
                Namespace::from_literals(&["a"]),
                1,
                MetricData::Int64(7),
            ),
            Metric::new(
                Namespace::from_literals(&["b"]),
                1,
                MetricData::Float64(7.0),
            ),
        ];
        let (json, _) = encode_metrics(CONTENT_TYPE_JSON, &metrics).unwrap();
        let decoded = decode_metrics(CONTENT_TYPE_JSON, &json).unwrap();
        assert_eq!(decoded[0].data, MetricData::Int64(7));
        assert_eq!(decoded[1].data, MetricData::Float64(7.0));
    }

    #[test]
    fn test_unknown_field_is_skipped() {
        let metrics = vec![Metric::new(
            Namespace::from_literals(&["intel", "dummy", "foo"]),
            1,
            MetricData::Bool(true),
        )];
        let (mut payload, _) = encode_metrics(CONTENT_TYPE_BIN, &metrics).unwrap();

        // Append a field with an unrecognized tag and bump the field count.
        let count_offset = 4; // u32 batch count precedes the first metric
        payload[count_offset] += 1;
        200u8.encode(&mut payload);
        3u32.encode(&mut payload);
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let decoded = decode_metrics(CONTENT_TYPE_BIN, &payload).unwrap();
        assert_eq!(decoded, metrics);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(encode_metrics(CONTENT_TYPE_BIN, &[]).is_err());
    }

    #[test]
    fn test_unknown_content_type() {
        let err = encode_metrics("gob", &sample_metrics()).unwrap_err();
        assert_eq!(err.code(), MetricCode::CONTENT_TYPE_MISMATCH);
        let err = decode_metrics("gob", &[]).unwrap_err();
        assert_eq!(err.code(), MetricCode::CONTENT_TYPE_MISMATCH);
    }

    #[test]
    fn test_truncated_binary_fails_cleanly() {
        let metrics = sample_metrics();
        let (payload, _) = encode_metrics(CONTENT_TYPE_BIN, &metrics).unwrap();
        let err = decode_metrics(CONTENT_TYPE_BIN, &payload[..payload.len() / 2]).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_FORMAT);
    }
}
