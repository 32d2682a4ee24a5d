//! Special JSON forms of the `google.protobuf` well-known types.
//!
//! `Empty` has no special form and goes through the regular message
//! mapping.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use dynproto_compiler::utils::to_lower_camel;
use dynproto_schema::{ByteBuffer, DynamicMessage, Kind, MapKey, MessageIndex, Registry, Symbol, Value};
use serde_json::{Map, Value as JsonValue};

use crate::{
    error::CodecError,
    json::{describe, element_from_json, element_to_json, join, message_from_json_at, message_to_json_at},
};

/// `0001-01-01T00:00:00Z` and `9999-12-31T23:59:59Z`.
const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;
const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;
/// Roughly 10,000 years.
const MAX_DURATION_SECONDS: i64 = 315_576_000_000;
const MAX_NANOS: i32 = 999_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WellKnownType {
    Any,
    Wrapper,
    Timestamp,
    Duration,
    FieldMask,
    Struct,
    Value,
    ListValue,
}

pub(crate) fn lookup(full_name: &str) -> Option<WellKnownType> {
    let name = full_name.strip_prefix("google.protobuf.")?;
    Some(match name {
        "Any" => WellKnownType::Any,
        "DoubleValue" | "FloatValue" | "Int64Value" | "UInt64Value" | "Int32Value"
        | "UInt32Value" | "BoolValue" | "StringValue" | "BytesValue" => WellKnownType::Wrapper,
        "Timestamp" => WellKnownType::Timestamp,
        "Duration" => WellKnownType::Duration,
        "FieldMask" => WellKnownType::FieldMask,
        "Struct" => WellKnownType::Struct,
        "Value" => WellKnownType::Value,
        "ListValue" => WellKnownType::ListValue,
        _ => return None,
    })
}

pub(crate) fn is_value(full_name: &str) -> bool {
    full_name == "google.protobuf.Value"
}

pub(crate) fn is_null_value(full_name: &str) -> bool {
    full_name == "google.protobuf.NullValue"
}

pub(crate) fn from_json(
    registry: &Registry,
    kind: WellKnownType,
    index: MessageIndex,
    json: &JsonValue,
    path: &str,
    depth: u32,
) -> Result<DynamicMessage, CodecError> {
    let descriptor = registry.message(index);
    let mut message = DynamicMessage::new(index);
    let path = if path.is_empty() { descriptor.full_name.as_str() } else { path };

    match kind {
        // {"@type": "type.googleapis.com/pkg.Msg", <fields of pkg.Msg>}, or
        // {"@type": ..., "value": <json>} when pkg.Msg has a special form
        WellKnownType::Any => {
            let JsonValue::Object(object) = json else {
                return Err(CodecError::mismatch(path, format!("expected a JSON object, got {}", describe(json))));
            };
            if object.is_empty() {
                return Ok(message);
            }
            let type_url = object
                .get("@type")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| CodecError::mismatch(path, "expected a \"@type\" string"))?;
            let embedded_index = resolve_type_url(registry, type_url)?;

            let embedded = if lookup(&registry.message(embedded_index).full_name).is_some() {
                let value = object
                    .get("value")
                    .ok_or_else(|| CodecError::mismatch(path, "expected a \"value\" key"))?;
                message_from_json_at(registry, embedded_index, value, &join(path, "value"), depth + 1)?
            } else {
                let fields: Map<String, JsonValue> = object
                    .iter()
                    .filter(|(key, _)| key.as_str() != "@type")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                message_from_json_at(registry, embedded_index, &JsonValue::Object(fields), path, depth + 1)?
            };
            if let Some(field) = embedded.missing_required(registry) {
                return Err(CodecError::mismatch(&join(path, &field), "required field is missing"));
            }

            message.set(descriptor, 1, Value::String(type_url.to_string()));
            message.set(descriptor, 2, Value::Bytes(embedded.encode(registry)));
        }

        WellKnownType::Wrapper => {
            let field = field_kind(registry, index, 1, path)?;
            let value = element_from_json(registry, field, json, path, depth)?;
            message.set(descriptor, 1, value);
        }

        WellKnownType::Timestamp => {
            let text = expect_str(json, path)?;
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|err| {
                CodecError::mismatch(path, format!("invalid RFC 3339 timestamp {:?}: {}", text, err))
            })?;
            let seconds = parsed.timestamp();
            if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds) {
                return Err(CodecError::mismatch(path, format!("timestamp {:?} is out of range", text)));
            }
            message.set(descriptor, 1, Value::I64(seconds));
            message.set(descriptor, 2, Value::I32(parsed.timestamp_subsec_nanos() as i32));
        }

        WellKnownType::Duration => {
            let text = expect_str(json, path)?;
            let (seconds, nanos) = parse_duration(text)
                .ok_or_else(|| CodecError::mismatch(path, format!("invalid duration {:?}", text)))?;
            message.set(descriptor, 1, Value::I64(seconds));
            message.set(descriptor, 2, Value::I32(nanos));
        }

        WellKnownType::FieldMask => {
            let text = expect_str(json, path)?;
            let paths = text
                .split(',')
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(to_snake_case(p)))
                .collect();
            message.set(descriptor, 1, Value::List(paths));
        }

        WellKnownType::Struct => {
            let JsonValue::Object(object) = json else {
                return Err(CodecError::mismatch(path, format!("expected a JSON object, got {}", describe(json))));
            };
            let value_index = struct_value_index(registry, index, path)?;
            let mut fields = BTreeMap::new();
            for (key, value) in object {
                let entry_path = format!("{}[{}]", path, key);
                let value = message_from_json_at(registry, value_index, value, &entry_path, depth + 1)?;
                fields.insert(MapKey::String(key.clone()), Value::Message(value));
            }
            message.set(descriptor, 1, Value::Map(fields));
        }

        WellKnownType::Value => {
            let (number, value) = match json {
                JsonValue::Null => (1, Value::EnumNumber(0)),
                JsonValue::Number(n) => (2, Value::F64(n.as_f64().unwrap_or_default())),
                JsonValue::String(s) => (3, Value::String(s.clone())),
                JsonValue::Bool(b) => (4, Value::Bool(*b)),
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    let number = if json.is_object() { 5 } else { 6 };
                    let Kind::Message(nested) = field_kind(registry, index, number, path)? else {
                        return Err(CodecError::mismatch(path, "malformed google.protobuf.Value"));
                    };
                    let nested = message_from_json_at(registry, nested, json, path, depth + 1)?;
                    (number, Value::Message(nested))
                }
            };
            message.set(descriptor, number, value);
        }

        WellKnownType::ListValue => {
            let JsonValue::Array(items) = json else {
                return Err(CodecError::mismatch(path, format!("expected a JSON array, got {}", describe(json))));
            };
            let Kind::Message(value_index) = field_kind(registry, index, 1, path)? else {
                return Err(CodecError::mismatch(path, "malformed google.protobuf.ListValue"));
            };
            let values = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let item_path = format!("{}[{}]", path, i);
                    message_from_json_at(registry, value_index, item, &item_path, depth + 1).map(Value::Message)
                })
                .collect::<Result<Vec<_>, _>>()?;
            message.set(descriptor, 1, Value::List(values));
        }
    }

    Ok(message)
}

pub(crate) fn to_json(
    registry: &Registry,
    kind: WellKnownType,
    message: &DynamicMessage,
    path: &str,
    depth: u32,
) -> Result<JsonValue, CodecError> {
    let index = message.descriptor();
    let descriptor = registry.message(index);
    let path = if path.is_empty() { descriptor.full_name.as_str() } else { path };

    match kind {
        WellKnownType::Any => {
            let type_url = match message.get(1) {
                Some(Value::String(url)) => url.as_str(),
                _ => "",
            };
            let bytes: &[u8] = match message.get(2) {
                Some(Value::Bytes(bytes)) => bytes,
                _ => &[],
            };
            if type_url.is_empty() {
                return if bytes.is_empty() {
                    Ok(JsonValue::Object(Map::new()))
                } else {
                    Err(CodecError::mismatch(path, "a google.protobuf.Any with a value needs a type URL"))
                };
            }

            let embedded_index = resolve_type_url(registry, type_url)?;
            let mut embedded = DynamicMessage::new(embedded_index);
            embedded.merge_bb(registry, &mut ByteBuffer::new(bytes), depth + 1)?;

            let mut object = Map::new();
            object.insert("@type".to_string(), JsonValue::String(type_url.to_string()));
            let inner = message_to_json_at(registry, &embedded, path, depth + 1)?;
            if lookup(&registry.message(embedded_index).full_name).is_some() {
                object.insert("value".to_string(), inner);
            } else if let JsonValue::Object(fields) = inner {
                object.extend(fields);
            }
            Ok(JsonValue::Object(object))
        }

        WellKnownType::Wrapper => {
            let field = field_kind(registry, index, 1, path)?;
            let value = message
                .get(1)
                .cloned()
                .unwrap_or_else(|| Value::default_for(registry, field));
            element_to_json(registry, field, &value, path, depth)
        }

        WellKnownType::Timestamp => {
            let (seconds, nanos) = seconds_and_nanos(message);
            let formatted = u32::try_from(nanos)
                .ok()
                .filter(|n| *n <= MAX_NANOS as u32)
                .filter(|_| (MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds))
                .and_then(|nanos| DateTime::from_timestamp(seconds, nanos))
                .map(|time| time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .ok_or_else(|| {
                    CodecError::mismatch(path, format!("timestamp {}s {}ns is out of range", seconds, nanos))
                })?;
            Ok(JsonValue::String(formatted))
        }

        WellKnownType::Duration => {
            let (seconds, nanos) = seconds_and_nanos(message);
            format_duration(seconds, nanos)
                .map(JsonValue::String)
                .ok_or_else(|| {
                    CodecError::mismatch(path, format!("duration {}s {}ns is out of range", seconds, nanos))
                })
        }

        WellKnownType::FieldMask => {
            let paths: Vec<String> = message
                .get(1)
                .map(|v| v.as_list())
                .unwrap_or_default()
                .iter()
                .map(|p| to_lower_camel(p.as_str()))
                .collect();
            Ok(JsonValue::String(paths.join(",")))
        }

        WellKnownType::Struct => {
            let value_index = struct_value_index(registry, index, path)?;
            let mut object = Map::new();
            if let Some(Value::Map(fields)) = message.get(1) {
                for (key, value) in fields {
                    let entry_path = format!("{}[{}]", path, key);
                    object.insert(
                        key.to_string(),
                        element_to_json(registry, Kind::Message(value_index), value, &entry_path, depth)?,
                    );
                }
            }
            Ok(JsonValue::Object(object))
        }

        WellKnownType::Value => match message.fields().next() {
            Some((number, value)) => {
                let field = field_kind(registry, index, number, path)?;
                element_to_json(registry, field, value, path, depth)
            }
            None => Ok(JsonValue::Null),
        },

        WellKnownType::ListValue => {
            let value_kind = field_kind(registry, index, 1, path)?;
            message
                .get(1)
                .map(|v| v.as_list())
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(i, item)| element_to_json(registry, value_kind, item, &format!("{}[{}]", path, i), depth))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array)
        }
    }
}

/// The message a type URL points at. Only the part after the last `/` is
/// looked up.
fn resolve_type_url(registry: &Registry, type_url: &str) -> Result<MessageIndex, CodecError> {
    let name = type_url.rsplit_once('/').map_or(type_url, |(_, name)| name);
    match registry.find_symbol(name) {
        Some(Symbol::Message(index)) => Ok(index),
        _ => Err(CodecError::UnknownSchema(format!(
            "type URL {:?} does not name a known message",
            type_url
        ))),
    }
}

fn field_kind(registry: &Registry, index: MessageIndex, number: u32, path: &str) -> Result<Kind, CodecError> {
    let descriptor = registry.message(index);
    descriptor
        .field_by_number(number)
        .map(|f| f.kind)
        .ok_or_else(|| CodecError::mismatch(path, format!("{} has no field {}", descriptor.full_name, number)))
}

/// The `google.protobuf.Value` message referenced by a `Struct`'s map.
fn struct_value_index(registry: &Registry, index: MessageIndex, path: &str) -> Result<MessageIndex, CodecError> {
    field_kind(registry, index, 1, path)?
        .as_message()
        .and_then(|entry| registry.message(entry).map_entry_fields())
        .and_then(|(_, value)| value.kind.as_message())
        .ok_or_else(|| CodecError::mismatch(path, "malformed google.protobuf.Struct"))
}

fn expect_str<'a>(json: &'a JsonValue, path: &str) -> Result<&'a str, CodecError> {
    json.as_str()
        .ok_or_else(|| CodecError::mismatch(path, format!("expected a string, got {}", describe(json))))
}

fn seconds_and_nanos(message: &DynamicMessage) -> (i64, i32) {
    let seconds = match message.get(1) {
        Some(Value::I64(v)) => *v,
        _ => 0,
    };
    let nanos = match message.get(2) {
        Some(Value::I32(v)) => *v,
        _ => 0,
    };
    (seconds, nanos)
}

/// `"-1.5s"` -> `(-1, -500000000)`
fn parse_duration(text: &str) -> Option<(i64, i32)> {
    let body = text.strip_suffix('s')?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || fraction.len() > 9
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let seconds: i64 = whole.parse().ok()?;
    let nanos: i32 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction).parse().ok()?
    };
    if seconds > MAX_DURATION_SECONDS {
        return None;
    }
    Some(if negative { (-seconds, -nanos) } else { (seconds, nanos) })
}

/// Seconds plus 0, 3, 6 or 9 fractional digits, e.g. `"1.500s"`.
fn format_duration(seconds: i64, nanos: i32) -> Option<String> {
    if seconds.abs() > MAX_DURATION_SECONDS
        || nanos.abs() > MAX_NANOS
        || (seconds > 0 && nanos < 0)
        || (seconds < 0 && nanos > 0)
    {
        return None;
    }

    let mut out = String::new();
    if seconds < 0 || nanos < 0 {
        out.push('-');
    }
    out.push_str(&seconds.unsigned_abs().to_string());
    let nanos = nanos.unsigned_abs();
    if nanos != 0 {
        out.push('.');
        if nanos % 1_000_000 == 0 {
            out.push_str(&format!("{:03}", nanos / 1_000_000));
        } else if nanos % 1_000 == 0 {
            out.push_str(&format!("{:06}", nanos / 1_000));
        } else {
            out.push_str(&format!("{:09}", nanos));
        }
    }
    out.push('s');
    Some(out)
}

/// `fooBar.bazQux` -> `foo_bar.baz_qux`
fn to_snake_case(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    for ch in path.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
