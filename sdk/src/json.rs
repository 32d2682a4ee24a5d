//! Conversion between [`DynamicMessage`] and the canonical protobuf JSON
//! mapping.

use std::collections::BTreeMap;

use base64::{
    alphabet,
    engine::{general_purpose::STANDARD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use dynproto_schema::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageIndex, Registry, Value, RECURSION_LIMIT,
};
use serde_json::{Map, Number, Value as JsonValue};

use crate::{error::CodecError, well_known};

const PADDING_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PADDING_INDIFFERENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PADDING_INDIFFERENT);

/// Builds a message of type `index` from a parsed JSON document.
///
/// Keys may be either the JSON name or the declared name of a field. Keys
/// that name no field are ignored and `null` leaves a field unset. When
/// several members of a oneof are given, the one appearing last wins.
pub fn message_from_json(
    registry: &Registry,
    index: MessageIndex,
    json: &JsonValue,
) -> Result<DynamicMessage, CodecError> {
    message_from_json_at(registry, index, json, "", 0)
}

/// Renders a message as a JSON object, fields in declaration order.
pub fn message_to_json(registry: &Registry, message: &DynamicMessage) -> Result<JsonValue, CodecError> {
    message_to_json_at(registry, message, "", 0)
}

pub(crate) fn message_from_json_at(
    registry: &Registry,
    index: MessageIndex,
    json: &JsonValue,
    path: &str,
    depth: u32,
) -> Result<DynamicMessage, CodecError> {
    if depth > RECURSION_LIMIT {
        return Err(CodecError::MalformedInput(
            "message nesting exceeds the recursion limit".to_string(),
        ));
    }

    let descriptor = registry.message(index);
    if let Some(kind) = well_known::lookup(&descriptor.full_name) {
        return well_known::from_json(registry, kind, index, json, path, depth);
    }

    let JsonValue::Object(object) = json else {
        return Err(CodecError::mismatch(
            display_path(path, &descriptor.full_name),
            format!("expected a JSON object, got {}", describe(json)),
        ));
    };

    let mut message = DynamicMessage::new(index);
    for (key, value) in object {
        let Some(field) = descriptor.field_by_name(key) else {
            continue;
        };
        if value.is_null() && !accepts_null(registry, field) {
            continue;
        }
        let field_path = join(path, &field.json_name);
        let value = field_from_json(registry, field, value, &field_path, depth)?;
        message.set(descriptor, field.number, value);
    }
    Ok(message)
}

fn field_from_json(
    registry: &Registry,
    field: &FieldDescriptor,
    json: &JsonValue,
    path: &str,
    depth: u32,
) -> Result<Value, CodecError> {
    if let Some((key_field, value_field)) = field
        .kind
        .as_message()
        .and_then(|index| registry.message(index).map_entry_fields())
    {
        let JsonValue::Object(object) = json else {
            return Err(CodecError::mismatch(path, format!("expected a JSON object, got {}", describe(json))));
        };
        let mut entries = BTreeMap::new();
        for (key, value) in object {
            let entry_path = format!("{}[{}]", path, key);
            let key = map_key_from_json(key_field.kind, key, &entry_path)?;
            let value = if value.is_null() && !accepts_null(registry, value_field) {
                Value::default_for(registry, value_field.kind)
            } else {
                element_from_json(registry, value_field.kind, value, &entry_path, depth)?
            };
            entries.insert(key, value);
        }
        return Ok(Value::Map(entries));
    }

    if field.is_repeated() {
        let JsonValue::Array(items) = json else {
            return Err(CodecError::mismatch(path, format!("expected a JSON array, got {}", describe(json))));
        };
        let mut values = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", path, i);
            if item.is_null() && !accepts_null(registry, field) {
                return Err(CodecError::mismatch(&item_path, "null is not allowed in a list"));
            }
            values.push(element_from_json(registry, field.kind, item, &item_path, depth)?);
        }
        return Ok(Value::List(values));
    }

    element_from_json(registry, field.kind, json, path, depth)
}

/// Converts one JSON value into a single element of `kind`.
pub(crate) fn element_from_json(
    registry: &Registry,
    kind: Kind,
    json: &JsonValue,
    path: &str,
    depth: u32,
) -> Result<Value, CodecError> {
    let out_of_range = |v: i128| CodecError::mismatch(path, format!("{} is out of range", v));

    Ok(match kind {
        Kind::Message(index) => {
            Value::Message(message_from_json_at(registry, index, json, path, depth + 1)?)
        }
        Kind::Enum(index) => {
            let descriptor = registry.get_enum(index);
            match json {
                JsonValue::Null if well_known::is_null_value(&descriptor.full_name) => {
                    Value::EnumNumber(0)
                }
                JsonValue::String(name) => match descriptor.value_by_name(name) {
                    Some(value) => Value::EnumNumber(value.number),
                    None => {
                        return Err(CodecError::mismatch(
                            path,
                            format!("{} is not a value of {}", quote(name), descriptor.full_name),
                        ))
                    }
                },
                _ => {
                    let number = integer_from_json(json, path)?;
                    Value::EnumNumber(i32::try_from(number).map_err(|_| out_of_range(number))?)
                }
            }
        }
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            let v = integer_from_json(json, path)?;
            Value::I32(i32::try_from(v).map_err(|_| out_of_range(v))?)
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            let v = integer_from_json(json, path)?;
            Value::I64(i64::try_from(v).map_err(|_| out_of_range(v))?)
        }
        Kind::Uint32 | Kind::Fixed32 => {
            let v = integer_from_json(json, path)?;
            Value::U32(u32::try_from(v).map_err(|_| out_of_range(v))?)
        }
        Kind::Uint64 | Kind::Fixed64 => {
            let v = integer_from_json(json, path)?;
            Value::U64(u64::try_from(v).map_err(|_| out_of_range(v))?)
        }
        Kind::Double => Value::F64(float_from_json(json, path)?),
        Kind::Float => {
            let v = float_from_json(json, path)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(CodecError::mismatch(path, format!("{} is out of range for float", v)));
            }
            Value::F32(v as f32)
        }
        Kind::Bool => match json {
            JsonValue::Bool(v) => Value::Bool(*v),
            other => {
                return Err(CodecError::mismatch(path, format!("expected a boolean, got {}", describe(other))))
            }
        },
        Kind::String => match json {
            JsonValue::String(v) => Value::String(v.clone()),
            other => {
                return Err(CodecError::mismatch(path, format!("expected a string, got {}", describe(other))))
            }
        },
        Kind::Bytes => match json {
            JsonValue::String(v) => Value::Bytes(decode_base64(v).ok_or_else(|| {
                CodecError::mismatch(path, "expected base64 encoded bytes")
            })?),
            other => {
                return Err(CodecError::mismatch(path, format!("expected a string, got {}", describe(other))))
            }
        },
    })
}

/// Map keys always arrive as JSON object keys, i.e. strings.
fn map_key_from_json(kind: Kind, key: &str, path: &str) -> Result<MapKey, CodecError> {
    let invalid = || CodecError::mismatch(path, format!("{} is not a valid map key", quote(key)));
    Ok(match kind {
        Kind::Bool => match key {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(invalid()),
        },
        Kind::String => MapKey::String(key.to_string()),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => MapKey::I32(key.parse().map_err(|_| invalid())?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => MapKey::I64(key.parse().map_err(|_| invalid())?),
        Kind::Uint32 | Kind::Fixed32 => MapKey::U32(key.parse().map_err(|_| invalid())?),
        Kind::Uint64 | Kind::Fixed64 => MapKey::U64(key.parse().map_err(|_| invalid())?),
        _ => return Err(invalid()),
    })
}

/// Accepts JSON numbers with no fractional part and decimal strings.
fn integer_from_json(json: &JsonValue, path: &str) -> Result<i128, CodecError> {
    let parsed = match json {
        JsonValue::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().and_then(integral)),
        JsonValue::String(s) => s
            .trim()
            .parse::<i128>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(integral)),
        _ => None,
    };
    parsed.ok_or_else(|| CodecError::mismatch(path, format!("expected an integer, got {}", describe(json))))
}

fn integral(v: f64) -> Option<i128> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() < 1.9e19).then_some(v as i128)
}

fn float_from_json(json: &JsonValue, path: &str) -> Result<f64, CodecError> {
    let parsed = match json {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        },
        _ => None,
    };
    parsed.ok_or_else(|| CodecError::mismatch(path, format!("expected a number, got {}", describe(json))))
}

/// Standard or URL-safe alphabet, with or without padding.
pub(crate) fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let engine = if text.contains(|c| c == '-' || c == '_') {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };
    engine.decode(text).ok()
}

fn accepts_null(registry: &Registry, field: &FieldDescriptor) -> bool {
    match field.kind {
        Kind::Message(index) => well_known::is_value(&registry.message(index).full_name),
        Kind::Enum(index) => well_known::is_null_value(&registry.get_enum(index).full_name),
        _ => false,
    }
}

pub(crate) fn message_to_json_at(
    registry: &Registry,
    message: &DynamicMessage,
    path: &str,
    depth: u32,
) -> Result<JsonValue, CodecError> {
    if depth > RECURSION_LIMIT {
        return Err(CodecError::MalformedInput(
            "message nesting exceeds the recursion limit".to_string(),
        ));
    }

    let descriptor = registry.message(message.descriptor());
    if let Some(kind) = well_known::lookup(&descriptor.full_name) {
        return well_known::to_json(registry, kind, message, path, depth);
    }

    let mut object = Map::new();
    for field in &descriptor.fields {
        let Some(value) = message.get(field.number) else {
            continue;
        };
        if !descriptor.field_has_presence(field) && value.is_default() {
            continue;
        }
        let field_path = join(path, &field.json_name);
        object.insert(
            field.json_name.clone(),
            field_to_json(registry, field, value, &field_path, depth)?,
        );
    }
    Ok(JsonValue::Object(object))
}

fn field_to_json(
    registry: &Registry,
    field: &FieldDescriptor,
    value: &Value,
    path: &str,
    depth: u32,
) -> Result<JsonValue, CodecError> {
    match value {
        Value::Map(entries) => {
            let value_kind = field
                .kind
                .as_message()
                .and_then(|index| registry.message(index).map_entry_fields())
                .map(|(_, value_field)| value_field.kind)
                .ok_or_else(|| CodecError::mismatch(path, "map value on a field that is not a map"))?;
            let mut object = Map::new();
            for (key, value) in entries {
                let entry_path = format!("{}[{}]", path, key);
                object.insert(key.to_string(), element_to_json(registry, value_kind, value, &entry_path, depth)?);
            }
            Ok(JsonValue::Object(object))
        }
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| element_to_json(registry, field.kind, item, &format!("{}[{}]", path, i), depth))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        single => element_to_json(registry, field.kind, single, path, depth),
    }
}

/// Renders a single element of `kind`.
pub(crate) fn element_to_json(
    registry: &Registry,
    kind: Kind,
    value: &Value,
    path: &str,
    depth: u32,
) -> Result<JsonValue, CodecError> {
    if !value.is_valid_for(kind) {
        return Err(CodecError::mismatch(path, format!("{:?} does not fit the field type", value)));
    }

    Ok(match value {
        Value::Bool(v) => JsonValue::Bool(*v),
        Value::I32(v) => JsonValue::from(*v),
        Value::U32(v) => JsonValue::from(*v),
        Value::I64(v) => JsonValue::String(v.to_string()),
        Value::U64(v) => JsonValue::String(v.to_string()),
        // Round-trip through the shortest f32 text so 0.1f32 prints as 0.1.
        Value::F32(v) => float_to_json(v.to_string().parse::<f64>().unwrap_or(*v as f64)),
        Value::F64(v) => float_to_json(*v),
        Value::String(v) => JsonValue::String(v.clone()),
        Value::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
        Value::EnumNumber(number) => {
            let descriptor = kind.as_enum().map(|index| registry.get_enum(index));
            match descriptor {
                Some(e) if well_known::is_null_value(&e.full_name) => JsonValue::Null,
                Some(e) => match e.value_by_number(*number) {
                    Some(v) => JsonValue::String(v.name.clone()),
                    None => JsonValue::from(*number),
                },
                None => JsonValue::from(*number),
            }
        }
        Value::Message(message) => message_to_json_at(registry, message, path, depth + 1)?,
        Value::List(_) | Value::Map(_) => {
            return Err(CodecError::mismatch(path, "nested lists and maps are not representable"))
        }
    })
}

fn float_to_json(v: f64) -> JsonValue {
    if v.is_nan() {
        JsonValue::String("NaN".to_string())
    } else if v.is_infinite() {
        JsonValue::String(if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else {
        Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
    }
}

pub(crate) fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn display_path<'a>(path: &'a str, type_name: &'a str) -> &'a str {
    if path.is_empty() {
        type_name
    } else {
        path
    }
}

pub(crate) fn describe(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynproto_compiler::compile_with;
    use serde_json::json;
    use std::collections::HashMap;

    const SCHEMA: &str = r#"
        syntax = "proto3";
        package test;

        enum Color {
          COLOR_UNSPECIFIED = 0;
          RED = 1;
          CRIMSON = 1;
          GREEN = 2;
        }

        message Scalars {
          double d = 1;
          float f = 2;
          int32 i32 = 3;
          int64 i64 = 4;
          uint32 u32 = 5;
          uint64 u64 = 6;
          sint32 s32 = 7;
          sint64 s64 = 8;
          fixed32 fx32 = 9;
          fixed64 fx64 = 10;
          sfixed32 sfx32 = 11;
          sfixed64 sfx64 = 12;
          bool flag = 13;
          string text = 14;
          bytes blob = 15;
          Color color = 16;
        }

        message Holder {
          repeated int32 numbers = 1;
          map<int32, string> names = 2;
          map<string, Scalars> nested = 3;
          Scalars single = 4;
          repeated Color colors = 5;
          oneof choice {
            string label = 6;
            int32 code = 7;
          }
          string snake_case_name = 8;
        }
    "#;

    fn registry() -> Registry {
        let sources: HashMap<String, String> =
            [("test.proto".to_string(), SCHEMA.to_string())].into_iter().collect();
        compile_with(&sources, &["test.proto".to_string()]).unwrap()
    }

    fn index(registry: &Registry, name: &str) -> MessageIndex {
        registry
            .find_message(registry.file("test.proto").unwrap(), name)
            .unwrap()
    }

    #[test]
    fn scalars_from_json() {
        let registry = registry();
        let scalars = index(&registry, "Scalars");
        let message = message_from_json(
            &registry,
            scalars,
            &json!({
                "d": "Infinity",
                "f": 1.5,
                "i32": "-7",
                "i64": "12345678901234",
                "u32": 4e3,
                "u64": "18446744073709551615",
                "s32": -1,
                "flag": true,
                "text": "hi",
                "blob": "aGk",
                "color": "GREEN",
            }),
        )
        .unwrap();

        assert_eq!(message.get(1), Some(&Value::F64(f64::INFINITY)));
        assert_eq!(message.get(2), Some(&Value::F32(1.5)));
        assert_eq!(message.get(3), Some(&Value::I32(-7)));
        assert_eq!(message.get(4), Some(&Value::I64(12345678901234)));
        assert_eq!(message.get(5), Some(&Value::U32(4000)));
        assert_eq!(message.get(6), Some(&Value::U64(u64::MAX)));
        assert_eq!(message.get(7), Some(&Value::I32(-1)));
        assert_eq!(message.get(13), Some(&Value::Bool(true)));
        assert_eq!(message.get(14), Some(&Value::String("hi".into())));
        assert_eq!(message.get(15), Some(&Value::Bytes(b"hi".to_vec())));
        assert_eq!(message.get(16), Some(&Value::EnumNumber(2)));
    }

    #[test]
    fn scalars_to_json() {
        let registry = registry();
        let scalars = index(&registry, "Scalars");
        let descriptor = registry.message(scalars);
        let mut message = DynamicMessage::new(scalars);
        message.set(descriptor, 1, Value::F64(f64::NAN));
        message.set(descriptor, 2, Value::F32(0.1));
        message.set(descriptor, 4, Value::I64(-5));
        message.set(descriptor, 14, Value::String(String::new()));
        message.set(descriptor, 15, Value::Bytes(vec![0xfb, 0xff]));
        message.set(descriptor, 16, Value::EnumNumber(1));

        let json = message_to_json(&registry, &message).unwrap();
        assert_eq!(
            json,
            json!({ "d": "NaN", "f": 0.1, "i64": "-5", "blob": "+/8=", "color": "RED" })
        );

        message.set(descriptor, 16, Value::EnumNumber(42));
        let json = message_to_json(&registry, &message).unwrap();
        assert_eq!(json["color"], json!(42));
    }

    #[test]
    fn output_follows_declaration_order() {
        let registry = registry();
        let holder = index(&registry, "Holder");
        let message = message_from_json(
            &registry,
            holder,
            &json!({ "snakeCaseName": "z", "code": 3, "numbers": [1, 2] }),
        )
        .unwrap();
        let text = serde_json::to_string(&message_to_json(&registry, &message).unwrap()).unwrap();
        assert_eq!(text, r#"{"numbers":[1,2],"code":3,"snakeCaseName":"z"}"#);
    }

    #[test]
    fn collections() {
        let registry = registry();
        let holder = index(&registry, "Holder");
        let input = json!({
            "numbers": [1, 2, 3],
            "names": { "2": "two", "-1": "minus one" },
            "nested": { "a": { "text": "x" } },
            "colors": ["RED", 2],
        });
        let message = message_from_json(&registry, holder, &input).unwrap();
        let json = message_to_json(&registry, &message).unwrap();
        assert_eq!(
            json,
            json!({
                "numbers": [1, 2, 3],
                "names": { "-1": "minus one", "2": "two" },
                "nested": { "a": { "text": "x" } },
                "colors": ["RED", "GREEN"],
            })
        );
    }

    #[test]
    fn names_and_nulls() {
        let registry = registry();
        let holder = index(&registry, "Holder");
        let message = message_from_json(
            &registry,
            holder,
            &json!({ "snake_case_name": "a", "single": null, "unknown": [1, 2] }),
        )
        .unwrap();
        assert_eq!(message.len(), 1);
        assert_eq!(message.get(8), Some(&Value::String("a".into())));
    }

    #[test]
    fn oneof_last_wins() {
        let registry = registry();
        let holder = index(&registry, "Holder");
        let message =
            message_from_json(&registry, holder, &json!({ "label": "first", "code": 7 })).unwrap();
        assert!(!message.has(6));
        assert_eq!(message.get(7), Some(&Value::I32(7)));

        let message =
            message_from_json(&registry, holder, &json!({ "code": 7, "label": "second" })).unwrap();
        assert!(!message.has(7));
        assert_eq!(message.get(6), Some(&Value::String("second".into())));
    }

    #[test]
    fn type_mismatches() {
        let registry = registry();
        let scalars = index(&registry, "Scalars");
        let holder = index(&registry, "Holder");

        let cases = [
            (scalars, json!({ "i32": 1.5 }), "i32"),
            (scalars, json!({ "i32": 3000000000u64 }), "i32"),
            (scalars, json!({ "u32": -1 }), "u32"),
            (scalars, json!({ "flag": "true" }), "flag"),
            (scalars, json!({ "text": 5 }), "text"),
            (scalars, json!({ "blob": "!!" }), "blob"),
            (scalars, json!({ "color": "PURPLE" }), "color"),
            (scalars, json!({ "f": 1e300 }), "f"),
            (holder, json!({ "numbers": 5 }), "numbers"),
            (holder, json!({ "names": { "x": "y" } }), "names[x]"),
            (holder, json!({ "single": { "i64": true } }), "single.i64"),
        ];

        for (index, input, expected_field) in cases {
            match message_from_json(&registry, index, &input) {
                Err(CodecError::TypeMismatch { field, .. }) => assert_eq!(field, expected_field, "{}", input),
                other => panic!("expected a type mismatch for {} but got {:?}", input, other),
            }
        }

        assert!(matches!(
            message_from_json(&registry, scalars, &json!([1])),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn base64_variants() {
        assert_eq!(decode_base64("+/8=").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64("+/8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(decode_base64("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64("*").is_none());
    }
}
