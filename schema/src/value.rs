use crate::{
    bb::{
        decode_zigzag32, decode_zigzag64, encode_zigzag32, encode_zigzag64, ByteBuffer,
        ByteBufferMut, WireType,
    },
    descriptor::{Cardinality, FieldDescriptor, Kind, MessageDescriptor, MessageIndex},
    error::DecodeError,
    registry::Registry,
};

use std::collections::BTreeMap;
use std::fmt;

/// Nested messages deeper than this are rejected instead of overflowing the stack.
pub const RECURSION_LIMIT: u32 = 100;

/// This type holds dynamic protobuf data.
///
/// Values can represent any field content of a schema and are converted to
/// and from bytes by interpreting the owning [`MessageDescriptor`]. Which
/// variant a field holds is fixed by its [`Kind`] and cardinality: repeated
/// fields hold a [List](#variant.List), map fields a [Map](#variant.Map).
#[derive(Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    EnumNumber(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

/// The subset of values allowed as map keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl MapKey {
    pub fn from_value(value: Value) -> Option<MapKey> {
        Some(match value {
            Value::Bool(v) => MapKey::Bool(v),
            Value::I32(v) => MapKey::I32(v),
            Value::I64(v) => MapKey::I64(v),
            Value::U32(v) => MapKey::U32(v),
            Value::U64(v) => MapKey::U64(v),
            Value::String(v) => MapKey::String(v),
            _ => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(v) => Value::Bool(*v),
            MapKey::I32(v) => Value::I32(*v),
            MapKey::I64(v) => Value::I64(*v),
            MapKey::U32(v) => Value::U32(*v),
            MapKey::U64(v) => Value::U64(*v),
            MapKey::String(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapKey::Bool(v) => v.fmt(f),
            MapKey::I32(v) => v.fmt(f),
            MapKey::I64(v) => v.fmt(f),
            MapKey::U32(v) => v.fmt(f),
            MapKey::U64(v) => v.fmt(f),
            MapKey::String(v) => f.write_str(v),
        }
    }
}

impl Value {
    /// The value an unset singular field of `kind` reads as.
    pub fn default_for(registry: &Registry, kind: Kind) -> Value {
        match kind {
            Kind::Double => Value::F64(0.0),
            Kind::Float => Value::F32(0.0),
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(0),
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(0),
            Kind::Uint32 | Kind::Fixed32 => Value::U32(0),
            Kind::Uint64 | Kind::Fixed64 => Value::U64(0),
            Kind::Bool => Value::Bool(false),
            Kind::String => Value::String(String::new()),
            Kind::Bytes => Value::Bytes(Vec::new()),
            Kind::Enum(index) => Value::EnumNumber(registry.get_enum(index).default_number()),
            Kind::Message(index) => Value::Message(DynamicMessage::new(index)),
        }
    }

    /// True for zero numbers, `false`, empty strings/bytes/lists/maps and enum
    /// number zero. Messages are never considered default.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Bool(v) => !*v,
            Value::I32(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            Value::F32(v) => v.to_bits() == 0,
            Value::F64(v) => v.to_bits() == 0,
            Value::String(v) => v.is_empty(),
            Value::Bytes(v) => v.is_empty(),
            Value::EnumNumber(v) => *v == 0,
            Value::Message(_) => false,
            Value::List(v) => v.is_empty(),
            Value::Map(v) => v.is_empty(),
        }
    }

    /// Whether this variant is the one a single element of `kind` is held in.
    pub fn is_valid_for(&self, kind: Kind) -> bool {
        matches!(
            (kind, self),
            (Kind::Double, Value::F64(_))
                | (Kind::Float, Value::F32(_))
                | (Kind::Int32 | Kind::Sint32 | Kind::Sfixed32, Value::I32(_))
                | (Kind::Int64 | Kind::Sint64 | Kind::Sfixed64, Value::I64(_))
                | (Kind::Uint32 | Kind::Fixed32, Value::U32(_))
                | (Kind::Uint64 | Kind::Fixed64, Value::U64(_))
                | (Kind::Bool, Value::Bool(_))
                | (Kind::String, Value::String(_))
                | (Kind::Bytes, Value::Bytes(_))
                | (Kind::Enum(_), Value::EnumNumber(_))
        ) || matches!((kind, self), (Kind::Message(index), Value::Message(m)) if m.descriptor() == index)
    }

    /// A convenience method to extract a [Message](#variant.Message).
    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(message) => Some(message),
            _ => None,
        }
    }

    /// A convenience method to get the elements of a [List](#variant.List).
    /// Returns an empty slice for other value kinds.
    pub fn as_list(&self) -> &[Value] {
        match self {
            Value::List(values) => values.as_slice(),
            _ => &[],
        }
    }

    /// A convenience method to extract the value out of a [String](#variant.String).
    /// Returns `""` for other value kinds.
    pub fn as_str(&self) -> &str {
        match self {
            Value::String(value) => value.as_str(),
            _ => "",
        }
    }

    /// Decodes one non-message element of `kind`.
    fn read_scalar(field: &FieldDescriptor, kind: Kind, bb: &mut ByteBuffer) -> Result<Value, DecodeError> {
        Ok(match kind {
            Kind::Double => Value::F64(f64::from_bits(bb.read_fixed64()?)),
            Kind::Float => Value::F32(f32::from_bits(bb.read_fixed32()?)),
            Kind::Int32 => Value::I32(bb.read_varint()? as i32),
            Kind::Int64 => Value::I64(bb.read_varint()? as i64),
            Kind::Uint32 => Value::U32(bb.read_varint()? as u32),
            Kind::Uint64 => Value::U64(bb.read_varint()?),
            Kind::Sint32 => Value::I32(decode_zigzag32(bb.read_varint()? as u32)),
            Kind::Sint64 => Value::I64(decode_zigzag64(bb.read_varint()?)),
            Kind::Fixed32 => Value::U32(bb.read_fixed32()?),
            Kind::Fixed64 => Value::U64(bb.read_fixed64()?),
            Kind::Sfixed32 => Value::I32(bb.read_fixed32()? as i32),
            Kind::Sfixed64 => Value::I64(bb.read_fixed64()? as i64),
            Kind::Bool => Value::Bool(bb.read_varint()? != 0),
            Kind::Enum(_) => Value::EnumNumber(bb.read_varint()? as i32),
            Kind::String => {
                let bytes = bb.read_length_delimited()?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| DecodeError::InvalidUtf8(field.name.clone()))?;
                Value::String(text.to_owned())
            }
            Kind::Bytes => Value::Bytes(bb.read_length_delimited()?.to_vec()),
            Kind::Message(_) => unreachable!("messages are decoded by DynamicMessage"),
        })
    }

    /// Writes one non-message element of `kind`, without a tag. The caller
    /// has checked [`is_valid_for`](#method.is_valid_for).
    fn write_scalar(&self, bb: &mut ByteBufferMut) {
        match *self {
            Value::Bool(v) => bb.write_varint(v as u64),
            Value::I32(v) => bb.write_varint(v as i64 as u64),
            Value::I64(v) => bb.write_varint(v as u64),
            Value::U32(v) => bb.write_varint(v as u64),
            Value::U64(v) => bb.write_varint(v),
            Value::EnumNumber(v) => bb.write_varint(v as i64 as u64),
            Value::F32(v) => bb.write_fixed32(v.to_bits()),
            Value::F64(v) => bb.write_fixed64(v.to_bits()),
            Value::String(ref v) => bb.write_length_delimited(v.as_bytes()),
            Value::Bytes(ref v) => bb.write_length_delimited(v),
            Value::Message(_) | Value::List(_) | Value::Map(_) => {}
        }
    }

    /// Like `write_scalar`, but honoring the zigzag and fixed-width encodings
    /// selected by `kind`.
    fn write_element(&self, kind: Kind, bb: &mut ByteBufferMut) {
        match (kind, self) {
            (Kind::Sint32, Value::I32(v)) => bb.write_varint(encode_zigzag32(*v) as u64),
            (Kind::Sint64, Value::I64(v)) => bb.write_varint(encode_zigzag64(*v)),
            (Kind::Sfixed32, Value::I32(v)) => bb.write_fixed32(*v as u32),
            (Kind::Sfixed64, Value::I64(v)) => bb.write_fixed64(*v as u64),
            (Kind::Fixed32, Value::U32(v)) => bb.write_fixed32(*v),
            (Kind::Fixed64, Value::U64(v)) => bb.write_fixed64(*v),
            _ => self.write_scalar(bb),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            Value::Bool(value) => value.fmt(f),
            Value::I32(value) => value.fmt(f),
            Value::I64(value) => value.fmt(f),
            Value::U32(value) => value.fmt(f),
            Value::U64(value) => value.fmt(f),
            Value::F32(value) => value.fmt(f),
            Value::F64(value) => value.fmt(f),
            Value::String(value) => value.fmt(f),
            Value::Bytes(value) => value.fmt(f),
            Value::EnumNumber(value) => write!(f, "enum({})", value),
            Value::Message(value) => value.fmt(f),
            Value::List(values) => values.fmt(f),
            Value::Map(values) => values.fmt(f),
        }
    }
}

/// A message instance manipulated purely through its descriptor.
///
/// Fields are keyed by field number and kept in number order, which is also
/// the order they are written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: MessageIndex,
    fields:     BTreeMap<u32, Value>,
}

impl DynamicMessage {
    pub fn new(descriptor: MessageIndex) -> DynamicMessage {
        DynamicMessage {
            descriptor,
            fields: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> MessageIndex {
        self.descriptor
    }

    pub fn get(&self, number: u32) -> Option<&Value> {
        self.fields.get(&number)
    }

    pub fn has(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Populated fields in field-number order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(number, value)| (*number, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sets a field. Setting a member of a oneof clears the other members of
    /// that oneof, so the last alternative written wins.
    pub fn set(&mut self, descriptor: &MessageDescriptor, number: u32, value: Value) {
        if let Some(field) = descriptor.field_by_number(number) {
            if let Some(oneof) = field.oneof.and_then(|i| descriptor.oneofs.get(i)) {
                for &sibling in &oneof.fields {
                    let sibling = descriptor.fields[sibling].number;
                    if sibling != number {
                        self.fields.remove(&sibling);
                    }
                }
            }
        }
        self.fields.insert(number, value);
    }

    pub fn clear(&mut self, number: u32) -> Option<Value> {
        self.fields.remove(&number)
    }

    /// Decodes a message of type `descriptor` from `bytes`.
    pub fn decode(
        registry: &Registry,
        descriptor: MessageIndex,
        bytes: &[u8],
    ) -> Result<DynamicMessage, DecodeError> {
        let mut message = DynamicMessage::new(descriptor);
        message.merge(registry, bytes)?;
        Ok(message)
    }

    /// Merges the fields found in `bytes` into this message: singular scalars
    /// are overwritten, repeated fields appended, sub-messages merged.
    pub fn merge(&mut self, registry: &Registry, bytes: &[u8]) -> Result<(), DecodeError> {
        self.merge_bb(registry, &mut ByteBuffer::new(bytes), 0)
    }

    /// Encodes this message into an array of bytes.
    pub fn encode(&self, registry: &Registry) -> Vec<u8> {
        let mut bb = ByteBufferMut::new();
        self.encode_bb(registry, &mut bb);
        bb.data()
    }

    /// Path of the first `required` field that is not set, looking inside
    /// sub-messages, lists and map values too. Paths use JSON names, e.g.
    /// `items[2].id`.
    pub fn missing_required(&self, registry: &Registry) -> Option<String> {
        let descriptor = registry.message(self.descriptor);
        for field in &descriptor.fields {
            match self.fields.get(&field.number) {
                None if field.cardinality == Cardinality::Required => {
                    return Some(field.json_name.clone())
                }
                None => {}
                Some(value) => {
                    if let Some(rest) = missing_required_below(registry, value) {
                        return Some(format!("{}{}", field.json_name, rest));
                    }
                }
            }
        }
        None
    }

    /// Decodes fields from `bb` until it is exhausted. Unknown field numbers
    /// are skipped according to their wire type.
    pub fn merge_bb(
        &mut self,
        registry: &Registry,
        bb: &mut ByteBuffer,
        depth: u32,
    ) -> Result<(), DecodeError> {
        if depth > RECURSION_LIMIT {
            return Err(DecodeError::RecursionLimit);
        }
        let descriptor = registry.message(self.descriptor);

        while !bb.is_empty() {
            let (number, wire_type) = bb.read_tag()?;
            match descriptor.field_by_number(number) {
                Some(field) => {
                    self.merge_field(registry, descriptor, field, wire_type, bb, depth)?
                }
                None => bb.skip_field(number, wire_type)?,
            }
        }
        Ok(())
    }

    fn merge_field(
        &mut self,
        registry: &Registry,
        descriptor: &MessageDescriptor,
        field: &FieldDescriptor,
        wire_type: WireType,
        bb: &mut ByteBuffer,
        depth: u32,
    ) -> Result<(), DecodeError> {
        let mismatch = || DecodeError::WireTypeMismatch {
            field:    field.name.clone(),
            expected: field.kind.wire_type(),
            actual:   wire_type,
        };

        if field.is_repeated() {
            if let Kind::Message(entry_index) = field.kind {
                let entry = registry.message(entry_index);
                if wire_type != WireType::LengthDelimited {
                    return Err(mismatch());
                }
                let data = bb.read_length_delimited()?;

                if let Some((key_field, value_field)) = entry.map_entry_fields() {
                    let decoded = DynamicMessage::decode_nested(registry, entry_index, data, depth)?;
                    let key = decoded
                        .get(key_field.number)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(registry, key_field.kind));
                    let value = decoded
                        .get(value_field.number)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(registry, value_field.kind));
                    if let Some(key) = MapKey::from_value(key) {
                        self.map_mut(field.number).insert(key, value);
                    }
                } else {
                    let decoded = DynamicMessage::decode_nested(registry, entry_index, data, depth)?;
                    self.list_mut(field.number).push(Value::Message(decoded));
                }
                return Ok(());
            }

            if wire_type == WireType::LengthDelimited && field.kind.is_packable() {
                let mut packed = ByteBuffer::new(bb.read_length_delimited()?);
                let list = self.list_mut(field.number);
                while !packed.is_empty() {
                    list.push(Value::read_scalar(field, field.kind, &mut packed)?);
                }
                return Ok(());
            }

            if wire_type != field.kind.wire_type() {
                return Err(mismatch());
            }
            let value = Value::read_scalar(field, field.kind, bb)?;
            self.list_mut(field.number).push(value);
            return Ok(());
        }

        if wire_type != field.kind.wire_type() {
            return Err(mismatch());
        }

        if let Kind::Message(index) = field.kind {
            let data = bb.read_length_delimited()?;
            if let Some(Value::Message(existing)) = self.fields.get_mut(&field.number) {
                existing.merge_bb(registry, &mut ByteBuffer::new(data), depth + 1)?;
            } else {
                let decoded = DynamicMessage::decode_nested(registry, index, data, depth)?;
                self.set(descriptor, field.number, Value::Message(decoded));
            }
            return Ok(());
        }

        let value = Value::read_scalar(field, field.kind, bb)?;
        self.set(descriptor, field.number, value);
        Ok(())
    }

    fn decode_nested(
        registry: &Registry,
        descriptor: MessageIndex,
        data: &[u8],
        depth: u32,
    ) -> Result<DynamicMessage, DecodeError> {
        let mut message = DynamicMessage::new(descriptor);
        message.merge_bb(registry, &mut ByteBuffer::new(data), depth + 1)?;
        Ok(message)
    }

    fn list_mut(&mut self, number: u32) -> &mut Vec<Value> {
        let slot = self
            .fields
            .entry(number)
            .or_insert_with(|| Value::List(Vec::new()));
        if !matches!(slot, Value::List(_)) {
            *slot = Value::List(Vec::new());
        }
        match slot {
            Value::List(values) => values,
            _ => unreachable!(),
        }
    }

    fn map_mut(&mut self, number: u32) -> &mut BTreeMap<MapKey, Value> {
        let slot = self
            .fields
            .entry(number)
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(BTreeMap::new());
        }
        match slot {
            Value::Map(values) => values,
            _ => unreachable!(),
        }
    }

    /// Encodes the populated fields to the end of `bb` in field-number order.
    /// Values whose variant does not fit their field's kind are skipped, as
    /// are implicit-presence fields holding their default value.
    pub fn encode_bb(&self, registry: &Registry, bb: &mut ByteBufferMut) {
        let descriptor = registry.message(self.descriptor);

        for (&number, value) in &self.fields {
            let Some(field) = descriptor.field_by_number(number) else {
                continue;
            };
            if !descriptor.field_has_presence(field) && value.is_default() {
                continue;
            }

            match value {
                Value::List(items) => {
                    if field.packed && field.kind.is_packable() {
                        let mut packed = ByteBufferMut::new();
                        for item in items.iter().filter(|item| item.is_valid_for(field.kind)) {
                            item.write_element(field.kind, &mut packed);
                        }
                        bb.write_tag(number, WireType::LengthDelimited);
                        bb.write_length_delimited(&packed.data());
                    } else {
                        for item in items {
                            encode_single(registry, field, item, bb);
                        }
                    }
                }

                Value::Map(entries) => {
                    let Some(entry_index) = field.kind.as_message() else {
                        continue;
                    };
                    let Some((key_field, value_field)) =
                        registry.message(entry_index).map_entry_fields()
                    else {
                        continue;
                    };
                    for (key, value) in entries {
                        let mut entry = ByteBufferMut::new();
                        encode_single(registry, key_field, &key.to_value(), &mut entry);
                        encode_single(registry, value_field, value, &mut entry);
                        bb.write_tag(number, WireType::LengthDelimited);
                        bb.write_length_delimited(&entry.data());
                    }
                }

                single => encode_single(registry, field, single, bb),
            }
        }
    }
}

/// Writes one tagged element of `field`.
fn encode_single(registry: &Registry, field: &FieldDescriptor, value: &Value, bb: &mut ByteBufferMut) {
    if !value.is_valid_for(field.kind) {
        return;
    }
    bb.write_tag(field.number, field.kind.wire_type());
    match value {
        Value::Message(message) => bb.write_length_delimited(&message.encode(registry)),
        other => other.write_element(field.kind, bb),
    }
}

fn missing_required_below(registry: &Registry, value: &Value) -> Option<String> {
    match value {
        Value::Message(message) => message.missing_required(registry).map(|path| format!(".{}", path)),
        Value::List(items) => items.iter().enumerate().find_map(|(i, item)| {
            missing_required_below(registry, item).map(|rest| format!("[{}]{}", i, rest))
        }),
        Value::Map(entries) => entries.iter().find_map(|(key, item)| {
            missing_required_below(registry, item).map(|rest| format!("[{}]{}", key, rest))
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::{
            Cardinality, EnumDescriptor, EnumValueDescriptor, FileDescriptor, OneofDescriptor,
            Syntax,
        },
        registry::RegistryBuilder,
    };

    struct Fixture {
        registry: Registry,
        sample:   MessageIndex,
        child:    MessageIndex,
    }

    fn field(name: &str, number: u32, kind: Kind, cardinality: Cardinality) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            json_name: name.into(),
            number,
            kind,
            cardinality,
            packed: cardinality == Cardinality::Repeated && kind.is_packable(),
            oneof: None,
            proto3_optional: false,
        }
    }

    // message Sample {
    //   int32 a = 1; sint64 b = 2; string c = 3; repeated int32 d = 4;
    //   Child child = 5; map<string, int32> e = 6; Color color = 7;
    //   oneof choice { string x = 8; int32 y = 9; }
    //   repeated Child children = 10; fixed64 f = 11; double g = 12;
    // }
    fn fixture() -> Fixture {
        let mut builder = RegistryBuilder::new();
        let file = builder
            .add_file(FileDescriptor::new("test.proto".into(), "t".into(), Syntax::Proto3))
            .unwrap();
        let new_message = |name: &str| {
            MessageDescriptor::new(name.into(), format!("t.{name}"), file, None, Syntax::Proto3)
        };
        let sample = builder.add_message(new_message("Sample")).unwrap();
        let child = builder.add_message(new_message("Child")).unwrap();
        let mut entry_desc = new_message("Sample.EEntry");
        entry_desc.map_entry = true;
        let entry = builder.add_message(entry_desc).unwrap();
        let color = builder
            .add_enum(EnumDescriptor {
                name: "Color".into(),
                full_name: "t.Color".into(),
                file,
                parent: None,
                values: vec![
                    EnumValueDescriptor { name: "RED".into(), number: 0 },
                    EnumValueDescriptor { name: "GREEN".into(), number: 1 },
                ],
            })
            .unwrap();

        {
            let e = builder.message_mut(entry);
            e.fields.push(field("key", 1, Kind::String, Cardinality::Optional));
            e.fields.push(field("value", 2, Kind::Int32, Cardinality::Optional));
        }
        builder
            .message_mut(child)
            .fields
            .push(field("name", 1, Kind::String, Cardinality::Optional));
        {
            let s = builder.message_mut(sample);
            s.fields.push(field("a", 1, Kind::Int32, Cardinality::Optional));
            s.fields.push(field("b", 2, Kind::Sint64, Cardinality::Optional));
            s.fields.push(field("c", 3, Kind::String, Cardinality::Optional));
            s.fields.push(field("d", 4, Kind::Int32, Cardinality::Repeated));
            s.fields.push(field("child", 5, Kind::Message(child), Cardinality::Optional));
            s.fields.push(field("e", 6, Kind::Message(entry), Cardinality::Repeated));
            s.fields.push(field("color", 7, Kind::Enum(color), Cardinality::Optional));
            let mut x = field("x", 8, Kind::String, Cardinality::Optional);
            x.oneof = Some(0);
            let mut y = field("y", 9, Kind::Int32, Cardinality::Optional);
            y.oneof = Some(0);
            s.fields.push(x);
            s.fields.push(y);
            s.fields.push(field("children", 10, Kind::Message(child), Cardinality::Repeated));
            s.fields.push(field("f", 11, Kind::Fixed64, Cardinality::Optional));
            s.fields.push(field("g", 12, Kind::Double, Cardinality::Optional));
            s.oneofs.push(OneofDescriptor { name: "choice".into(), fields: vec![7, 8] });
        }

        Fixture {
            registry: builder.build(),
            sample,
            child,
        }
    }

    #[test]
    fn encode_scalars() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 1, Value::I32(150));
        msg.set(desc, 2, Value::I64(-2));
        msg.set(desc, 3, Value::String("hi".into()));
        assert_eq!(
            msg.encode(&fx.registry),
            [0x08, 0x96, 0x01, 0x10, 0x03, 0x1a, 0x02, b'h', b'i']
        );
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 1, Value::I32(-1));
        let bytes = msg.encode(&fx.registry);
        assert_eq!(bytes.len(), 11);
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        assert_eq!(decoded.get(1), Some(&Value::I32(-1)));
    }

    #[test]
    fn proto3_defaults_are_not_written() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 1, Value::I32(0));
        msg.set(desc, 3, Value::String(String::new()));
        msg.set(desc, 4, Value::List(vec![]));
        assert!(msg.encode(&fx.registry).is_empty());

        // oneof members keep presence
        msg.set(desc, 9, Value::I32(0));
        assert_eq!(msg.encode(&fx.registry), [0x48, 0x00]);
    }

    #[test]
    fn packed_and_unpacked_repeated() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 4, Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(300)]));
        let packed = msg.encode(&fx.registry);
        assert_eq!(packed, [0x22, 0x04, 0x01, 0x02, 0xac, 0x02]);

        let unpacked = [0x20, 0x01, 0x20, 0x02, 0x20, 0xac, 0x02];
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &unpacked).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn nested_messages_and_maps_round_trip() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let child_desc = fx.registry.message(fx.child);

        let mut child = DynamicMessage::new(fx.child);
        child.set(child_desc, 1, Value::String("kid".into()));

        let mut map = BTreeMap::new();
        map.insert(MapKey::String("one".into()), Value::I32(1));
        map.insert(MapKey::String("two".into()), Value::I32(2));

        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 5, Value::Message(child.clone()));
        msg.set(desc, 6, Value::Map(map));
        msg.set(desc, 7, Value::EnumNumber(1));
        msg.set(desc, 10, Value::List(vec![Value::Message(child.clone()), Value::Message(child)]));
        msg.set(desc, 11, Value::U64(u64::MAX));
        msg.set(desc, 12, Value::F64(1.5));

        let bytes = msg.encode(&fx.registry);
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.encode(&fx.registry), bytes);
    }

    #[test]
    fn map_entry_with_missing_value_reads_default() {
        let fx = fixture();
        // e { key: "k" }
        let bytes = [0x32, 0x03, 0x0a, 0x01, b'k'];
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        let mut expected = BTreeMap::new();
        expected.insert(MapKey::String("k".into()), Value::I32(0));
        assert_eq!(decoded.get(6), Some(&Value::Map(expected)));
    }

    #[test]
    fn oneof_last_write_wins() {
        let fx = fixture();
        let desc = fx.registry.message(fx.sample);
        let mut msg = DynamicMessage::new(fx.sample);
        msg.set(desc, 8, Value::String("x".into()));
        msg.set(desc, 9, Value::I32(5));
        assert!(!msg.has(8));
        assert_eq!(msg.get(9), Some(&Value::I32(5)));

        // same on the wire: x then y
        let bytes = [0x42, 0x01, b'x', 0x48, 0x05];
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let fx = fixture();
        // field 99 varint, field 100 bytes, then a = 7
        let bytes = [0x98, 0x06, 0x01, 0xa2, 0x06, 0x01, 0x00, 0x08, 0x07];
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get(1), Some(&Value::I32(7)));
    }

    #[test]
    fn repeated_singular_message_merges() {
        let fx = fixture();
        // child { name: "a" } child { }
        let bytes = [0x2a, 0x03, 0x0a, 0x01, b'a', 0x2a, 0x00];
        let decoded = DynamicMessage::decode(&fx.registry, fx.sample, &bytes).unwrap();
        let child = decoded.get(5).and_then(Value::as_message).unwrap();
        assert_eq!(child.get(1), Some(&Value::String("a".into())));
    }

    #[test]
    fn malformed_input() {
        let fx = fixture();
        let decode = |bytes: &[u8]| DynamicMessage::decode(&fx.registry, fx.sample, bytes);
        assert!(matches!(decode(&[0x08]), Err(DecodeError::Truncated(_))));
        assert!(matches!(decode(&[0x1a, 0x05, b'a']), Err(DecodeError::Truncated(_))));
        assert!(matches!(decode(&[0x1a, 0x01, 0xff]), Err(DecodeError::InvalidUtf8(_))));
        assert!(matches!(
            decode(&[0x0d, 0, 0, 0, 0]),
            Err(DecodeError::WireTypeMismatch { .. })
        ));
        assert_eq!(decode(&[0x00, 0x01]), Err(DecodeError::ZeroFieldNumber));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut builder = RegistryBuilder::new();
        let file = builder
            .add_file(FileDescriptor::new("r.proto".into(), String::new(), Syntax::Proto3))
            .unwrap();
        let node = builder
            .add_message(MessageDescriptor::new("Node".into(), "Node".into(), file, None, Syntax::Proto3))
            .unwrap();
        builder
            .message_mut(node)
            .fields
            .push(field("next", 1, Kind::Message(node), Cardinality::Optional));
        let registry = builder.build();

        let mut bytes: Vec<u8> = Vec::new();
        for _ in 0..(RECURSION_LIMIT + 5) {
            let mut outer = vec![0x0a];
            let mut len = ByteBufferMut::new();
            len.write_varint(bytes.len() as u64);
            outer.extend(len.data());
            outer.extend(bytes);
            bytes = outer;
        }
        assert_eq!(
            DynamicMessage::decode(&registry, node, &bytes),
            Err(DecodeError::RecursionLimit)
        );
    }

    #[test]
    fn missing_required_fields() {
        let mut builder = RegistryBuilder::new();
        let file = builder
            .add_file(FileDescriptor::new("q.proto".into(), String::new(), Syntax::Proto2))
            .unwrap();
        let req = builder
            .add_message(MessageDescriptor::new("Req".into(), "Req".into(), file, None, Syntax::Proto2))
            .unwrap();
        {
            let m = builder.message_mut(req);
            m.fields.push(field("id", 1, Kind::Int64, Cardinality::Required));
            m.fields.push(field("children", 2, Kind::Message(req), Cardinality::Repeated));
        }
        let registry = builder.build();

        let empty = DynamicMessage::decode(&registry, req, &[]).unwrap();
        assert_eq!(empty.missing_required(&registry).as_deref(), Some("id"));

        // id: 1, children { id: 2 } children { }
        let bytes = [0x08, 0x01, 0x12, 0x02, 0x08, 0x02, 0x12, 0x00];
        let decoded = DynamicMessage::decode(&registry, req, &bytes).unwrap();
        assert_eq!(decoded.missing_required(&registry).as_deref(), Some("children[1].id"));

        let complete = DynamicMessage::decode(&registry, req, &bytes[..6]).unwrap();
        assert_eq!(complete.missing_required(&registry), None);
    }
}
