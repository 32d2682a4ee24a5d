use std::collections::HashMap;

use crate::bb::WireType;

/// Stable address of a [`FileDescriptor`] inside a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIndex(pub(crate) u32);

/// Stable address of a [`MessageDescriptor`] inside a [`Registry`](crate::Registry).
///
/// Messages refer to each other through these indices, which is what lets a
/// schema contain recursive or mutually recursive message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageIndex(pub(crate) u32);

/// Stable address of an [`EnumDescriptor`] inside a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumIndex(pub(crate) u32);

impl FileIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MessageIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EnumIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Optional,
    Required,
    Repeated,
}

/// The type of a field: one of the fifteen scalar types, or a reference to a
/// message or enum in the same registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Message(MessageIndex),
    Enum(EnumIndex),
}

pub const SCALAR_TYPES: [&str; 15] = [
    "double", "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64",
    "fixed32", "fixed64", "sfixed32", "sfixed64", "bool", "string", "bytes",
];

impl Kind {
    /// Maps a scalar keyword from the IDL (`int32`, `bytes`, ...) to its kind.
    pub fn from_scalar_name(name: &str) -> Option<Kind> {
        Some(match name {
            "double"   => Kind::Double,
            "float"    => Kind::Float,
            "int32"    => Kind::Int32,
            "int64"    => Kind::Int64,
            "uint32"   => Kind::Uint32,
            "uint64"   => Kind::Uint64,
            "sint32"   => Kind::Sint32,
            "sint64"   => Kind::Sint64,
            "fixed32"  => Kind::Fixed32,
            "fixed64"  => Kind::Fixed64,
            "sfixed32" => Kind::Sfixed32,
            "sfixed64" => Kind::Sfixed64,
            "bool"     => Kind::Bool,
            "string"   => Kind::String,
            "bytes"    => Kind::Bytes,
            _ => return None,
        })
    }

    /// The wire type a single (unpacked) value of this kind is written with.
    pub fn wire_type(&self) -> WireType {
        match self {
            Kind::Double | Kind::Fixed64 | Kind::Sfixed64 => WireType::Fixed64,
            Kind::Float | Kind::Fixed32 | Kind::Sfixed32 => WireType::Fixed32,
            Kind::String | Kind::Bytes | Kind::Message(_) => WireType::LengthDelimited,
            Kind::Int32
            | Kind::Int64
            | Kind::Uint32
            | Kind::Uint64
            | Kind::Sint32
            | Kind::Sint64
            | Kind::Bool
            | Kind::Enum(_) => WireType::Varint,
        }
    }

    /// Repeated fields of these kinds may use the packed encoding.
    pub fn is_packable(&self) -> bool {
        !matches!(self, Kind::String | Kind::Bytes | Kind::Message(_))
    }

    /// 64-bit integers travel as JSON strings to survive double precision.
    pub fn is_64bit_integer(&self) -> bool {
        matches!(
            self,
            Kind::Int64 | Kind::Uint64 | Kind::Sint64 | Kind::Fixed64 | Kind::Sfixed64
        )
    }

    /// Kinds that may be used as the key of a map field.
    pub fn is_valid_map_key(&self) -> bool {
        !matches!(
            self,
            Kind::Double | Kind::Float | Kind::Bytes | Kind::Message(_) | Kind::Enum(_)
        )
    }

    pub fn as_message(&self) -> Option<MessageIndex> {
        match *self {
            Kind::Message(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<EnumIndex> {
        match *self {
            Kind::Enum(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name:            String,
    pub json_name:       String,
    pub number:          u32,
    pub kind:            Kind,
    pub cardinality:     Cardinality,
    pub packed:          bool,
    /// Index into the owning message's `oneofs`.
    pub oneof:           Option<usize>,
    /// Declared with the proto3 `optional` keyword.
    pub proto3_optional: bool,
}

impl FieldDescriptor {
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneofDescriptor {
    pub name:   String,
    /// Indices into the owning message's `fields`.
    pub fields: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    pub name:      String,
    pub full_name: String,
    pub file:      FileIndex,
    pub parent:    Option<MessageIndex>,
    pub syntax:    Syntax,
    /// Fields in declaration order.
    pub fields:    Vec<FieldDescriptor>,
    pub oneofs:    Vec<OneofDescriptor>,
    pub messages:  Vec<MessageIndex>,
    pub enums:     Vec<EnumIndex>,
    /// Synthetic `key`/`value` message backing a `map<K, V>` field.
    pub map_entry: bool,

    field_number_to_index: HashMap<u32, usize>,
    field_name_to_index:   HashMap<String, usize>,
}

impl MessageDescriptor {
    pub fn new(
        name: String,
        full_name: String,
        file: FileIndex,
        parent: Option<MessageIndex>,
        syntax: Syntax,
    ) -> MessageDescriptor {
        MessageDescriptor {
            name,
            full_name,
            file,
            parent,
            syntax,
            fields: Vec::new(),
            oneofs: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            map_entry: false,
            field_number_to_index: HashMap::new(),
            field_name_to_index: HashMap::new(),
        }
    }

    /// Rebuilds the lookup tables after `fields` changed.
    pub(crate) fn index_fields(&mut self) {
        self.field_number_to_index.clear();
        self.field_name_to_index.clear();
        for (i, field) in self.fields.iter().enumerate() {
            self.field_number_to_index.entry(field.number).or_insert(i);
            self.field_name_to_index.entry(field.name.clone()).or_insert(i);
        }
        // JSON names never shadow a declared name.
        for (i, field) in self.fields.iter().enumerate() {
            self.field_name_to_index.entry(field.json_name.clone()).or_insert(i);
        }
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.field_number_to_index.get(&number).map(|&i| &self.fields[i])
    }

    /// Finds a field by its declared name or by its JSON name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_name_to_index.get(name).map(|&i| &self.fields[i])
    }

    /// The `key` and `value` fields of a map entry message.
    pub fn map_entry_fields(&self) -> Option<(&FieldDescriptor, &FieldDescriptor)> {
        if !self.map_entry {
            return None;
        }
        Some((self.field_by_number(1)?, self.field_by_number(2)?))
    }

    /// Whether a field distinguishes "unset" from "set to the default value".
    /// Proto3 scalars outside a oneof and without `optional` do not, so their
    /// default values are never written to the wire.
    pub fn field_has_presence(&self, field: &FieldDescriptor) -> bool {
        if field.is_repeated() {
            return false;
        }
        matches!(field.kind, Kind::Message(_))
            || field.oneof.is_some()
            || field.proto3_optional
            || self.syntax == Syntax::Proto2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDescriptor {
    pub name:   String,
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub name:      String,
    pub full_name: String,
    pub file:      FileIndex,
    pub parent:    Option<MessageIndex>,
    pub values:    Vec<EnumValueDescriptor>,
}

impl EnumDescriptor {
    pub fn value_by_name(&self, name: &str) -> Option<&EnumValueDescriptor> {
        self.values.iter().find(|v| v.name == name)
    }

    /// Aliased numbers resolve to the first declared name.
    pub fn value_by_number(&self, number: i32) -> Option<&EnumValueDescriptor> {
        self.values.iter().find(|v| v.number == number)
    }

    /// The value an unset enum field reads as.
    pub fn default_number(&self) -> i32 {
        self.values.first().map(|v| v.number).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub name:             String,
    pub input:            MessageIndex,
    pub output:           MessageIndex,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name:      String,
    pub full_name: String,
    pub methods:   Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    /// Import-relative path, `/`-separated.
    pub name:                String,
    /// Empty when the file declares no package.
    pub package:             String,
    pub syntax:              Syntax,
    pub dependencies:        Vec<String>,
    /// Indices into `dependencies`.
    pub public_dependencies: Vec<usize>,
    pub messages:            Vec<MessageIndex>,
    pub enums:               Vec<EnumIndex>,
    pub services:            Vec<ServiceDescriptor>,
}

impl FileDescriptor {
    pub fn new(name: String, package: String, syntax: Syntax) -> FileDescriptor {
        FileDescriptor {
            name,
            package,
            syntax,
            dependencies: Vec::new(),
            public_dependencies: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
        }
    }
}
