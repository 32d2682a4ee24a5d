use serde::Serialize;

/// Syntax tree of a single `.proto` file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtoFile {
    pub name:     String,
    pub syntax:   SyntaxVersion,
    pub package:  Option<String>,
    pub imports:  Vec<Import>,
    pub options:  Vec<OptionDecl>,
    pub messages: Vec<Message>,
    pub enums:    Vec<Enum>,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SyntaxVersion {
    Proto2,
    Proto3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ImportKind {
    Default,
    Public,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Import {
    pub path:   String,
    pub kind:   ImportKind,
    pub line:   usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constant {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    /// A `{ ... }` text-format literal, kept verbatim.
    Aggregate(String),
}

impl Constant {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Identifier(id) if id == "true" => Some(true),
            Constant::Identifier(id) if id == "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionDecl {
    pub name:  String,
    pub value: Constant,
}

/// Looks up an option by name in a list of declarations; later
/// declarations win.
pub fn find_option<'a>(options: &'a [OptionDecl], name: &str) -> Option<&'a Constant> {
    options.iter().rev().find(|o| o.name == name).map(|o| &o.value)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldType {
    Named(String),
    Map { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name:       String,
    pub line:       usize,
    pub column:     usize,
    pub label:      Option<Label>,
    pub field_type: FieldType,
    pub number:     i64,
    /// Index into the owning message's `oneofs`.
    pub oneof:      Option<usize>,
    pub options:    Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Oneof {
    pub name:    String,
    pub line:    usize,
    pub column:  usize,
    pub options: Vec<OptionDecl>,
}

/// An inclusive range of reserved or extension numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberRange {
    pub start: i64,
    pub end:   i64,
}

impl NumberRange {
    pub fn contains(&self, number: i64) -> bool {
        self.start <= number && number <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub name:           String,
    pub line:           usize,
    pub column:         usize,
    /// Fields in declaration order, oneof members included.
    pub fields:         Vec<Field>,
    pub oneofs:         Vec<Oneof>,
    pub messages:       Vec<Message>,
    pub enums:          Vec<Enum>,
    pub reserved:       Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub options:        Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumValue {
    pub name:    String,
    pub line:    usize,
    pub column:  usize,
    pub number:  i64,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enum {
    pub name:           String,
    pub line:           usize,
    pub column:         usize,
    pub values:         Vec<EnumValue>,
    pub reserved:       Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub options:        Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Method {
    pub name:             String,
    pub line:             usize,
    pub column:           usize,
    pub input_type:       String,
    pub output_type:      String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options:          Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub name:    String,
    pub line:    usize,
    pub column:  usize,
    pub methods: Vec<Method>,
    pub options: Vec<OptionDecl>,
}
