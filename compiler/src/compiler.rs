use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    path::Path,
};

use dynproto_schema::{
    Cardinality, EnumDescriptor, EnumIndex, EnumValueDescriptor, FieldDescriptor, FileDescriptor,
    FileIndex, Kind, MessageDescriptor, MessageIndex, MethodDescriptor, OneofDescriptor, Registry,
    RegistryBuilder, RegistryError, ServiceDescriptor, Symbol, Syntax,
};
use tracing::{debug, error, info};

use crate::{
    error::SchemaError,
    parser::parse_schema,
    scanner::scan,
    tokenizer::tokenize_schema,
    traits::{DirectoryLoader, SourceLoader},
    types::{find_option, Enum, FieldType, ImportKind, Label, Message, ProtoFile, SyntaxVersion},
    utils::{normalize_path, to_lower_camel, to_upper_camel},
    verifier::verify_file,
    well_known::well_known_source,
};

/// Tokenize and parse a single `.proto` source. `name` labels errors.
pub fn parse_file(name: &str, text: &str) -> Result<ProtoFile, SchemaError> {
    let tokens = tokenize_schema(name, text)?;
    parse_schema(name, &tokens)
}

/// Scans `root` for `.proto` files and compiles all of them into one
/// [`Registry`]. No registry is returned unless every file compiled.
pub fn compile_tree(root: &Path) -> Result<Registry, SchemaError> {
    info!(root = %root.display(), "compiling schema tree");
    let files = scan(root)?;
    let names: Vec<String> = files.into_iter().map(|f| f.relative).collect();
    compile_files(root, &names)
}

/// Compiles the given files, each a path relative to `root`, plus whatever
/// they import.
pub fn compile_files(root: &Path, files: &[String]) -> Result<Registry, SchemaError> {
    compile_with(&DirectoryLoader::new(root), files)
}

/// Compiles `files` and their imports, reading every source through `loader`.
pub fn compile_with<L: SourceLoader>(loader: &L, files: &[String]) -> Result<Registry, SchemaError> {
    // 1) Load and parse everything reachable
    let parsed = load_files(loader, files).map_err(|err| {
        error!(error = %err, "failed to load schema sources");
        err
    })?;
    debug!(files = parsed.len(), "parsed schema sources");

    // 2) Verify, then build the descriptor graph
    let mut errors: Vec<SchemaError> = parsed.iter().flat_map(verify_file).collect();
    let mut builder = Builder::new(&parsed);
    if builder.declare(&mut errors) {
        builder.resolve(&mut errors);
    }

    if !errors.is_empty() {
        for err in &errors {
            error!(error = %err, "schema error");
        }
        return Err(SchemaError::from_many(errors));
    }

    let registry = builder.inner.build();
    info!(
        files = registry.len(),
        messages = registry.messages().count(),
        "schema registry built"
    );
    Ok(registry)
}

/// Loads `requested` and, transitively, everything they import. Imports are
/// looked up through `loader` first and in the embedded well-known types
/// second. Every file is parsed even when others fail, so all parse errors
/// are reported together.
fn load_files<L: SourceLoader>(loader: &L, requested: &[String]) -> Result<Vec<ProtoFile>, SchemaError> {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut queue: VecDeque<(String, Option<String>)> = requested
        .iter()
        .map(|name| (normalize_path(name), None))
        .collect();

    while let Some((name, importer)) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }

        let text = match loader.load(&name) {
            Ok(Some(text)) => text,
            Ok(None) => match (well_known_source(&name), importer) {
                (Some(text), _) => text.to_string(),
                (None, Some(importer)) => {
                    errors.push(SchemaError::UnresolvedImport { file: importer, import: name });
                    continue;
                }
                (None, None) => {
                    errors.push(SchemaError::Io {
                        path:   name.clone().into(),
                        source: io::Error::new(io::ErrorKind::NotFound, "schema file not found"),
                    });
                    continue;
                }
            },
            Err(err) => {
                errors.push(err);
                continue;
            }
        };

        match parse_file(&name, &text) {
            Ok(file) => {
                debug!(file = %name, imports = file.imports.len(), "parsed file");
                for import in &file.imports {
                    queue.push_back((normalize_path(&import.path), Some(name.clone())));
                }
                parsed.push(file);
            }
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(SchemaError::from_many(errors))
    }
}

/// A message declared in the syntax tree, waiting for its fields to be
/// resolved.
struct PendingMessage<'a> {
    index:       MessageIndex,
    file:        usize,
    message:     &'a Message,
    /// Synthetic entry messages, keyed by the position of their map field
    /// in `message.fields`.
    map_entries: HashMap<usize, MessageIndex>,
}

struct Builder<'a> {
    files:    &'a [ProtoFile],
    inner:    RegistryBuilder,
    indices:  Vec<FileIndex>,
    /// For every file, the files whose symbols it may reference: itself and
    /// its transitive imports.
    visible:  Vec<HashSet<FileIndex>>,
    pending:  Vec<PendingMessage<'a>>,
}

impl<'a> Builder<'a> {
    fn new(files: &'a [ProtoFile]) -> Builder<'a> {
        Builder {
            files,
            inner: RegistryBuilder::new(),
            indices: Vec::new(),
            visible: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Pass 1: registers every file, message, enum and map entry under its
    /// full name. Returns false when the files themselves could not be
    /// registered.
    fn declare(&mut self, errors: &mut Vec<SchemaError>) -> bool {
        let files = self.files;
        for file in files {
            let mut descriptor = FileDescriptor::new(
                file.name.clone(),
                file.package.clone().unwrap_or_default(),
                syntax_of(file),
            );
            for import in &file.imports {
                if import.kind == ImportKind::Public {
                    descriptor.public_dependencies.push(descriptor.dependencies.len());
                }
                descriptor.dependencies.push(normalize_path(&import.path));
            }

            match self.inner.add_file(descriptor) {
                Ok(index) => self.indices.push(index),
                Err(err) => {
                    // load_files never yields the same path twice
                    errors.push(registry_error(&file.name, err));
                    return false;
                }
            }
        }

        for (i, file) in files.iter().enumerate() {
            let package = file.package.clone().unwrap_or_default();
            for message in &file.messages {
                if let Some(index) = self.declare_message(i, &package, None, message, errors) {
                    self.inner.file_mut(self.indices[i]).messages.push(index);
                }
            }
            for e in &file.enums {
                if let Some(index) = self.declare_enum(i, &package, None, e, errors) {
                    self.inner.file_mut(self.indices[i]).enums.push(index);
                }
            }
        }

        self.visible = (0..files.len()).map(|i| self.reachable_from(i)).collect();
        true
    }

    fn declare_message(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<MessageIndex>,
        message: &'a Message,
        errors: &mut Vec<SchemaError>,
    ) -> Option<MessageIndex> {
        let full_name = qualify(scope, &message.name);
        let syntax = syntax_of(&self.files[file]);
        let descriptor = MessageDescriptor::new(
            message.name.clone(),
            full_name.clone(),
            self.indices[file],
            parent,
            syntax,
        );
        let index = match self.inner.add_message(descriptor) {
            Ok(index) => index,
            Err(err) => {
                errors.push(registry_error(&self.files[file].name, err));
                return None;
            }
        };

        let mut map_entries = HashMap::new();
        for (position, field) in message.fields.iter().enumerate() {
            if let FieldType::Map { .. } = field.field_type {
                let entry_name = format!("{}Entry", to_upper_camel(&field.name));
                let mut entry = MessageDescriptor::new(
                    entry_name.clone(),
                    qualify(&full_name, &entry_name),
                    self.indices[file],
                    Some(index),
                    syntax,
                );
                entry.map_entry = true;
                match self.inner.add_message(entry) {
                    Ok(entry_index) => {
                        self.inner.message_mut(index).messages.push(entry_index);
                        map_entries.insert(position, entry_index);
                    }
                    Err(err) => errors.push(registry_error(&self.files[file].name, err)),
                }
            }
        }

        for child in &message.messages {
            if let Some(child_index) = self.declare_message(file, &full_name, Some(index), child, errors) {
                self.inner.message_mut(index).messages.push(child_index);
            }
        }
        for e in &message.enums {
            if let Some(enum_index) = self.declare_enum(file, &full_name, Some(index), e, errors) {
                self.inner.message_mut(index).enums.push(enum_index);
            }
        }

        self.pending.push(PendingMessage {
            index,
            file,
            message,
            map_entries,
        });
        Some(index)
    }

    fn declare_enum(
        &mut self,
        file: usize,
        scope: &str,
        parent: Option<MessageIndex>,
        e: &Enum,
        errors: &mut Vec<SchemaError>,
    ) -> Option<EnumIndex> {
        let descriptor = EnumDescriptor {
            name:      e.name.clone(),
            full_name: qualify(scope, &e.name),
            file:      self.indices[file],
            parent,
            values:    e
                .values
                .iter()
                .map(|v| EnumValueDescriptor {
                    name:   v.name.clone(),
                    number: v.number as i32,
                })
                .collect(),
        };
        match self.inner.add_enum(descriptor) {
            Ok(index) => Some(index),
            Err(err) => {
                errors.push(registry_error(&self.files[file].name, err));
                None
            }
        }
    }

    fn reachable_from(&self, start: usize) -> HashSet<FileIndex> {
        let by_name: HashMap<&str, usize> = self
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();

        let mut visible = HashSet::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if !visible.insert(self.indices[i]) {
                continue;
            }
            for import in &self.files[i].imports {
                if let Some(&next) = by_name.get(normalize_path(&import.path).as_str()) {
                    stack.push(next);
                }
            }
        }
        visible
    }

    /// Pass 2: resolves field and method types and fills in the fields of
    /// every pending message.
    fn resolve(&mut self, errors: &mut Vec<SchemaError>) {
        let pending = std::mem::take(&mut self.pending);
        for item in &pending {
            self.resolve_message(item, errors);
        }

        let files = self.files;
        for (i, file) in files.iter().enumerate() {
            let package = file.package.clone().unwrap_or_default();
            for service in &file.services {
                let full_name = qualify(&package, &service.name);
                let mut methods = Vec::new();
                for method in &service.methods {
                    let input = self.resolve_method_type(i, &package, &full_name, &method.name, &method.input_type, errors);
                    let output =
                        self.resolve_method_type(i, &package, &full_name, &method.name, &method.output_type, errors);
                    if let (Some(input), Some(output)) = (input, output) {
                        methods.push(MethodDescriptor {
                            name: method.name.clone(),
                            input,
                            output,
                            client_streaming: method.client_streaming,
                            server_streaming: method.server_streaming,
                        });
                    }
                }
                self.inner.file_mut(self.indices[i]).services.push(ServiceDescriptor {
                    name: service.name.clone(),
                    full_name,
                    methods,
                });
            }
        }
    }

    fn resolve_message(&mut self, item: &PendingMessage<'a>, errors: &mut Vec<SchemaError>) {
        let files = self.files;
        let file = &files[item.file];
        let syntax = syntax_of(file);
        let full_name = self.inner.registry().message(item.index).full_name.clone();
        let mut fields = Vec::with_capacity(item.message.fields.len());

        for (position, field) in item.message.fields.iter().enumerate() {
            let unresolved = |type_name: &str| SchemaError::UnresolvedType {
                file:      file.name.clone(),
                message:   full_name.clone(),
                field:     field.name.clone(),
                type_name: type_name.to_string(),
            };

            let (kind, cardinality) = match &field.field_type {
                FieldType::Named(type_name) => {
                    let Some(kind) = self.resolve_type(item.file, &full_name, type_name) else {
                        errors.push(unresolved(type_name));
                        continue;
                    };
                    let cardinality = match field.label {
                        Some(Label::Repeated) => Cardinality::Repeated,
                        Some(Label::Required) => Cardinality::Required,
                        _ => Cardinality::Optional,
                    };
                    (kind, cardinality)
                }
                FieldType::Map { key, value } => {
                    let Some(&entry) = item.map_entries.get(&position) else {
                        continue;
                    };
                    let Some(value_kind) = self.resolve_type(item.file, &full_name, value) else {
                        errors.push(unresolved(value));
                        continue;
                    };
                    // Invalid key types were reported by the verifier.
                    let Some(key_kind) = Kind::from_scalar_name(key) else {
                        continue;
                    };
                    let entry_message = self.inner.message_mut(entry);
                    entry_message.fields = vec![
                        entry_field("key", 1, key_kind),
                        entry_field("value", 2, value_kind),
                    ];
                    (Kind::Message(entry), Cardinality::Repeated)
                }
            };

            let packed = cardinality == Cardinality::Repeated
                && kind.is_packable()
                && find_option(&field.options, "packed")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(syntax == Syntax::Proto3);

            let json_name = find_option(&field.options, "json_name")
                .and_then(|c| c.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| to_lower_camel(&field.name));

            fields.push(FieldDescriptor {
                name: field.name.clone(),
                json_name,
                number: u32::try_from(field.number).unwrap_or_default(),
                kind,
                cardinality,
                packed,
                oneof: field.oneof,
                proto3_optional: syntax == Syntax::Proto3
                    && field.label == Some(Label::Optional),
            });
        }

        let oneofs = item
            .message
            .oneofs
            .iter()
            .enumerate()
            .map(|(i, oneof)| OneofDescriptor {
                name:   oneof.name.clone(),
                fields: fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.oneof == Some(i))
                    .map(|(position, _)| position)
                    .collect(),
            })
            .collect();

        let message = self.inner.message_mut(item.index);
        message.fields = fields;
        message.oneofs = oneofs;
    }

    fn resolve_method_type(
        &self,
        file: usize,
        package: &str,
        service: &str,
        method: &str,
        type_name: &str,
        errors: &mut Vec<SchemaError>,
    ) -> Option<MessageIndex> {
        match self.resolve_type(file, package, type_name) {
            Some(Kind::Message(index)) => Some(index),
            _ => {
                errors.push(SchemaError::UnresolvedType {
                    file:      self.files[file].name.clone(),
                    message:   service.to_string(),
                    field:     method.to_string(),
                    type_name: type_name.to_string(),
                });
                None
            }
        }
    }

    /// Resolves a type reference made from inside `scope` (a full message
    /// or package name). Scalars resolve to themselves; other names are
    /// searched from the innermost scope outward, and only symbols declared
    /// in files visible from `file` count.
    ///
    /// For a dotted name like `A.B` only the first component is searched
    /// for. The innermost message or package called `A` binds it, and `B`
    /// must then exist inside that one.
    fn resolve_type(&self, file: usize, scope: &str, type_name: &str) -> Option<Kind> {
        if let Some(kind) = Kind::from_scalar_name(type_name) {
            return Some(kind);
        }

        if let Some(qualified) = type_name.strip_prefix('.') {
            return self.visible_symbol(file, qualified);
        }

        let first = type_name.split('.').next().unwrap_or(type_name);
        let dotted = first.len() < type_name.len();
        let mut scope = scope;
        loop {
            let head = qualify(scope, first);
            if !dotted {
                if let Some(kind) = self.visible_symbol(file, &head) {
                    return Some(kind);
                }
            } else if self.is_namespace(file, &head) {
                return self.visible_symbol(file, &qualify(scope, type_name));
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map_or("", |(outer, _)| outer);
        }
    }

    /// Whether `full_name` is a visible message or a package (or package
    /// prefix) of a visible file.
    fn is_namespace(&self, file: usize, full_name: &str) -> bool {
        if let Some(Kind::Message(_)) = self.visible_symbol(file, full_name) {
            return true;
        }
        let registry = self.inner.registry();
        self.visible[file].iter().any(|&owner| {
            let package = &registry.file_at(owner).package;
            package == full_name
                || package
                    .strip_prefix(full_name)
                    .map_or(false, |rest| rest.starts_with('.'))
        })
    }

    fn visible_symbol(&self, file: usize, full_name: &str) -> Option<Kind> {
        let registry = self.inner.registry();
        let (kind, owner) = match registry.find_symbol(full_name)? {
            Symbol::Message(index) => (Kind::Message(index), registry.message(index).file),
            Symbol::Enum(index) => (Kind::Enum(index), registry.get_enum(index).file),
        };
        self.visible[file].contains(&owner).then_some(kind)
    }
}

fn entry_field(name: &str, number: u32, kind: Kind) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        json_name: name.to_string(),
        number,
        kind,
        cardinality: Cardinality::Optional,
        packed: false,
        oneof: None,
        proto3_optional: false,
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn syntax_of(file: &ProtoFile) -> Syntax {
    match file.syntax {
        SyntaxVersion::Proto2 => Syntax::Proto2,
        SyntaxVersion::Proto3 => Syntax::Proto3,
    }
}

fn registry_error(file: &str, err: RegistryError) -> SchemaError {
    match err {
        RegistryError::DuplicateSymbol(name) | RegistryError::DuplicateFile(name) => {
            SchemaError::DuplicateSymbol {
                file: file.to_string(),
                name,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(files: &[(&str, &str)]) -> HashMap<String, String> {
        files
            .iter()
            .map(|(name, text)| (name.to_string(), text.to_string()))
            .collect()
    }

    fn compile(files: &[(&str, &str)]) -> Result<Registry, SchemaError> {
        let loader = sources(files);
        let names: Vec<String> = files.iter().map(|(name, _)| name.to_string()).collect();
        compile_with(&loader, &names)
    }

    fn message<'r>(registry: &'r Registry, full_name: &str) -> &'r MessageDescriptor {
        match registry.find_symbol(full_name) {
            Some(Symbol::Message(index)) => registry.message(index),
            other => panic!("{} is not a message: {:?}", full_name, other),
        }
    }

    #[test]
    fn builds_descriptors() {
        let registry = compile(&[(
            "acme/user.proto",
            r#"
            syntax = "proto3";
            package acme;
            message User {
              int64 id = 1;
              string display_name = 2;
              repeated int32 scores = 3;
              repeated string tags = 4;
              map<string, Address> addresses = 5;
              Status status = 6;
              optional bool active = 7;
              oneof contact { string email = 8; string phone = 9 [json_name = "tel"]; }
              message Address { string city = 1; }
            }
            enum Status { STATUS_UNSPECIFIED = 0; ACTIVE = 1; }
            service Users { rpc Get (User) returns (User); }
            "#,
        )])
        .unwrap();

        let user = message(&registry, "acme.User");
        assert_eq!(user.fields.len(), 9);
        assert_eq!(user.field_by_name("displayName").unwrap().number, 2);
        assert!(user.field_by_number(3).unwrap().packed);
        assert!(!user.field_by_number(4).unwrap().packed);
        assert!(user.field_by_number(7).unwrap().proto3_optional);
        assert_eq!(user.field_by_number(9).unwrap().json_name, "tel");
        assert_eq!(user.oneofs[0].fields, vec![7, 8]);

        let map_field = user.field_by_number(5).unwrap();
        assert!(map_field.is_repeated());
        let entry = registry.message(map_field.kind.as_message().unwrap());
        assert!(entry.map_entry);
        assert_eq!(entry.full_name, "acme.User.AddressesEntry");
        let (key, value) = entry.map_entry_fields().unwrap();
        assert_eq!(key.kind, Kind::String);
        assert_eq!(value.kind, Kind::Message(registry.find_message(registry.file("acme/user.proto").unwrap(), "User.Address").unwrap()));

        assert!(matches!(user.field_by_number(6).unwrap().kind, Kind::Enum(_)));

        let file = registry.file("acme/user.proto").unwrap();
        assert_eq!(file.services[0].methods[0].name, "Get");
    }

    #[test]
    fn scoping_prefers_innermost() {
        let registry = compile(&[(
            "a.proto",
            r#"
            syntax = "proto3";
            package pkg;
            message Inner { int32 outer_level = 1; }
            message Outer {
              message Inner { int32 nested_level = 1; }
              Inner nested = 1;
              .pkg.Inner top = 2;
            }
            "#,
        )])
        .unwrap();

        let outer = message(&registry, "pkg.Outer");
        let nested = registry.message(outer.field_by_number(1).unwrap().kind.as_message().unwrap());
        let top = registry.message(outer.field_by_number(2).unwrap().kind.as_message().unwrap());
        assert_eq!(nested.full_name, "pkg.Outer.Inner");
        assert_eq!(top.full_name, "pkg.Inner");
    }

    #[test]
    fn dotted_names_bind_their_first_component() {
        let source = |inner: &str| {
            format!(
                r#"
                syntax = "proto3";
                package pkg;
                message A {{ message B {{ int32 x = 1; }} }}
                message C {{
                  {}
                  A.B b = 1;
                }}
                "#,
                inner
            )
        };

        let registry = compile(&[("a.proto", &source(""))]).unwrap();
        let c = message(&registry, "pkg.C");
        let b = registry.message(c.field_by_number(1).unwrap().kind.as_message().unwrap());
        assert_eq!(b.full_name, "pkg.A.B");

        // C.A shadows the outer A, and has no B
        let err = compile(&[("a.proto", &source("message A {}"))]).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnresolvedType { ref message, ref type_name, .. } if message == "pkg.C" && type_name == "A.B"
        ));

        // packages bind the first component too
        let registry = compile(&[(
            "b.proto",
            "syntax = \"proto3\"; package outer.pkg; message D { pkg.A.B b = 1; }\nmessage A { message B {} }",
        )])
        .unwrap();
        let d = message(&registry, "outer.pkg.D");
        let b = registry.message(d.field_by_number(1).unwrap().kind.as_message().unwrap());
        assert_eq!(b.full_name, "outer.pkg.A.B");
    }

    #[test]
    fn types_need_an_import() {
        let err = compile(&[
            ("a.proto", "syntax = \"proto3\"; package p; message A { int32 x = 1; }"),
            ("b.proto", "syntax = \"proto3\"; package p; message B { A a = 1; }"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnresolvedType { ref file, ref type_name, .. } if file == "b.proto" && type_name == "A"
        ));
    }

    #[test]
    fn well_known_imports() {
        let registry = compile(&[(
            "event.proto",
            r#"
            syntax = "proto3";
            import "google/protobuf/timestamp.proto";
            message Event { google.protobuf.Timestamp at = 1; }
            "#,
        )])
        .unwrap();
        assert!(registry.file("google/protobuf/timestamp.proto").is_some());
        assert!(registry.find_message(registry.file("event.proto").unwrap(), "Event").is_some());
    }

    #[test]
    fn errors_are_aggregated() {
        let err = compile(&[(
            "bad.proto",
            r#"
            syntax = "proto3";
            message A {
              Missing a = 1;
              int32 b = 2;
              int32 c = 2;
            }
            message A {}
            "#,
        )])
        .unwrap_err();
        let errors = err.errors();
        assert!(errors.iter().any(|e| matches!(e, SchemaError::UnresolvedType { .. })));
        assert!(errors.iter().any(|e| matches!(e, SchemaError::DuplicateFieldNumber { .. })));
        assert!(errors.iter().any(|e| matches!(e, SchemaError::DuplicateSymbol { .. })));
    }

    #[test]
    fn parse_errors_from_every_file() {
        let err = compile(&[("a.proto", "message {"), ("b.proto", "message B { int32 = 1; }")])
            .unwrap_err();
        assert_eq!(err.errors().len(), 2);
    }
}
