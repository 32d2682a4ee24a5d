use std::collections::HashSet;

use dynproto_schema::Kind;

use crate::{
    error::SchemaError,
    parser::MAX_FIELD_NUMBER,
    types::{Enum, FieldType, Label, Message, NumberRange, ProtoFile, SyntaxVersion},
    utils::quote,
};

/// Field numbers the protobuf implementation keeps for itself.
pub const RESERVED_FIELD_NUMBERS: NumberRange = NumberRange { start: 19_000, end: 19_999 };

/// Checks the structural rules of a parsed file that do not depend on other
/// files. Every violation is collected; an empty list means the file passed.
pub fn verify_file(file: &ProtoFile) -> Vec<SchemaError> {
    let mut errors = Vec::new();
    let mut scope = Vec::new();

    // 1) Check duplicate top-level names
    let mut names: HashSet<&str> = HashSet::new();
    for name in file
        .messages
        .iter()
        .map(|m| m.name.as_str())
        .chain(file.enums.iter().map(|e| e.name.as_str()))
        .chain(file.services.iter().map(|s| s.name.as_str()))
    {
        if !names.insert(name) {
            errors.push(verifier_error(file, format!("The name {} is defined twice", quote(name))));
        }
    }

    for message in &file.messages {
        verify_message(file, message, &mut scope, &mut errors);
    }
    for e in &file.enums {
        verify_enum(file, e, &scope, &mut errors);
    }

    // 2) Check services: method names are unique per service
    for service in &file.services {
        let mut methods: HashSet<&str> = HashSet::new();
        for method in &service.methods {
            if !methods.insert(&method.name) {
                errors.push(verifier_error(
                    file,
                    format!(
                        "The method {} is defined twice in service {}",
                        quote(&method.name),
                        quote(&service.name)
                    ),
                ));
            }
        }
    }

    errors
}

fn verify_message<'a>(
    file: &ProtoFile,
    message: &'a Message,
    scope: &mut Vec<&'a str>,
    errors: &mut Vec<SchemaError>,
) {
    scope.push(&message.name);
    let display_name = scope.join(".");

    let mut numbers: HashSet<i64> = HashSet::new();
    let mut field_names: HashSet<&str> = HashSet::new();

    for field in &message.fields {
        // 1) Check the field number
        let invalid = |reason: &'static str| SchemaError::InvalidFieldNumber {
            file:    file.name.clone(),
            message: display_name.clone(),
            field:   field.name.clone(),
            number:  field.number,
            reason,
        };
        if field.number <= 0 {
            errors.push(invalid("field numbers must be positive"));
        } else if field.number > MAX_FIELD_NUMBER {
            errors.push(invalid("field numbers cannot be larger than 536870911"));
        } else if RESERVED_FIELD_NUMBERS.contains(field.number) {
            errors.push(invalid("field numbers 19000 through 19999 are reserved for the implementation"));
        } else if message.reserved.iter().any(|r| r.contains(field.number)) {
            errors.push(invalid("the number is reserved in this message"));
        }

        if !numbers.insert(field.number) {
            errors.push(SchemaError::DuplicateFieldNumber {
                file:    file.name.clone(),
                message: display_name.clone(),
                number:  field.number,
            });
        }

        // 2) Check the field name
        if !field_names.insert(&field.name) {
            errors.push(verifier_error(
                file,
                format!(
                    "The field {} is defined twice in {}",
                    quote(&field.name),
                    quote(&display_name)
                ),
            ));
        }
        if message.reserved_names.contains(&field.name) {
            errors.push(verifier_error(
                file,
                format!(
                    "The field name {} is reserved in {}",
                    quote(&field.name),
                    quote(&display_name)
                ),
            ));
        }

        // 3) Check labels against the syntax
        if file.syntax == SyntaxVersion::Proto3 && field.label == Some(Label::Required) {
            errors.push(verifier_error(
                file,
                format!(
                    "Required fields are not allowed in proto3 ({} in {})",
                    quote(&field.name),
                    quote(&display_name)
                ),
            ));
        }
        if file.syntax == SyntaxVersion::Proto2
            && field.label.is_none()
            && field.oneof.is_none()
            && !matches!(field.field_type, FieldType::Map { .. })
        {
            errors.push(verifier_error(
                file,
                format!(
                    "The field {} in {} needs a label (optional, required or repeated)",
                    quote(&field.name),
                    quote(&display_name)
                ),
            ));
        }

        // 4) Check map fields
        if let FieldType::Map { key, .. } = &field.field_type {
            let valid_key = Kind::from_scalar_name(key).is_some_and(|k| k.is_valid_map_key());
            if !valid_key {
                errors.push(verifier_error(
                    file,
                    format!(
                        "The map field {} in {} has invalid key type {}",
                        quote(&field.name),
                        quote(&display_name),
                        quote(key)
                    ),
                ));
            }
            if field.oneof.is_some() {
                errors.push(verifier_error(
                    file,
                    format!("The map field {} cannot be part of a oneof", quote(&field.name)),
                ));
            }
        }

        // 5) Oneof members are singular
        if field.oneof.is_some() && field.label == Some(Label::Repeated) {
            errors.push(verifier_error(
                file,
                format!("The oneof member {} cannot be repeated", quote(&field.name)),
            ));
        }
    }

    // 6) Check nested name clashes
    let mut nested: HashSet<&str> = HashSet::new();
    for name in message
        .messages
        .iter()
        .map(|m| m.name.as_str())
        .chain(message.enums.iter().map(|e| e.name.as_str()))
    {
        if !nested.insert(name) {
            errors.push(verifier_error(
                file,
                format!("The name {} is defined twice in {}", quote(name), quote(&display_name)),
            ));
        }
    }

    for oneof in &message.oneofs {
        if field_names.contains(oneof.name.as_str()) {
            errors.push(verifier_error(
                file,
                format!(
                    "The oneof {} clashes with a field of the same name in {}",
                    quote(&oneof.name),
                    quote(&display_name)
                ),
            ));
        }
    }

    for child in &message.messages {
        verify_message(file, child, scope, errors);
    }
    for e in &message.enums {
        verify_enum(file, e, scope, errors);
    }

    scope.pop();
}

fn verify_enum(file: &ProtoFile, e: &Enum, scope: &[&str], errors: &mut Vec<SchemaError>) {
    let display_name = if scope.is_empty() {
        e.name.clone()
    } else {
        format!("{}.{}", scope.join("."), e.name)
    };

    // 1) Check that the enum has values
    let first = match e.values.first() {
        Some(first) => first,
        None => {
            errors.push(verifier_error(
                file,
                format!("The enum {} must contain at least one value", quote(&display_name)),
            ));
            return;
        }
    };

    // 2) Proto3 enums open with their zero value
    if file.syntax == SyntaxVersion::Proto3 && first.number != 0 {
        errors.push(verifier_error(
            file,
            format!("The first value of the proto3 enum {} must be zero", quote(&display_name)),
        ));
    }

    // 3) Check names and numbers
    let mut names: HashSet<&str> = HashSet::new();
    for value in &e.values {
        if !names.insert(&value.name) {
            errors.push(verifier_error(
                file,
                format!(
                    "The enum value {} is defined twice in {}",
                    quote(&value.name),
                    quote(&display_name)
                ),
            ));
        }
        if i32::try_from(value.number).is_err() {
            errors.push(verifier_error(
                file,
                format!(
                    "The enum value {} is out of the int32 range",
                    quote(&value.name)
                ),
            ));
        }
        if e.reserved.iter().any(|r| r.contains(value.number)) {
            errors.push(verifier_error(
                file,
                format!(
                    "The enum value {} uses reserved number {}",
                    quote(&value.name),
                    value.number
                ),
            ));
        }
    }
}

fn verifier_error(file: &ProtoFile, msg: String) -> SchemaError {
    SchemaError::Verifier {
        file: file.name.clone(),
        msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse_schema, tokenizer::tokenize_schema};

    fn verify(text: &str) -> Vec<SchemaError> {
        let tokens = tokenize_schema("test.proto", text).unwrap();
        let file = parse_schema("test.proto", &tokens).unwrap();
        verify_file(&file)
    }

    #[test]
    fn accepts_valid_file() {
        let errors = verify(
            r#"
            syntax = "proto3";
            message User {
              int64 id = 1;
              map<string, User> friends = 2;
              oneof contact { string email = 3; string phone = 4; }
              reserved 10 to 20;
              enum Kind { KIND_UNSPECIFIED = 0; }
            }
            "#,
        );
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn duplicate_field_number() {
        let errors = verify("syntax = \"proto3\"; message A { int32 a = 1; string b = 1; }");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            SchemaError::DuplicateFieldNumber { message, number: 1, .. } if message == "A"
        ));
    }

    #[test]
    fn invalid_field_numbers() {
        let errors = verify(
            r#"
            syntax = "proto3";
            message A {
              int32 a = 0;
              int32 b = 19500;
              int32 c = 536870912;
              int32 d = 7;
              reserved 7;
            }
            "#,
        );
        let fields: Vec<_> = errors
            .iter()
            .map(|e| match e {
                SchemaError::InvalidFieldNumber { field, .. } => field.as_str(),
                other => panic!("unexpected error {:?}", other),
            })
            .collect();
        assert_eq!(fields, ["a", "b", "c", "d"]);
    }

    #[test]
    fn names_and_maps() {
        let errors = verify(
            r#"
            syntax = "proto3";
            message A {
              int32 a = 1;
              string a = 2;
              map<float, string> m = 3;
              message A2 {}
              enum A2 { X = 0; }
            }
            message A {}
            "#,
        );
        assert_eq!(errors.len(), 4, "{:?}", errors);
    }

    #[test]
    fn duplicate_names_in_enums_services_and_oneofs() {
        let errors = verify(
            r#"
            syntax = "proto3";
            message Req {
              int32 choice = 1;
              oneof choice { string x = 2; }
            }
            enum E { ZERO = 0; ONE = 1; ONE = 2; }
            service S {
              rpc Get (Req) returns (Req);
              rpc Get (Req) returns (Req);
            }
            "#,
        );
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors.iter().all(|e| matches!(e, SchemaError::Verifier { .. })));
    }

    #[test]
    fn enum_rules() {
        let errors = verify("syntax = \"proto3\"; enum E { A = 1; } enum F {}");
        assert_eq!(errors.len(), 2, "{:?}", errors);

        let errors = verify("syntax = \"proto2\"; enum E { A = 1; B = 1; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn proto2_requires_labels() {
        let errors = verify("syntax = \"proto2\"; message A { int32 a = 1; }");
        assert_eq!(errors.len(), 1);
        let errors = verify("syntax = \"proto3\"; message A { required int32 a = 1; }");
        assert_eq!(errors.len(), 1);
    }
}
