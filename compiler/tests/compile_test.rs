#![cfg(test)]

use std::fs;
use std::path::Path;

use dynproto_compiler::{compile_files, compile_tree, SchemaError};
use dynproto_schema::{Kind, Syntax};

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

#[test]
fn test_compile_tree() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "common/money.proto",
        r#"
        syntax = "proto3";
        package acme.common;

        message Money {
          string currency = 1;
          int64 units = 2;
        }
        "#,
    );
    write(
        dir.path(),
        "orders/order.proto",
        r#"
        syntax = "proto3";
        package acme.orders;

        import "common/money.proto";

        message Order {
          int64 id = 1;
          acme.common.Money total = 2;
          repeated Line lines = 3;

          message Line {
            string sku = 1;
            uint32 quantity = 2;
          }
        }
        "#,
    );

    let registry = compile_tree(dir.path()).expect("compile_tree failed");

    // Check both files are registered under their relative paths
    assert_eq!(registry.len(), 2);
    let order_file = registry.file("orders/order.proto").unwrap();
    assert_eq!(order_file.package, "acme.orders");
    assert_eq!(order_file.syntax, Syntax::Proto3);
    assert_eq!(order_file.dependencies, vec!["common/money.proto".to_string()]);

    // Check message lookup, including nested names
    let order = registry.message(registry.find_message(order_file, "Order").unwrap());
    assert_eq!(order.full_name, "acme.orders.Order");
    assert!(registry.find_message(order_file, "Order.Line").is_some());
    assert!(registry.find_message(order_file, ".acme.orders.Order").is_some());
    assert!(registry.find_message(order_file, "Money").is_none());

    // Check cross-file resolution
    let total = order.field_by_number(2).unwrap();
    let money = registry.message(total.kind.as_message().unwrap());
    assert_eq!(money.full_name, "acme.common.Money");
    assert_eq!(registry.file_at(money.file).name, "common/money.proto");

    let lines = order.field_by_name("lines").unwrap();
    assert!(lines.is_repeated());
    assert_eq!(registry.message(lines.kind.as_message().unwrap()).name, "Line");
}

#[test]
fn test_import_cycle_compiles() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.proto",
        r#"
        syntax = "proto3";
        package cyc;
        import "b.proto";
        message A { B b = 1; }
        "#,
    );
    write(
        dir.path(),
        "b.proto",
        r#"
        syntax = "proto3";
        package cyc;
        import "a.proto";
        message B { A a = 1; int32 depth = 2; }
        "#,
    );

    let registry = compile_tree(dir.path()).expect("import cycle should compile");
    let a = registry
        .find_message(registry.file("a.proto").unwrap(), "A")
        .unwrap();
    let b = registry
        .find_message(registry.file("b.proto").unwrap(), "B")
        .unwrap();
    assert_eq!(registry.message(a).fields[0].kind, Kind::Message(b));
    assert_eq!(registry.message(b).fields[0].kind, Kind::Message(a));
}

#[test]
fn test_duplicate_field_number_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dup.proto",
        r#"
        syntax = "proto3";
        message Dup {
          int32 a = 1;
          string b = 1;
        }
        "#,
    );

    let err = compile_tree(dir.path()).unwrap_err();
    match err {
        SchemaError::DuplicateFieldNumber { file, message, number } => {
            assert_eq!(file, "dup.proto");
            assert_eq!(message, "Dup");
            assert_eq!(number, 1);
        }
        other => panic!("expected a duplicate field number error but got {:?}", other),
    }
}

#[test]
fn test_unresolved_import_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "main.proto",
        "syntax = \"proto3\";\nimport \"missing/dep.proto\";\nmessage M {}\n",
    );

    let err = compile_tree(dir.path()).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("main.proto"), "{}", text);
    assert!(text.contains("missing/dep.proto"), "{}", text);
}

#[test]
fn test_unresolved_type_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "main.proto",
        "syntax = \"proto3\";\npackage p;\nmessage M { Nowhere n = 1; }\n",
    );

    let err = compile_tree(dir.path()).unwrap_err();
    match err {
        SchemaError::UnresolvedType { file, message, field, type_name } => {
            assert_eq!(file, "main.proto");
            assert_eq!(message, "p.M");
            assert_eq!(field, "n");
            assert_eq!(type_name, "Nowhere");
        }
        other => panic!("expected an unresolved type error but got {:?}", other),
    }
}

#[test]
fn test_parse_error_location() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.proto", "syntax = \"proto3\";\nmessage {\n");

    match compile_tree(dir.path()).unwrap_err() {
        SchemaError::Parse { file, line, column, .. } => {
            assert_eq!(file, "broken.proto");
            assert_eq!((line, column), (2, 9));
        }
        other => panic!("expected a parse error but got {:?}", other),
    }
}

#[test]
fn test_empty_tree_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let registry = compile_tree(dir.path()).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_compile_selected_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ok.proto", "syntax = \"proto3\"; message Ok {}");
    write(dir.path(), "broken.proto", "this is not a schema");

    let registry = compile_files(dir.path(), &["./ok.proto".to_string()]).unwrap();
    assert!(registry.file("ok.proto").is_some());
    assert!(registry.file("broken.proto").is_none());

    let err = compile_files(dir.path(), &["absent.proto".to_string()]).unwrap_err();
    assert!(matches!(err, SchemaError::Io { .. }));
}
