//! Runtime half of dynproto: the descriptor graph a schema compiles to, a
//! dynamic value model, and the Protocol Buffers wire codec that moves
//! between the two. See
//! [https://protobuf.dev/programming-guides/encoding/](https://protobuf.dev/programming-guides/encoding/)
//! for documentation about the format.
//!
//! ```
//! use dynproto_schema::*;
//!
//! let mut builder = RegistryBuilder::new();
//! let file = builder
//!     .add_file(FileDescriptor::new("point.proto".into(), "geo".into(), Syntax::Proto3))
//!     .unwrap();
//! let point = builder
//!     .add_message(MessageDescriptor::new("Point".into(), "geo.Point".into(), file, None, Syntax::Proto3))
//!     .unwrap();
//! builder.message_mut(point).fields.push(FieldDescriptor {
//!     name: "x".into(),
//!     json_name: "x".into(),
//!     number: 1,
//!     kind: Kind::Sint32,
//!     cardinality: Cardinality::Optional,
//!     packed: false,
//!     oneof: None,
//!     proto3_optional: false,
//! });
//! let registry = builder.build();
//!
//! let value = DynamicMessage::decode(&registry, point, &[0x08, 0x03]).unwrap();
//! assert_eq!(value.get(1), Some(&Value::I32(-2)));
//! assert_eq!(value.encode(&registry), [0x08, 0x03]);
//! ```

pub mod bb;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod value;

pub use bb::*;
pub use descriptor::*;
pub use error::*;
pub use registry::*;
pub use value::*;
