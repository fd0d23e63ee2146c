//! Generic named-field access over fixed-layout byte buffers.
//!
//! A record kind is described once by a [`FieldTable`] mapping a closed
//! enumeration of field names to [`FieldDescriptor`]s. A [`Record`] couples a
//! byte buffer with such a table and decodes fields on demand, caching them
//! until a write touches the bytes they were decoded from.

pub mod engine;
pub mod field;

pub use engine::Record;
pub use field::{FieldDescriptor, FieldName, FieldTable};
