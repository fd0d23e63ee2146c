//! Field descriptors and per-kind field tables.

use crate::types::PrimitiveCodec;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

/// A closed set of field names for one record kind.
pub trait FieldName: Copy + Eq + Hash + Debug + 'static {
    /// Name used for display, diffs and string lookup.
    fn as_str(self) -> &'static str;
}

/// Where and how one field is stored within a record's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub codec: PrimitiveCodec,
    pub offset: usize,
}

impl FieldDescriptor {
    pub const fn new(codec: PrimitiveCodec, offset: usize) -> Self {
        Self { codec, offset }
    }

    /// Byte range occupied by the field. `len` is only consulted for
    /// parameterized codecs; `None` is returned when it is needed but absent.
    pub fn span(&self, len: Option<usize>) -> Option<Range<usize>> {
        let width = self.codec.width().or(len)?;
        Some(self.offset..self.offset + width)
    }
}

/// Immutable mapping from field name to descriptor, shared by every record of a kind.
#[derive(Debug, Clone)]
pub struct FieldTable<F: FieldName> {
    fields: Vec<F>,
    descriptors: HashMap<F, FieldDescriptor>,
}

impl<F: FieldName> FieldTable<F> {
    /// Builds a table. Field order is preserved for iteration.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (F, FieldDescriptor)>,
    {
        let mut fields = Vec::new();
        let mut descriptors = HashMap::new();

        for (name, descriptor) in entries {
            if descriptors.insert(name, descriptor).is_none() {
                fields.push(name);
            }
        }

        Self {
            fields,
            descriptors,
        }
    }

    /// Gets the descriptor for a field.
    pub fn get(&self, field: F) -> Option<&FieldDescriptor> {
        self.descriptors.get(&field)
    }

    pub fn contains(&self, field: F) -> bool {
        self.descriptors.contains_key(&field)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[F] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Two {
        A,
        B,
    }

    impl FieldName for Two {
        fn as_str(self) -> &'static str {
            match self {
                Two::A => "a",
                Two::B => "b",
            }
        }
    }

    #[test]
    fn test_span() {
        let fixed = FieldDescriptor::new(PrimitiveCodec::U32, 4);
        assert_eq!(fixed.span(None), Some(4..8));
        assert_eq!(fixed.span(Some(100)), Some(4..8));

        let var = FieldDescriptor::new(PrimitiveCodec::VarBytes, 64);
        assert_eq!(var.span(None), None);
        assert_eq!(var.span(Some(8)), Some(64..72));
    }

    #[test]
    fn test_table_order_and_lookup() {
        let table = FieldTable::new([
            (Two::B, FieldDescriptor::new(PrimitiveCodec::U8, 1)),
            (Two::A, FieldDescriptor::new(PrimitiveCodec::U8, 0)),
        ]);
        assert_eq!(table.fields(), &[Two::B, Two::A]);
        assert_eq!(table.get(Two::A).unwrap().offset, 0);
        assert_eq!(table.len(), 2);

        let partial = FieldTable::new([(Two::A, FieldDescriptor::new(PrimitiveCodec::U8, 0))]);
        assert!(!partial.contains(Two::B));
        assert!(partial.get(Two::B).is_none());
    }
}
