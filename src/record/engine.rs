//! The record engine: lazy decode, write-back encode and cache coherence.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

use super::field::{FieldDescriptor, FieldName, FieldTable};
use crate::error::{Result, UsbRevueError};
use crate::types::Value;

/// A byte buffer interpreted through a field table.
///
/// Decoded values are cached per field. Every write re-encodes into the buffer
/// and, in the same call, refreshes the written field's cache entry and evicts
/// any cached field whose bytes overlap the written range, so a cached value
/// always equals what decoding the buffer would produce.
///
/// The cache uses interior mutability, so a `Record` is not `Sync`; hand a
/// clone to another consumer instead of sharing one.
#[derive(Debug, Clone)]
pub struct Record<'t, F: FieldName> {
    buffer: Vec<u8>,
    table: &'t FieldTable<F>,
    cache: RefCell<HashMap<F, Value>>,
}

impl<'t, F: FieldName> Record<'t, F> {
    /// Creates a record over `buffer`, taking ownership of it.
    pub fn new(table: &'t FieldTable<F>, buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            table,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Gets the field table this record is read through.
    pub fn table(&self) -> &'t FieldTable<F> {
        self.table
    }

    /// Returns the current buffer contents.
    pub fn encode(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the record and returns its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Replaces the whole buffer. All cached values are dropped.
    pub fn replace_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer;
        self.cache.get_mut().clear();
    }

    /// Returns true if `field` currently has a cached value.
    pub fn is_cached(&self, field: F) -> bool {
        self.cache.borrow().contains_key(&field)
    }

    /// Decodes a fixed-width field, using the cache when possible.
    pub fn get(&self, field: F) -> Result<Value> {
        self.lookup(field, None)
    }

    /// Decodes a parameterized field whose length the caller supplies.
    pub fn get_sized(&self, field: F, len: usize) -> Result<Value> {
        self.lookup(field, Some(len))
    }

    /// Encodes `value` into a fixed-width field.
    pub fn set(&mut self, field: F, value: Value) -> Result<()> {
        self.store(field, None, value)
    }

    /// Encodes `value` into a parameterized field of the given length.
    pub fn set_sized(&mut self, field: F, len: usize, value: Value) -> Result<()> {
        self.store(field, Some(len), value)
    }

    /// Overwrites raw bytes at `offset`, evicting every cached field they overlap.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = offset..offset + bytes.len();
        if range.end > self.buffer.len() {
            return Err(UsbRevueError::BufferTooShort {
                field: "<raw>",
                needed: range.end,
                len: self.buffer.len(),
            });
        }
        self.buffer[range.clone()].copy_from_slice(bytes);
        self.evict_overlapping(&range, None);
        Ok(())
    }

    fn descriptor(&self, field: F) -> Result<&'t FieldDescriptor> {
        self.table
            .get(field)
            .ok_or(UsbRevueError::UnknownField(field.as_str()))
    }

    fn span(&self, field: F, len: Option<usize>) -> Result<Range<usize>> {
        let descriptor = self.descriptor(field)?;
        let span = descriptor
            .span(len)
            .ok_or(UsbRevueError::UnsizedField(field.as_str()))?;

        if span.end > self.buffer.len() {
            return Err(UsbRevueError::BufferTooShort {
                field: field.as_str(),
                needed: span.end,
                len: self.buffer.len(),
            });
        }
        Ok(span)
    }

    fn lookup(&self, field: F, len: Option<usize>) -> Result<Value> {
        let span = self.span(field, len)?;

        if let Some(cached) = self.cache.borrow().get(&field) {
            // A parameterized field may be looked up with a different length
            let fits = match cached {
                Value::Bytes(bytes) => bytes.len() == span.len(),
                _ => true,
            };
            if fits {
                return Ok(cached.clone());
            }
        }

        let codec = self.descriptor(field)?.codec;
        let value = codec.decode(&self.buffer[span]);
        self.cache.borrow_mut().insert(field, value.clone());
        Ok(value)
    }

    fn store(&mut self, field: F, len: Option<usize>, value: Value) -> Result<()> {
        let span = self.span(field, len)?;
        let codec = self.descriptor(field)?.codec;

        codec
            .encode(&value, &mut self.buffer[span.clone()])
            .map_err(|reason| UsbRevueError::EncodeRange {
                field: field.as_str(),
                value: value.to_string(),
                reason,
            })?;

        tracing::debug!(
            field = field.as_str(),
            %value,
            offset = span.start,
            "repacked field"
        );

        self.evict_overlapping(&span, Some(field));
        let decoded = codec.decode(&self.buffer[span]);
        self.cache.get_mut().insert(field, decoded);
        Ok(())
    }

    /// Drops cached values of fields whose bytes intersect `range`, except `keep`.
    fn evict_overlapping(&mut self, range: &Range<usize>, keep: Option<F>) {
        let table = self.table;
        let buffer_len = self.buffer.len();

        self.cache.get_mut().retain(|&cached, value| {
            if Some(cached) == keep {
                return true;
            }
            let Some(descriptor) = table.get(cached) else {
                return false;
            };
            let cached_len = match value {
                Value::Bytes(bytes) => Some(bytes.len()),
                _ => None,
            };
            match descriptor.span(cached_len) {
                Some(span) => span.end > buffer_len || !overlaps(&span, range),
                None => false,
            }
        });
    }
}

impl<F: FieldName> PartialEq for Record<'_, F> {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl<F: FieldName> Eq for Record<'_, F> {}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
