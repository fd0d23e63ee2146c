//! Column builders for constructing Polars Series from decoded field values.
//!
//! This module provides builders that handle:
//! - Null-filling for fields that are absent on some packets
//! - Pre-allocation for performance
//! - Mapping each primitive codec onto a Polars dtype

use crate::error::Result;
use crate::types::{PrimitiveCodec, Value};
use polars::prelude::*;

/// Polars representation chosen for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    UInt64,
    Int64,
    Boolean,
    /// Byte arrays, rendered as lowercase hex strings.
    Hex,
}

impl ColumnType {
    /// Column type that holds every value `codec` can decode to.
    pub fn for_codec(codec: PrimitiveCodec) -> Self {
        match codec {
            PrimitiveCodec::Bool => ColumnType::Boolean,
            PrimitiveCodec::Bytes(_) | PrimitiveCodec::VarBytes => ColumnType::Hex,
            c if c.is_signed() => ColumnType::Int64,
            _ => ColumnType::UInt64,
        }
    }

    /// The Polars dtype produced by [`ColumnBuilder::build`].
    pub fn to_polars_dtype(self) -> DataType {
        match self {
            ColumnType::UInt64 => DataType::UInt64,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Hex => DataType::String,
        }
    }
}

/// A builder for a single column.
pub struct ColumnBuilder {
    name: String,
    dtype: ColumnType,
    values: Vec<Option<Value>>,
}

impl ColumnBuilder {
    /// Creates a new ColumnBuilder with pre-allocated capacity.
    pub fn new(name: String, dtype: ColumnType, capacity: usize) -> Self {
        Self {
            name,
            dtype,
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: Option<Value>) {
        self.values.push(value);
    }

    pub fn push_null(&mut self) {
        self.values.push(None);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds a Polars Series. Values of the wrong kind become nulls.
    pub fn build(self) -> Series {
        let name = self.name.as_str().into();
        match self.dtype {
            ColumnType::UInt64 => {
                let values: Vec<Option<u64>> = self
                    .values
                    .into_iter()
                    .map(|opt| opt.and_then(|v| v.as_u64()))
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Int64 => {
                let values: Vec<Option<i64>> = self
                    .values
                    .into_iter()
                    .map(|opt| opt.and_then(|v| v.as_i64()))
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Boolean => {
                let values: Vec<Option<bool>> = self
                    .values
                    .into_iter()
                    .map(|opt| opt.and_then(|v| v.as_bool()))
                    .collect();
                Series::new(name, values)
            }
            ColumnType::Hex => {
                let values: Vec<Option<String>> = self
                    .values
                    .into_iter()
                    .map(|opt| opt.and_then(|v| v.as_bytes().map(hex::encode)))
                    .collect();
                Series::new(name, values)
            }
        }
    }
}

/// A collection of column builders for constructing a DataFrame row by row.
pub struct DataFrameBuilder {
    rows: usize,
    columns: Vec<ColumnBuilder>,
}

impl DataFrameBuilder {
    /// Creates a new DataFrameBuilder with pre-allocated capacity.
    pub fn new(columns: Vec<(String, ColumnType)>, capacity: usize) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, dtype)| ColumnBuilder::new(name, dtype, capacity))
            .collect();

        Self { rows: 0, columns }
    }

    /// Adds a row. Missing trailing values are filled with nulls.
    pub fn push_row(&mut self, values: Vec<Option<Value>>) {
        self.rows += 1;

        let mut values = values.into_iter();
        for builder in self.columns.iter_mut() {
            match values.next() {
                Some(value) => builder.push(value),
                None => builder.push_null(),
            }
        }
    }

    /// Builds a Polars DataFrame from the accumulated rows.
    pub fn build(self) -> Result<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .into_iter()
            .map(|builder| builder.build().into())
            .collect();

        Ok(DataFrame::new(columns)?)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}
