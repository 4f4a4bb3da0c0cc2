//! Typed column views
//!
//! A [`Column`] binds one field of a [`Store`] handle. It is valid only for
//! the store generation it was built against: the moment the owning
//! dataset's field set changes, cached columns are rebuilt, never patched.

use std::ops::Range;

use crate::dtype::{DType, Field, Value};
use crate::error::{Error, Result};
use crate::store::{ColumnData, Store};

/// A view over a single named, typed column of a store
#[derive(Debug, Clone)]
pub struct Column {
    store: Store,
    field: Field,
}

impl Column {
    /// Bind a view to one field of the given store
    pub fn new(store: Store, field: Field) -> Self {
        Self { store, field }
    }

    /// Name of the underlying field
    pub fn name(&self) -> &str {
        &self.field.name
    }

    /// Type tag of the underlying field
    pub fn dtype(&self) -> DType {
        self.field.dtype
    }

    /// Number of elements (the store's current row count)
    pub fn len(&self) -> usize {
        self.store.nrow()
    }

    /// Check whether the column holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_index(&self, idx: usize) -> Result<()> {
        let len = self.len();
        if idx >= len {
            return Err(Error::InvalidArgument(format!(
                "row index {idx} out of range for column '{}' of length {len}",
                self.field.name
            )));
        }
        Ok(())
    }

    /// Read the element at `idx`
    pub fn get(&self, idx: usize) -> Result<Value> {
        self.check_index(idx)?;
        self.store.get(&self.field.name, idx)
    }

    /// Write the element at `idx`
    pub fn set(&self, idx: usize, value: &Value) -> Result<()> {
        self.check_index(idx)?;
        self.store.set(&self.field.name, idx, value)
    }

    /// Bulk-read a contiguous range of elements
    pub fn get_range(&self, range: Range<usize>) -> Result<Vec<Value>> {
        if range.end > self.len() {
            return Err(Error::InvalidArgument(format!(
                "range {range:?} out of bounds for column '{}' of length {}",
                self.field.name,
                self.len()
            )));
        }
        range.map(|i| self.store.get(&self.field.name, i)).collect()
    }

    /// Materialize the whole column as values
    pub fn values(&self) -> Vec<Value> {
        self.data().values()
    }

    /// Copy out the whole backing vector
    pub fn data(&self) -> ColumnData {
        // The field was present when this view was built; a stale view against
        // a replaced store is a caller error surfaced by the dataset cache.
        self.store
            .column_data(&self.field.name)
            .unwrap_or_else(|_| ColumnData::default_for(self.field.dtype, 0))
    }

    /// Replace the whole column; length must match the store's row count
    pub fn assign(&self, data: ColumnData) -> Result<()> {
        self.store.set_column_data(&self.field.name, data)
    }

    /// Fill every element with one scalar value
    pub fn fill(&self, value: &Value) -> Result<()> {
        self.store.fill_column(&self.field.name, value)
    }

    /// The dtype this column serializes as when packed fixed-width
    ///
    /// Variable-length strings pack to a fixed byte string wide enough for
    /// the longest element (minimum width 1); every other tag is already
    /// fixed width.
    pub fn packed_dtype(&self) -> DType {
        match (self.field.dtype, &self.data()) {
            (DType::Str, ColumnData::Str(v)) => {
                let width = v.iter().map(|s| s.len()).max().unwrap_or(0).max(1);
                DType::FixedStr(width)
            }
            (dtype, _) => dtype,
        }
    }

    /// Element-wise equality against another column view
    pub fn eq_elements(&self, other: &Column) -> bool {
        self.len() == other.len() && self.data() == other.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(name: &str, data: ColumnData) -> Store {
        let store = Store::new();
        let dtype = data.dtype();
        store.addcol(Field::new(name, dtype));
        store.addrows(data.len());
        store.set_column_data(name, data).unwrap();
        store
    }

    #[test]
    fn indexed_and_bulk_access() {
        let store = store_with("x", ColumnData::from(vec![1i32, 2, 3, 4]));
        let col = Column::new(store, Field::new("x", DType::I32));
        assert_eq!(col.get(2).unwrap(), Value::I32(3));
        col.set(2, &Value::I32(30)).unwrap();
        assert_eq!(
            col.get_range(1..3).unwrap(),
            vec![Value::I32(2), Value::I32(30)]
        );
        assert!(col.get(4).is_err());
    }

    #[test]
    fn fill_and_eq_elements() {
        let a = store_with("x", ColumnData::from(vec![0.0f64; 3]));
        let b = store_with("x", ColumnData::from(vec![7.0f64; 3]));
        let ca = Column::new(a, Field::new("x", DType::F64));
        let cb = Column::new(b, Field::new("x", DType::F64));
        assert!(!ca.eq_elements(&cb));
        ca.fill(&Value::F64(7.0)).unwrap();
        assert!(ca.eq_elements(&cb));
    }

    #[test]
    fn packed_dtype_for_strings() {
        let store = store_with("s", ColumnData::from(vec!["ab", "wxyz", ""]));
        let col = Column::new(store, Field::new("s", DType::Str));
        assert_eq!(col.packed_dtype(), DType::FixedStr(4));

        let empty = store_with("s", ColumnData::Str(vec![]));
        let col = Column::new(empty, Field::new("s", DType::Str));
        assert_eq!(col.packed_dtype(), DType::FixedStr(1));
    }
}
