//! Column storage engine
//!
//! A [`Store`] is the single source of truth for a dataset's row count and
//! column buffers. It is a cheap-clone handle; structural operations that
//! logically need a new layout (drop, rename) build a brand-new store and
//! swap the handle rather than patching buffers in place.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dtype::{DType, Field, Value};
use crate::error::{Error, Result};

/// Typed backing vector for one column
///
/// Fixed- and variable-width strings share the `Str` variant; the column's
/// [`Field`] tag records which one it is.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// 8-bit unsigned integers
    U8(Vec<u8>),
    /// 16-bit unsigned integers
    U16(Vec<u16>),
    /// 32-bit unsigned integers
    U32(Vec<u32>),
    /// 64-bit unsigned integers
    U64(Vec<u64>),
    /// 8-bit signed integers
    I8(Vec<i8>),
    /// 16-bit signed integers
    I16(Vec<i16>),
    /// 32-bit signed integers
    I32(Vec<i32>),
    /// 64-bit signed integers
    I64(Vec<i64>),
    /// 32-bit floats
    F32(Vec<f32>),
    /// 64-bit floats
    F64(Vec<f64>),
    /// Booleans
    Bool(Vec<bool>),
    /// Strings
    Str(Vec<String>),
}

macro_rules! per_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ColumnData::U8($v) => $body,
            ColumnData::U16($v) => $body,
            ColumnData::U32($v) => $body,
            ColumnData::U64($v) => $body,
            ColumnData::I8($v) => $body,
            ColumnData::I16($v) => $body,
            ColumnData::I32($v) => $body,
            ColumnData::I64($v) => $body,
            ColumnData::F32($v) => $body,
            ColumnData::F64($v) => $body,
            ColumnData::Bool($v) => $body,
            ColumnData::Str($v) => $body,
        }
    };
}

impl ColumnData {
    /// Allocate a default-initialized column for the given type tag
    pub fn default_for(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::U8 => ColumnData::U8(vec![0; len]),
            DType::U16 => ColumnData::U16(vec![0; len]),
            DType::U32 => ColumnData::U32(vec![0; len]),
            DType::U64 => ColumnData::U64(vec![0; len]),
            DType::I8 => ColumnData::I8(vec![0; len]),
            DType::I16 => ColumnData::I16(vec![0; len]),
            DType::I32 => ColumnData::I32(vec![0; len]),
            DType::I64 => ColumnData::I64(vec![0; len]),
            DType::F32 => ColumnData::F32(vec![0.0; len]),
            DType::F64 => ColumnData::F64(vec![0.0; len]),
            DType::Bool => ColumnData::Bool(vec![false; len]),
            DType::FixedStr(_) | DType::Str => ColumnData::Str(vec![String::new(); len]),
        }
    }

    /// The natural type tag inferred from this data
    ///
    /// String data infers as variable-length; a fixed width only arises from
    /// an explicit descriptor or a deserialized file.
    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::U8(_) => DType::U8,
            ColumnData::U16(_) => DType::U16,
            ColumnData::U32(_) => DType::U32,
            ColumnData::U64(_) => DType::U64,
            ColumnData::I8(_) => DType::I8,
            ColumnData::I16(_) => DType::I16,
            ColumnData::I32(_) => DType::I32,
            ColumnData::I64(_) => DType::I64,
            ColumnData::F32(_) => DType::F32,
            ColumnData::F64(_) => DType::F64,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Str(_) => DType::Str,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        per_variant!(self, v => v.len())
    }

    /// Check whether the column holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `n` default-initialized elements
    pub fn extend_default(&mut self, n: usize) {
        per_variant!(self, v => v.resize(v.len() + n, Default::default()));
    }

    /// Read the element at `idx`
    pub fn get(&self, idx: usize) -> Value {
        match self {
            ColumnData::U8(v) => Value::U8(v[idx]),
            ColumnData::U16(v) => Value::U16(v[idx]),
            ColumnData::U32(v) => Value::U32(v[idx]),
            ColumnData::U64(v) => Value::U64(v[idx]),
            ColumnData::I8(v) => Value::I8(v[idx]),
            ColumnData::I16(v) => Value::I16(v[idx]),
            ColumnData::I32(v) => Value::I32(v[idx]),
            ColumnData::I64(v) => Value::I64(v[idx]),
            ColumnData::F32(v) => Value::F32(v[idx]),
            ColumnData::F64(v) => Value::F64(v[idx]),
            ColumnData::Bool(v) => Value::Bool(v[idx]),
            ColumnData::Str(v) => Value::Str(v[idx].clone()),
        }
    }

    /// Write the element at `idx`, coercing compatible numeric values
    pub fn set(&mut self, idx: usize, value: &Value) -> Result<()> {
        fn bad(value: &Value, dtype: DType) -> Error {
            Error::InvalidArgument(format!("cannot store {value:?} in a {dtype} column"))
        }
        macro_rules! int_slot {
            ($v:expr, $ty:ty, $dt:expr) => {{
                let raw = match value {
                    Value::U8(x) => i128::from(*x),
                    Value::U16(x) => i128::from(*x),
                    Value::U32(x) => i128::from(*x),
                    Value::U64(x) => i128::from(*x),
                    Value::I8(x) => i128::from(*x),
                    Value::I16(x) => i128::from(*x),
                    Value::I32(x) => i128::from(*x),
                    Value::I64(x) => i128::from(*x),
                    _ => return Err(bad(value, $dt)),
                };
                $v[idx] = <$ty>::try_from(raw).map_err(|_| bad(value, $dt))?;
            }};
        }
        match self {
            ColumnData::U8(v) => int_slot!(v, u8, DType::U8),
            ColumnData::U16(v) => int_slot!(v, u16, DType::U16),
            ColumnData::U32(v) => int_slot!(v, u32, DType::U32),
            ColumnData::U64(v) => int_slot!(v, u64, DType::U64),
            ColumnData::I8(v) => int_slot!(v, i8, DType::I8),
            ColumnData::I16(v) => int_slot!(v, i16, DType::I16),
            ColumnData::I32(v) => int_slot!(v, i32, DType::I32),
            ColumnData::I64(v) => int_slot!(v, i64, DType::I64),
            #[allow(clippy::cast_possible_truncation)]
            ColumnData::F32(v) => {
                v[idx] = value.as_f64().ok_or_else(|| bad(value, DType::F32))? as f32;
            }
            ColumnData::F64(v) => {
                v[idx] = value.as_f64().ok_or_else(|| bad(value, DType::F64))?;
            }
            ColumnData::Bool(v) => match value {
                Value::Bool(b) => v[idx] = *b,
                _ => return Err(bad(value, DType::Bool)),
            },
            ColumnData::Str(v) => match value {
                Value::Str(s) => v[idx] = s.clone(),
                _ => return Err(bad(value, DType::Str)),
            },
        }
        Ok(())
    }

    /// Materialize every element as a [`Value`]
    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Copy out the elements at the given indices, in the given order
    pub fn take(&self, indices: &[usize]) -> Self {
        macro_rules! take_variant {
            ($variant:ident, $v:expr) => {
                ColumnData::$variant(indices.iter().map(|&i| $v[i].clone()).collect())
            };
        }
        match self {
            ColumnData::U8(v) => take_variant!(U8, v),
            ColumnData::U16(v) => take_variant!(U16, v),
            ColumnData::U32(v) => take_variant!(U32, v),
            ColumnData::U64(v) => take_variant!(U64, v),
            ColumnData::I8(v) => take_variant!(I8, v),
            ColumnData::I16(v) => take_variant!(I16, v),
            ColumnData::I32(v) => take_variant!(I32, v),
            ColumnData::I64(v) => take_variant!(I64, v),
            ColumnData::F32(v) => take_variant!(F32, v),
            ColumnData::F64(v) => take_variant!(F64, v),
            ColumnData::Bool(v) => take_variant!(Bool, v),
            ColumnData::Str(v) => take_variant!(Str, v),
        }
    }
}

macro_rules! column_data_from {
    ($($native:ty => $variant:ident),* $(,)?) => {
        $(impl From<Vec<$native>> for ColumnData {
            fn from(v: Vec<$native>) -> Self {
                ColumnData::$variant(v)
            }
        })*
    };
}

column_data_from!(
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    f32 => F32, f64 => F64, bool => Bool, String => Str,
);

impl From<Vec<&str>> for ColumnData {
    fn from(v: Vec<&str>) -> Self {
        ColumnData::Str(v.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
    cols: Vec<ColumnData>,
    nrows: usize,
}

/// Cheap-clone handle to a column storage engine
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Store {
    /// Create an empty store with zero rows and no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows
    pub fn nrow(&self) -> usize {
        self.inner.borrow().nrows
    }

    /// Check whether a column with the given name exists
    pub fn contains(&self, name: &str) -> bool {
        self.inner.borrow().index.contains_key(name)
    }

    /// Ordered column names
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .borrow()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    /// Ordered (name, dtype) pairs
    pub fn items(&self) -> Vec<(String, DType)> {
        self.inner
            .borrow()
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.dtype))
            .collect()
    }

    /// Look up the full descriptor for a column
    pub fn field(&self, name: &str) -> Option<Field> {
        let inner = self.inner.borrow();
        inner.index.get(name).map(|&i| inner.fields[i].clone())
    }

    /// Add a column, default-initialized to the current row count
    ///
    /// Adding a name that already exists is a no-op.
    pub fn addcol(&self, field: Field) {
        let mut inner = self.inner.borrow_mut();
        if inner.index.contains_key(&field.name) {
            return;
        }
        let nrows = inner.nrows;
        let slot = inner.fields.len();
        inner.index.insert(field.name.clone(), slot);
        inner.cols.push(ColumnData::default_for(field.dtype, nrows));
        inner.fields.push(field);
    }

    /// Append `n` rows, default-initializing every cell
    pub fn addrows(&self, n: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.nrows += n;
        for col in &mut inner.cols {
            col.extend_default(n);
        }
    }

    /// Independent deep copy of every buffer
    pub fn deep_copy(&self) -> Store {
        let inner = self.inner.borrow();
        Store {
            inner: Rc::new(RefCell::new(StoreInner {
                fields: inner.fields.clone(),
                index: inner.index.clone(),
                cols: inner.cols.clone(),
                nrows: inner.nrows,
            })),
        }
    }

    fn col_index(&self, name: &str) -> Result<usize> {
        self.inner
            .borrow()
            .index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Read one cell
    pub fn get(&self, name: &str, idx: usize) -> Result<Value> {
        let i = self.col_index(name)?;
        Ok(self.inner.borrow().cols[i].get(idx))
    }

    /// Write one cell
    pub fn set(&self, name: &str, idx: usize, value: &Value) -> Result<()> {
        let i = self.col_index(name)?;
        self.inner.borrow_mut().cols[i].set(idx, value)
    }

    /// Copy out a whole column
    pub fn column_data(&self, name: &str) -> Result<ColumnData> {
        let i = self.col_index(name)?;
        Ok(self.inner.borrow().cols[i].clone())
    }

    /// Replace a whole column's data
    ///
    /// The replacement must match the store's row count exactly; no silent
    /// truncation or padding. The declared field tag stays authoritative:
    /// data of a different type is coerced element-wise into it, and an
    /// uncoercible element is an error.
    pub fn set_column_data(&self, name: &str, data: ColumnData) -> Result<()> {
        let i = self.col_index(name)?;
        let mut inner = self.inner.borrow_mut();
        if data.len() != inner.nrows {
            return Err(Error::ShapeMismatch {
                field: name.to_string(),
                expected: inner.nrows,
                actual: data.len(),
            });
        }
        let declared = inner.fields[i].dtype;
        let matches_tag = data.dtype() == declared
            || (declared.is_string() && data.dtype().is_string());
        inner.cols[i] = if matches_tag {
            data
        } else {
            let mut coerced = ColumnData::default_for(declared, data.len());
            for idx in 0..data.len() {
                coerced.set(idx, &data.get(idx))?;
            }
            coerced
        };
        Ok(())
    }

    /// Fill a whole column with a single scalar value
    pub fn fill_column(&self, name: &str, value: &Value) -> Result<()> {
        let i = self.col_index(name)?;
        let mut inner = self.inner.borrow_mut();
        let nrows = inner.nrows;
        let col = &mut inner.cols[i];
        for idx in 0..nrows {
            col.set(idx, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addcol_defaults_and_addrows() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::U32));
        store.addrows(3);
        store.addcol(Field::new("b", DType::Str));
        assert_eq!(store.nrow(), 3);
        assert_eq!(store.get("a", 2).unwrap(), Value::U32(0));
        assert_eq!(store.get("b", 0).unwrap(), Value::Str(String::new()));
        assert_eq!(
            store.keys(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn addcol_existing_name_is_noop() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::U32));
        store.addrows(1);
        store.set("a", 0, &Value::U32(9)).unwrap();
        store.addcol(Field::new("a", DType::F64));
        assert_eq!(store.field("a").unwrap().dtype, DType::U32);
        assert_eq!(store.get("a", 0).unwrap(), Value::U32(9));
    }

    #[test]
    fn deep_copy_is_independent() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::I64));
        store.addrows(2);
        let copy = store.deep_copy();
        store.set("a", 0, &Value::I64(5)).unwrap();
        assert_eq!(copy.get("a", 0).unwrap(), Value::I64(0));
    }

    #[test]
    fn set_column_data_validates_shape() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::F32));
        store.addrows(2);
        let err = store
            .set_column_data("a", ColumnData::from(vec![1.0f32]))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn set_column_data_coerces_into_declared_dtype() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::F64));
        store.addrows(3);
        store
            .set_column_data("a", ColumnData::from(vec![1u32, 2, 3]))
            .unwrap();
        assert_eq!(store.field("a").unwrap().dtype, DType::F64);
        assert_eq!(store.get("a", 0).unwrap(), Value::F64(1.0));

        let err = store
            .set_column_data("a", ColumnData::from(vec![true, false, true]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn int_coercion_checks_range() {
        let store = Store::new();
        store.addcol(Field::new("a", DType::U8));
        store.addrows(1);
        store.set("a", 0, &Value::I64(200)).unwrap();
        assert_eq!(store.get("a", 0).unwrap(), Value::U8(200));
        assert!(store.set("a", 0, &Value::I64(-1)).is_err());
    }

    #[test]
    fn take_preserves_order() {
        let col = ColumnData::from(vec![10u64, 20, 30, 40]);
        assert_eq!(col.take(&[3, 1]), ColumnData::from(vec![40u64, 20]));
    }
}
