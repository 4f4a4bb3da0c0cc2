//! The column-oriented table
//!
//! A [`Dataset`] owns one [`Store`] and exposes a field-mapping interface
//! over it: ordered named columns, a lazily rebuilt column-view cache, the
//! field lifecycle (add/drop/rename/filter), row selection, and load/save
//! entry points.
//!
//! The dataset is a cheap-clone handle. [`Row`] views and [`Spool`]s hold
//! clones of it and always resolve through the current column cache, so a
//! structural mutation is observed by every outstanding view on its next
//! access.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::rc::Rc;

use rand::Rng;
use tracing::debug;

use crate::column::Column;
use crate::dtype::{DType, Field, Value};
use crate::error::{Error, Result};
use crate::io::{self, Format};
use crate::row::Row;
use crate::spool::Spool;
use crate::store::{ColumnData, Store};

/// Name of the mandatory 64-bit identifier field
pub const UID: &str = "uid";

/// Generate `num` random 64-bit unsigned ids
pub fn generate_uids(num: usize) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..num).map(|_| rng.gen()).collect()
}

struct ColCache {
    generation: u64,
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

struct DatasetInner {
    store: Store,
    /// Bumped on every structural (field-set) mutation; caches record the
    /// generation they were built against and rebuild when stale.
    generation: u64,
    cols: Option<ColCache>,
    /// Row count snapshotted by the first `rows()` call; not refreshed on
    /// later row-count changes until `invalidate_rows()`.
    rows_len: Option<usize>,
}

/// Cheap-clone handle to a column-oriented table
#[derive(Clone)]
pub struct Dataset {
    inner: Rc<RefCell<DatasetInner>>,
}

impl Dataset {
    fn from_inner(store: Store) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DatasetInner {
                store,
                generation: 0,
                cols: None,
                rows_len: None,
            })),
        }
    }

    /// Adopt an existing store as-is
    pub fn from_store(store: Store) -> Self {
        Self::from_inner(store)
    }

    /// Build a uid-only dataset with `size` freshly generated ids
    pub fn with_size(size: usize) -> Self {
        let store = Store::new();
        store.addcol(Field::new(UID, DType::U64));
        store.addrows(size);
        let dset = Self::from_inner(store);
        // Cannot fail: the column was just added with a matching length.
        let _ = dset
            .store()
            .set_column_data(UID, ColumnData::U64(generate_uids(size)));
        dset
    }

    /// Build an empty dataset of `size` rows with the declared fields
    pub fn allocate(size: usize, fields: &[Field]) -> Self {
        let dset = Self::with_size(size);
        dset.add_fields(fields);
        dset
    }

    /// Build a dataset from ordered `(name, data)` pairs
    ///
    /// Each field's dtype is inferred from its data. All pairs must have
    /// equal length; a generated uid column is inserted first when none is
    /// supplied.
    pub fn from_columns<S, D>(pairs: impl IntoIterator<Item = (S, D)>) -> Result<Self>
    where
        S: Into<String>,
        D: Into<ColumnData>,
    {
        let mut populate: Vec<(Field, ColumnData)> = pairs
            .into_iter()
            .map(|(name, data)| {
                let data = data.into();
                (Field::new(&name.into(), data.dtype()), data)
            })
            .collect();

        let nrows = populate.first().map_or(0, |(_, data)| data.len());
        for (field, data) in &populate {
            if data.len() != nrows {
                return Err(Error::LengthMismatch {
                    field: field.name.clone(),
                    expected: nrows,
                    actual: data.len(),
                });
            }
        }
        if !populate.iter().any(|(field, _)| field.name == UID) {
            populate.insert(
                0,
                (
                    Field::new(UID, DType::U64),
                    ColumnData::U64(generate_uids(nrows)),
                ),
            );
        }

        let store = Store::new();
        for (field, _) in &populate {
            store.addcol(field.clone());
        }
        store.addrows(nrows);
        for (field, data) in populate {
            store.set_column_data(&field.name, data)?;
        }
        Ok(Self::from_inner(store))
    }

    /// Build a dataset from explicit field descriptors and matching data
    ///
    /// Used by row selection and deserialization, where dtypes (fixed string
    /// widths in particular) must be preserved rather than re-inferred. A
    /// generated uid column is inserted first when absent.
    pub(crate) fn from_field_data(
        mut fields: Vec<Field>,
        mut cols: Vec<ColumnData>,
        nrows: usize,
    ) -> Result<Self> {
        if !fields.iter().any(|f| f.name == UID) {
            fields.insert(0, Field::new(UID, DType::U64));
            cols.insert(0, ColumnData::U64(generate_uids(nrows)));
        }
        let store = Store::new();
        for field in &fields {
            store.addcol(field.clone());
        }
        store.addrows(nrows);
        for (field, data) in fields.iter().zip(cols) {
            store.set_column_data(&field.name, data)?;
        }
        Ok(Self::from_inner(store))
    }

    pub(crate) fn store(&self) -> Store {
        self.inner.borrow().store.clone()
    }

    /// Current structural generation
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    fn bump_generation(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.generation += 1;
        inner.cols = None;
    }

    fn replace_store(&self, store: Store) {
        let mut inner = self.inner.borrow_mut();
        inner.store = store;
        inner.generation += 1;
        inner.cols = None;
    }

    fn ensure_cols(&self) {
        let mut inner = self.inner.borrow_mut();
        let generation = inner.generation;
        let stale = inner.cols.as_ref().map_or(true, |c| c.generation != generation);
        if stale {
            let store = inner.store.clone();
            let mut columns = Vec::new();
            let mut by_name = HashMap::new();
            for (name, dtype) in store.items() {
                by_name.insert(name.clone(), columns.len());
                columns.push(Column::new(store.clone(), Field::new(&name, dtype)));
            }
            inner.cols = Some(ColCache {
                generation,
                columns,
                by_name,
            });
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.store().nrow()
    }

    /// Check whether the dataset has zero rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a field exists
    pub fn contains(&self, name: &str) -> bool {
        self.store().contains(name)
    }

    /// Ordered field names, optionally omitting uid
    pub fn fields(&self, exclude_uid: bool) -> Vec<String> {
        self.store()
            .keys()
            .into_iter()
            .filter(|k| !exclude_uid || k != UID)
            .collect()
    }

    /// Current (name, dtype) descriptors
    pub fn descr(&self) -> Vec<Field> {
        self.store()
            .items()
            .into_iter()
            .map(|(name, dtype)| Field::new(&name, dtype))
            .collect()
    }

    /// The cached column view for a field, rebuilding the cache when stale
    pub fn column(&self, name: &str) -> Result<Column> {
        self.ensure_cols();
        let inner = self.inner.borrow();
        let cache = inner.cols.as_ref().expect("cache built by ensure_cols");
        cache
            .by_name
            .get(name)
            .map(|&i| cache.columns[i].clone())
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// All column views in field order
    pub fn columns(&self) -> Vec<Column> {
        self.ensure_cols();
        let inner = self.inner.borrow();
        inner
            .cols
            .as_ref()
            .expect("cache built by ensure_cols")
            .columns
            .clone()
    }

    /// Set or add a whole column
    ///
    /// An absent field is added with a dtype inferred from the data; an
    /// existing field keeps its declared dtype and the data is coerced into
    /// it. The data length must match the current row count.
    pub fn set_column(&self, name: &str, data: impl Into<ColumnData>) -> Result<()> {
        let data = data.into();
        if !self.contains(name) {
            if data.len() != self.len() {
                return Err(Error::ShapeMismatch {
                    field: name.to_string(),
                    expected: self.len(),
                    actual: data.len(),
                });
            }
            self.store().addcol(Field::new(name, data.dtype()));
            self.bump_generation();
        }
        self.store().set_column_data(name, data)
    }

    /// Set or add a column by broadcasting one scalar to every row
    pub fn set_scalar(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if !self.contains(name) {
            self.store().addcol(Field::new(name, value.dtype()));
            self.bump_generation();
        }
        self.store().fill_column(name, &value)
    }

    /// Remove a field
    pub fn remove_column(&self, name: &str) -> Result<()> {
        self.drop_fields(&[name])
    }

    /// A view of one row
    pub fn row(&self, idx: usize) -> Row {
        Row::new(self.clone(), idx)
    }

    /// A spool of one row view per current row index
    ///
    /// The row count is snapshotted on first call and reused until
    /// [`Dataset::invalidate_rows`]; structural field changes need no
    /// invalidation because rows recompute their field set on access.
    pub fn rows(&self) -> Spool {
        let len = {
            let current = self.len();
            let mut inner = self.inner.borrow_mut();
            *inner.rows_len.get_or_insert(current)
        };
        Spool::new((0..len).map(|i| Row::new(self.clone(), i)).collect())
    }

    /// Drop the snapshotted row count used by [`Dataset::rows`]
    pub fn invalidate_rows(&self) {
        self.inner.borrow_mut().rows_len = None;
    }

    /// Deep copy of the store wrapped in a new dataset
    pub fn copy(&self) -> Dataset {
        Self::from_inner(self.store().deep_copy())
    }

    /// Ensure the dataset has the given fields
    ///
    /// Idempotent: only names not already present are added, default
    /// initialized.
    pub fn add_fields(&self, fields: &[Field]) {
        let store = self.store();
        let missing: Vec<&Field> = fields
            .iter()
            .filter(|f| !store.contains(&f.name))
            .collect();
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "adding fields");
        for field in missing {
            store.addcol(field.clone());
        }
        self.bump_generation();
    }

    /// Ensure the dataset has the given field names, all of one dtype
    pub fn add_fields_with_dtype(&self, names: &[&str], dtype: DType) {
        let fields: Vec<Field> = names.iter().map(|n| Field::new(n, dtype)).collect();
        self.add_fields(&fields);
    }

    /// Remove the given fields, preserving uid, row order, and all other data
    ///
    /// Builds a replacement store rather than patching the current one; names
    /// not present are ignored.
    pub fn drop_fields(&self, names: &[&str]) -> Result<()> {
        debug!(?names, "dropping fields");
        let store = self.store();
        let next = Store::new();
        for (name, dtype) in store.items() {
            if name == UID || !names.contains(&name.as_str()) {
                next.addcol(Field::new(&name, dtype));
            }
        }
        next.addrows(store.nrow());
        for name in next.keys() {
            next.set_column_data(&name, store.column_data(&name)?)?;
        }
        self.replace_store(next);
        Ok(())
    }

    /// Rename every field through the given function (uid included)
    ///
    /// Two source fields mapping to one target name is an error, never a
    /// silent merge. Renaming uid away leaves a freshly generated uid column
    /// in its place.
    pub fn rename_fields(&self, mut rename: impl FnMut(&str) -> String) -> Result<()> {
        let store = self.store();
        let mut fields: Vec<Field> = Vec::new();
        let mut cols = Vec::new();
        for (name, dtype) in store.items() {
            let new_name = rename(&name);
            if fields.iter().any(|f| f.name == new_name) {
                return Err(Error::InvalidArgument(format!(
                    "rename collision: two fields map to '{new_name}'"
                )));
            }
            cols.push(store.column_data(&name)?);
            fields.push(Field::new(&new_name, dtype));
        }
        let renamed = Self::from_field_data(fields, cols, store.nrow())?;
        debug!("renamed fields");
        self.replace_store(renamed.store());
        Ok(())
    }

    /// Rename fields through a map; names missing from the map are unchanged
    pub fn rename_fields_map(&self, map: &HashMap<String, String>) -> Result<()> {
        self.rename_fields(|name| map.get(name).cloned().unwrap_or_else(|| name.to_string()))
    }

    /// Keep uid plus every field satisfying the predicate
    pub fn filter_fields(&self, keep: impl Fn(&str) -> bool) -> Result<()> {
        let drop: Vec<String> = self
            .fields(true)
            .into_iter()
            .filter(|f| !keep(f))
            .collect();
        let drop: Vec<&str> = drop.iter().map(String::as_str).collect();
        self.drop_fields(&drop)
    }

    /// Keep uid plus every field named in the list
    pub fn filter_fields_list(&self, keep: &[&str]) -> Result<()> {
        self.filter_fields(|name| keep.contains(&name))
    }

    /// Row-major materialization, one value list per row
    pub fn to_list(&self, exclude_uid: bool) -> Result<Vec<Vec<Value>>> {
        let columns: Vec<Column> = self
            .columns()
            .into_iter()
            .filter(|c| !exclude_uid || c.name() != UID)
            .collect();
        (0..self.len())
            .map(|idx| columns.iter().map(|c| c.get(idx)).collect())
            .collect()
    }

    /// A new dataset restricted to the given row indices, in the given order
    pub fn subset(&self, indices: &[usize]) -> Result<Dataset> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(Error::InvalidArgument(format!(
                "row index {bad} out of range for dataset of length {len}"
            )));
        }
        let store = self.store();
        let fields = self.descr();
        let cols = fields
            .iter()
            .map(|f| Ok(store.column_data(&f.name)?.take(indices)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_field_data(fields, cols, indices.len())
    }

    /// A new dataset keeping exactly the rows where the mask is true
    pub fn mask(&self, mask: &[bool]) -> Result<Dataset> {
        if mask.len() != self.len() {
            return Err(Error::ShapeMismatch {
                field: "mask".to_string(),
                expected: self.len(),
                actual: mask.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.subset(&indices)
    }

    /// A new dataset holding the contiguous row range `start..stop`
    ///
    /// `stop` is clamped to the row count; an inverted range yields an empty
    /// dataset with the same fields.
    pub fn range(&self, start: usize, stop: usize) -> Result<Dataset> {
        let stop = stop.min(self.len());
        let indices: Vec<usize> = (start.min(stop)..stop).collect();
        self.subset(&indices)
    }

    /// A new dataset of the rows satisfying the predicate
    pub fn query(&self, pred: impl Fn(&Row) -> bool) -> Result<Dataset> {
        let indices: Vec<usize> = (0..self.len())
            .filter(|&i| pred(&self.row(i)))
            .collect();
        self.subset(&indices)
    }

    /// A new dataset of the rows whose `field` value is one of `values`
    pub fn query_values(&self, field: &str, values: &[Value]) -> Result<Dataset> {
        let column = self.column(field)?;
        let mut indices = Vec::new();
        for idx in 0..self.len() {
            if values.contains(&column.get(idx)?) {
                indices.push(idx);
            }
        }
        self.subset(&indices)
    }

    /// Read a dataset from a stream, dispatching on the 6-byte magic prefix
    pub fn load<R: Read + Seek>(reader: R) -> Result<Dataset> {
        io::load(reader)
    }

    /// Read a dataset from a file path
    pub fn load_file(path: impl AsRef<Path>) -> Result<Dataset> {
        Self::load(BufReader::new(File::open(path)?))
    }

    /// Write the dataset to a stream in the given format
    pub fn save<W: Write>(&self, writer: W, format: Format) -> Result<()> {
        io::save(self, writer, format)
    }

    /// Write the dataset to a file path in the given format
    pub fn save_file(&self, path: impl AsRef<Path>, format: Format) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer, format)?;
        writer.flush()?;
        Ok(())
    }
}

impl PartialEq for Dataset {
    /// Same field-name set and element-wise equal columns; order and declared
    /// string widths are not significant.
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.fields(false);
        let mut b = other.fields(false);
        a.sort();
        b.sort();
        if a != b {
            return false;
        }
        a.iter().all(|name| {
            match (self.store().column_data(name), other.store().column_data(name)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        })
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("rows", &self.len())
            .field("fields", &self.fields(false))
            .finish()
    }
}
