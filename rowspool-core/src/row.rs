//! Per-index row views
//!
//! A [`Row`] holds only a dataset handle and a row index — deliberately
//! never a column view or store handle, so every access resolves through
//! the dataset's current column cache and never observes stale buffers
//! after a structural mutation.

use std::collections::HashMap;

use crate::dataset::{Dataset, UID};
use crate::dtype::Value;
use crate::error::{Error, Result};

/// Zero-copy, name-addressed view of one row of a dataset
#[derive(Debug, Clone)]
pub struct Row {
    dataset: Dataset,
    idx: usize,
}

impl Row {
    /// Create a view of row `idx` of the given dataset
    pub fn new(dataset: Dataset, idx: usize) -> Self {
        Self { dataset, idx }
    }

    /// The owning dataset handle
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Index of this row within the dataset
    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Current field count of the owning dataset (recomputed, never cached)
    pub fn len(&self) -> usize {
        self.dataset.fields(false).len()
    }

    /// Check whether the owning dataset has no fields
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership against the dataset's current field set
    pub fn contains(&self, name: &str) -> bool {
        self.dataset.contains(name)
    }

    /// Field names in dataset order
    pub fn fields(&self) -> Vec<String> {
        self.dataset.fields(false)
    }

    /// Read one field's value at this row
    pub fn get(&self, name: &str) -> Result<Value> {
        self.dataset.column(name)?.get(self.idx)
    }

    /// Read one field, falling back to a default when absent
    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Value {
        self.get(name).unwrap_or_else(|_| default.into())
    }

    /// Write one field's value at this row
    ///
    /// Unknown names are an error; fields are never created through a row
    /// write.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.dataset.column(name)?.set(self.idx, &value.into())
    }

    /// Values in field order, optionally omitting uid
    pub fn to_list(&self, exclude_uid: bool) -> Result<Vec<Value>> {
        self.dataset
            .fields(exclude_uid)
            .iter()
            .map(|name| self.get(name))
            .collect()
    }

    /// Name-to-value map over every current field
    pub fn to_dict(&self) -> Result<HashMap<String, Value>> {
        self.fields()
            .into_iter()
            .map(|name| {
                let value = self.get(&name)?;
                Ok((name, value))
            })
            .collect()
    }

    /// In-place bulk assignment of every existing field from the map
    ///
    /// A missing key for an existing field is an error; extra keys in the map
    /// are ignored. Uid is assigned like any other field when present.
    pub fn from_dict(&self, values: &HashMap<String, Value>) -> Result<()> {
        for name in self.fields() {
            let value = values.get(&name).ok_or_else(|| {
                Error::InvalidArgument(format!("missing value for field '{name}'"))
            })?;
            self.set(&name, value.clone())?;
        }
        Ok(())
    }

    /// Convenience accessor for this row's uid
    pub fn uid(&self) -> Result<u64> {
        self.get(UID)?
            .as_u64()
            .ok_or_else(|| Error::InvalidArgument("uid field is not unsigned".to_string()))
    }
}
