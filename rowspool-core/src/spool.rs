//! Ordered row collections with sampling, splitting, and batching
//!
//! A [`Spool`] owns an ordered sequence of [`Row`] views, a replaceable
//! random generator, and lazily created circular-cursor state. Split and
//! batch operations produce new spools without mutating the original's
//! order, though labeling splits write a `{prefix}/split` field back into
//! the shared dataset through row writes.

use std::ops::Index;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::dtype::{DType, Field, Value};
use crate::error::{Error, Result};
use crate::row::Row;

struct Cursor {
    /// Permutation (or identity sequence) over row positions
    order: Vec<usize>,
    /// Next position within `order`
    pos: usize,
}

/// Ordered row collection with spooled sampling and dataset splitting
pub struct Spool {
    rows: Vec<Row>,
    rng: StdRng,
    cursor: Option<Cursor>,
}

impl Spool {
    /// Create a spool over the given rows with a fresh entropy-seeded generator
    pub fn new(rows: Vec<Row>) -> Self {
        Self::with_rng(rows, StdRng::from_entropy())
    }

    /// Create a spool over the given rows with an explicit generator
    pub fn with_rng(rows: Vec<Row>, rng: StdRng) -> Self {
        Self {
            rows,
            rng,
            cursor: None,
        }
    }

    /// Replace the random generator
    pub fn set_random(&mut self, rng: StdRng) {
        self.rng = rng;
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check whether the spool holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The row at `idx`, if in range
    pub fn get(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    /// Iterate the rows in current order
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// The backing rows in current order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn permutation(&mut self, random: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        if random {
            order.shuffle(&mut self.rng);
        }
        order
    }

    fn gather(&self, indices: &[usize]) -> Vec<Row> {
        indices.iter().map(|&i| self.rows[i].clone()).collect()
    }

    /// Ensure every row's dataset carries the split field, then label the rows
    fn label(rows: &[Row], field: &str, value: u32) -> Result<()> {
        for row in rows {
            row.dataset().add_fields(&[Field::new(field, DType::U32)]);
            row.set(field, Value::U32(value))?;
        }
        Ok(())
    }

    fn split_field(prefix: Option<&str>) -> String {
        prefix.map_or_else(|| "split".to_string(), |p| format!("{p}/split"))
    }

    /// Partition into two spools of sizes (num, rest)
    ///
    /// A random partition draws a fresh permutation; otherwise index order is
    /// used. With a prefix, `{prefix}/split` is written as 0 on the first
    /// result and 1 on the second, adding the field to the underlying dataset
    /// when absent.
    pub fn split(&mut self, num: usize, random: bool, prefix: Option<&str>) -> Result<(Spool, Spool)> {
        let order = self.permutation(random);
        let num = num.min(order.len());
        let d1 = Spool::with_rng(self.gather(&order[..num]), self.rng.clone());
        let d2 = Spool::with_rng(self.gather(&order[num..]), self.rng.clone());
        if let Some(prefix) = prefix {
            let field = Self::split_field(Some(prefix));
            Self::label(&d1.rows, &field, 0)?;
            Self::label(&d2.rows, &field, 1)?;
        }
        Ok((d1, d2))
    }

    /// Label every row 0 or 1 in place, then partition by label
    ///
    /// Random labeling flips a coin per row; otherwise labels alternate by
    /// position. Both halves keep the original relative order.
    pub fn split_half_in_order(&mut self, prefix: &str, random: bool) -> Result<(Spool, Spool)> {
        let field = Self::split_field(Some(prefix));
        let labels: Vec<u32> = (0..self.rows.len())
            .map(|idx| {
                if random {
                    self.rng.gen_range(0..2)
                } else {
                    (idx % 2) as u32
                }
            })
            .collect();
        for (row, &label) in self.rows.iter().zip(&labels) {
            row.dataset().add_fields(&[Field::new(&field, DType::U32)]);
            row.set(&field, Value::U32(label))?;
        }
        let d1 = self.rows.iter().zip(&labels).filter(|(_, &l)| l == 0);
        let d2 = self.rows.iter().zip(&labels).filter(|(_, &l)| l == 1);
        Ok((
            Spool::with_rng(d1.map(|(r, _)| r.clone()).collect(), self.rng.clone()),
            Spool::with_rng(d2.map(|(r, _)| r.clone()).collect(), self.rng.clone()),
        ))
    }

    /// Like [`Spool::split`], but both halves are labeled with the same value
    pub fn split_with_split(
        &mut self,
        num: usize,
        random: bool,
        prefix: Option<&str>,
        split: u32,
    ) -> Result<(Spool, Spool)> {
        let order = self.permutation(random);
        let num = num.min(order.len());
        let d1 = Spool::with_rng(self.gather(&order[..num]), self.rng.clone());
        let d2 = Spool::with_rng(self.gather(&order[num..]), self.rng.clone());
        if let Some(prefix) = prefix {
            let field = Self::split_field(Some(prefix));
            Self::label(&d1.rows, &field, split)?;
            Self::label(&d2.rows, &field, split)?;
        }
        Ok((d1, d2))
    }

    /// Partition by an already-recorded `{prefix}/split` field (0 vs 1)
    pub fn split_by_splits(&self, prefix: Option<&str>) -> Result<(Spool, Spool)> {
        let field = Self::split_field(prefix);
        let mut zeros = Vec::new();
        let mut ones = Vec::new();
        for row in &self.rows {
            match row.get(&field)?.as_f64() {
                Some(v) if v == 0.0 => zeros.push(row.clone()),
                Some(v) if v == 1.0 => ones.push(row.clone()),
                _ => {}
            }
        }
        Ok((
            Spool::with_rng(zeros, self.rng.clone()),
            Spool::with_rng(ones, self.rng.clone()),
        ))
    }

    /// Partition by equality of `field` against the two given values
    pub fn split_from_field(&self, field: &str, vals: (Value, Value)) -> Result<(Spool, Spool)> {
        let mut first = Vec::new();
        let mut second = Vec::new();
        for row in &self.rows {
            let v = row.get(field)?;
            if v == vals.0 {
                first.push(row.clone());
            } else if v == vals.1 {
                second.push(row.clone());
            }
        }
        Ok((
            Spool::with_rng(first, self.rng.clone()),
            Spool::with_rng(second, self.rng.clone()),
        ))
    }

    /// Partition by a permutation drawn from a fresh `seed`-seeded generator
    ///
    /// Both results carry identically `seed`-seeded generators, decorrelated
    /// from this spool's generator state.
    pub fn split_into_quarter(&self, num: usize, seed: u64) -> (Spool, Spool) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.shuffle(&mut rng);
        let num = num.min(order.len());
        (
            Spool::with_rng(self.gather(&order[..num]), StdRng::seed_from_u64(seed)),
            Spool::with_rng(self.gather(&order[num..]), StdRng::seed_from_u64(seed)),
        )
    }

    /// Group rows by field value, preserving first-occurrence key order
    pub fn split_by(&self, field: &str) -> Result<Vec<(Value, Vec<Row>)>> {
        let mut groups: Vec<(Value, Vec<Row>)> = Vec::new();
        for row in &self.rows {
            let key = row.get(field)?;
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(row.clone()),
                None => groups.push((key, vec![row.clone()])),
            }
        }
        Ok(groups)
    }

    /// Sample `num` rows without replacement
    pub fn get_random_subset(&mut self, num: usize) -> Result<Vec<Row>> {
        if num > self.rows.len() {
            return Err(Error::InsufficientItems {
                requested: num,
                available: self.rows.len(),
            });
        }
        let picks = rand::seq::index::sample(&mut self.rng, self.rows.len(), num);
        Ok(picks.iter().map(|i| self.rows[i].clone()).collect())
    }

    /// (Re)establish the cursor: a permutation (or identity sequence) of row
    /// positions, starting at position zero
    pub fn setup_spooling(&mut self, random: bool) {
        let order = self.permutation(random);
        self.cursor = Some(Cursor { order, pos: 0 });
    }

    /// Circular-buffer sampling: take `num` rows at the cursor and advance it
    ///
    /// Establishes a random cursor implicitly on first use. Asking for the
    /// whole spool (or more) returns every row in original order without
    /// touching the cursor. With `peek`, the rows are returned but the cursor
    /// stays put. One uninterrupted epoch enumerates every row exactly once.
    pub fn spool(&mut self, num: usize, peek: bool) -> Result<Vec<Row>> {
        if self.rows.is_empty() {
            return Err(Error::InsufficientItems {
                requested: num,
                available: 0,
            });
        }
        if num >= self.rows.len() {
            return Ok(self.rows.clone());
        }
        if self.cursor.is_none() {
            self.setup_spooling(true);
        }
        let cursor = self.cursor.as_mut().expect("cursor established above");
        let len = cursor.order.len();
        let picked: Vec<Row> = (0..num)
            .map(|k| self.rows[cursor.order[(cursor.pos + k) % len]].clone())
            .collect();
        if !peek {
            cursor.pos = (cursor.pos + num) % len;
            trace!(pos = cursor.pos, num, "advanced spool cursor");
        }
        Ok(picked)
    }

    /// Non-overlapping consecutive slices of `num` rows in current order
    ///
    /// The final batch may be shorter; no randomization.
    pub fn make_batches(&self, num: usize) -> Result<Vec<Spool>> {
        if num == 0 {
            return Err(Error::InvalidArgument("batch size must be nonzero".into()));
        }
        Ok(self
            .rows
            .chunks(num)
            .map(|chunk| Spool::with_rng(chunk.to_vec(), self.rng.clone()))
            .collect())
    }
}

impl Index<usize> for Spool {
    type Output = Row;

    fn index(&self, idx: usize) -> &Row {
        &self.rows[idx]
    }
}

impl<'a> IntoIterator for &'a Spool {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl std::fmt::Debug for Spool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Spool with {} rows", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::store::ColumnData;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn dataset(n: u64) -> Dataset {
        Dataset::from_columns([("uid", ColumnData::U64((1..=n).collect()))]).unwrap()
    }

    fn uids(rows: &[Row]) -> Vec<u64> {
        rows.iter().map(|r| r.uid().unwrap()).collect()
    }

    #[test]
    fn split_in_order() {
        let dset = dataset(5);
        let mut spool = dset.rows();
        let (d1, d2) = spool.split(3, false, None).unwrap();
        assert_eq!(uids(d1.rows()), vec![1, 2, 3]);
        assert_eq!(uids(d2.rows()), vec![4, 5]);
    }

    #[test]
    fn split_labels_rows_and_adds_field() {
        let dset = dataset(4);
        let mut spool = dset.rows();
        let (d1, d2) = spool.split(2, false, Some("alg")).unwrap();
        assert!(dset.contains("alg/split"));
        for row in d1.iter() {
            assert_eq!(row.get("alg/split").unwrap(), Value::U32(0));
        }
        for row in d2.iter() {
            assert_eq!(row.get("alg/split").unwrap(), Value::U32(1));
        }
    }

    #[test]
    fn split_random_is_deterministic_under_seed() {
        let dset = dataset(8);
        let mut a = dset.rows();
        a.set_random(StdRng::seed_from_u64(42));
        let mut b = dset.rows();
        b.set_random(StdRng::seed_from_u64(42));
        let (a1, _) = a.split(4, true, None).unwrap();
        let (b1, _) = b.split(4, true, None).unwrap();
        assert_eq!(uids(a1.rows()), uids(b1.rows()));
    }

    #[test]
    fn split_half_in_order_partitions_by_label() {
        let dset = dataset(6);
        let mut spool = dset.rows();
        let (d1, d2) = spool.split_half_in_order("pass", false).unwrap();
        assert_eq!(uids(d1.rows()), vec![1, 3, 5]);
        assert_eq!(uids(d2.rows()), vec![2, 4, 6]);
        assert_eq!(dset.row(1).get("pass/split").unwrap(), Value::U32(1));
    }

    #[test]
    fn split_with_split_labels_both_halves_alike() {
        let dset = dataset(4);
        let mut spool = dset.rows();
        let (d1, d2) = spool.split_with_split(1, false, Some("job"), 7).unwrap();
        for row in d1.iter().chain(d2.iter()) {
            assert_eq!(row.get("job/split").unwrap(), Value::U32(7));
        }
    }

    #[test]
    fn split_by_splits_reads_back_labels() {
        let dset = dataset(5);
        let mut spool = dset.rows();
        spool.split(2, false, Some("alg")).unwrap();
        let (zeros, ones) = dset.rows().split_by_splits(Some("alg")).unwrap();
        assert_eq!(uids(zeros.rows()), vec![1, 2]);
        assert_eq!(uids(ones.rows()), vec![3, 4, 5]);
    }

    #[test]
    fn split_from_field_matches_values() {
        let dset = Dataset::from_columns([
            ("uid", ColumnData::from(vec![1u64, 2, 3, 4])),
            ("grp", ColumnData::from(vec![5i32, 9, 5, 2])),
        ])
        .unwrap();
        let (a, b) = dset
            .rows()
            .split_from_field("grp", (Value::I32(5), Value::I32(9)))
            .unwrap();
        assert_eq!(uids(a.rows()), vec![1, 3]);
        assert_eq!(uids(b.rows()), vec![2]);
    }

    #[test]
    fn split_into_quarter_is_seed_deterministic() {
        let dset = dataset(8);
        let spool = dset.rows();
        let (a1, a2) = spool.split_into_quarter(3, 99);
        let (b1, b2) = spool.split_into_quarter(3, 99);
        assert_eq!(uids(a1.rows()), uids(b1.rows()));
        assert_eq!(uids(a2.rows()), uids(b2.rows()));
        assert_eq!(a1.len(), 3);
        assert_eq!(a2.len(), 5);
    }

    #[test]
    fn split_by_groups_in_first_occurrence_order() {
        let dset = Dataset::from_columns([
            ("uid", ColumnData::from(vec![1u64, 2, 3, 4])),
            ("tag", ColumnData::from(vec!["b", "a", "b", "c"])),
        ])
        .unwrap();
        let groups = dset.rows().split_by("tag").unwrap();
        let keys: Vec<&Value> = groups.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![&Value::from("b"), &Value::from("a"), &Value::from("c")]
        );
        assert_eq!(uids(&groups[0].1), vec![1, 3]);
    }

    #[test]
    fn random_subset_without_replacement() {
        let dset = dataset(6);
        let mut spool = dset.rows();
        let picked = spool.get_random_subset(4).unwrap();
        let distinct: HashSet<u64> = uids(&picked).into_iter().collect();
        assert_eq!(distinct.len(), 4);

        let err = spool.get_random_subset(7).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientItems { requested: 7, available: 6 }
        ));
    }

    #[test]
    fn spool_oversubscribed_returns_all_without_advancing() {
        let dset = dataset(5);
        let mut spool = dset.rows();
        spool.setup_spooling(true);
        let before = uids(&spool.spool(2, true).unwrap());
        let all = spool.spool(5, false).unwrap();
        assert_eq!(uids(&all), vec![1, 2, 3, 4, 5]);
        let after = uids(&spool.spool(2, true).unwrap());
        assert_eq!(before, after);
    }

    #[test]
    fn spool_in_order_cursor_wraps() {
        let dset = dataset(5);
        let mut spool = dset.rows();
        spool.setup_spooling(false);
        assert_eq!(uids(&spool.spool(2, false).unwrap()), vec![1, 2]);
        assert_eq!(uids(&spool.spool(2, false).unwrap()), vec![3, 4]);
        assert_eq!(uids(&spool.spool(2, false).unwrap()), vec![5, 1]);
    }

    #[test]
    fn spool_peek_does_not_advance() {
        let dset = dataset(4);
        let mut spool = dset.rows();
        spool.setup_spooling(false);
        assert_eq!(uids(&spool.spool(2, true).unwrap()), vec![1, 2]);
        assert_eq!(uids(&spool.spool(2, false).unwrap()), vec![1, 2]);
    }

    #[test]
    fn spool_over_zero_rows_errors() {
        let mut spool = Spool::new(Vec::new());
        assert!(matches!(
            spool.spool(1, false).unwrap_err(),
            Error::InsufficientItems { available: 0, .. }
        ));
    }

    #[test]
    fn make_batches_consecutive() {
        let dset = dataset(5);
        let spool = dset.rows();
        let batches = spool.make_batches(2).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(uids(batches[0].rows()), vec![1, 2]);
        assert_eq!(uids(batches[2].rows()), vec![5]);
        assert!(spool.make_batches(0).is_err());
    }

    proptest! {
        /// An uninterrupted epoch visits every row exactly once.
        #[test]
        fn epoch_enumerates_every_row_once(len in 2usize..32, k in 1usize..31, seed in any::<u64>()) {
            let k = k.min(len - 1);
            let dset = dataset(len as u64);
            let mut spool = dset.rows();
            spool.set_random(StdRng::seed_from_u64(seed));
            spool.setup_spooling(true);
            let mut drawn = Vec::new();
            while drawn.len() < len {
                drawn.extend(uids(&spool.spool(k, false).unwrap()));
            }
            let epoch: HashSet<u64> = drawn[..len].iter().copied().collect();
            prop_assert_eq!(epoch.len(), len);
        }
    }
}
