//! Shared fixtures for the criterion benchmarks.

use minidb_core::{PageNo, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storage::{encode_record, BTree, MemoryStorage, Pager, Result};

pub const SEED: u64 = 0x5EED_CAFE;

pub fn memory_btree() -> Result<BTree> {
    Ok(BTree::new(Pager::new(Box::new(MemoryStorage::new()))?))
}

/// A two-column row the size of a typical small record.
pub fn sample_row(id: i64) -> Vec<u8> {
    encode_record(&[Value::Int(id), Value::text(format!("row-{:08}", id))])
}

/// Row ids in random order, without duplicates.
pub fn shuffled_keys(n: usize) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut keys: Vec<i64> = (0..n as i64).collect();
    for i in (1..keys.len()).rev() {
        let j = rng.gen_range(0..=i);
        keys.swap(i, j);
    }
    keys
}

/// A fresh in-memory table holding rows `0..n`.
pub fn populated_table(n: usize) -> Result<(BTree, PageNo)> {
    let mut tree = memory_btree()?;
    let root = tree.create_table()?;
    for id in 0..n as i64 {
        tree.insert(root, id, &sample_row(id))?;
    }
    Ok((tree, root))
}
