//! Allocations held by a load run

use super::schedule::SideAllocation;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;

type Table = HashMap<String, Vec<u8>>;

/// Everything allocated by one iteration
pub(crate) struct Allocation {
    chunk: Vec<u8>,
    side: Option<SideBuffer>,
    /// Bytes built and dropped inside the iteration
    pub(crate) transient_bytes: u64,
}

enum SideBuffer {
    Block(Vec<u8>),
    Table(Table),
}

/// Allocate one iteration's buffers, filled from a generator seeded with `seed`
pub(crate) fn allocate(
    chunk_size: usize,
    side: SideAllocation,
    iteration: usize,
    seed: u64,
) -> Allocation {
    let mut rng = StdRng::seed_from_u64(seed);
    let chunk = random_bytes(&mut rng, chunk_size);

    let (side, transient_bytes) = match side {
        SideAllocation::None => (None, 0),
        SideAllocation::Block { bytes } => {
            (Some(SideBuffer::Block(random_bytes(&mut rng, bytes))), 0)
        }
        SideAllocation::Table {
            entries,
            value_bytes,
        } => {
            let table = random_table(&mut rng, "key", iteration, entries, value_bytes);
            (Some(SideBuffer::Table(table)), 0)
        }
        SideAllocation::Nested {
            groups,
            entries,
            value_bytes,
        } => {
            let nested: Vec<Table> = (0..groups)
                .map(|group| random_table(&mut rng, "nested", group, entries, value_bytes))
                .collect();
            (None, nested.iter().map(table_bytes).sum())
        }
    };

    Allocation {
        chunk,
        side,
        transient_bytes,
    }
}

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

fn random_table(
    rng: &mut StdRng,
    prefix: &str,
    group: usize,
    entries: usize,
    value_bytes: usize,
) -> Table {
    (0..entries)
        .map(|k| {
            (
                format!("{}_{}_{}", prefix, group, k),
                random_bytes(rng, value_bytes),
            )
        })
        .collect()
}

fn table_bytes(table: &Table) -> u64 {
    table
        .iter()
        .map(|(key, value)| (key.len() + value.len()) as u64)
        .sum()
}

/// Buffers kept alive for the whole run, in allocation order
#[derive(Default)]
pub(crate) struct PressureSet {
    chunks: Vec<Vec<u8>>,
    blocks: Vec<Vec<u8>>,
    tables: Vec<Table>,
}

impl PressureSet {
    /// Keep `allocation`; returns the bytes retained
    pub(crate) fn retain(&mut self, allocation: Allocation) -> u64 {
        let mut retained = allocation.chunk.len() as u64;
        self.chunks.push(allocation.chunk);

        match allocation.side {
            Some(SideBuffer::Block(block)) => {
                retained += block.len() as u64;
                self.blocks.push(block);
            }
            Some(SideBuffer::Table(table)) => {
                retained += table_bytes(&table);
                self.tables.push(table);
            }
            None => {}
        }

        retained
    }

    /// Number of phase buffers held
    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn bytes(&self) -> u64 {
        let chunks: u64 = self.chunks.iter().map(|c| c.len() as u64).sum();
        let blocks: u64 = self.blocks.iter().map(|b| b.len() as u64).sum();
        let tables: u64 = self.tables.iter().map(table_bytes).sum();
        chunks + blocks + tables
    }

    /// Release the entries at `index` of each list. Phase buffers within the
    /// last `stride` are left for the final release.
    pub(crate) fn release_step(&mut self, index: usize, stride: usize) -> u64 {
        let mut freed = 0;

        if index + stride < self.chunks.len() {
            freed += std::mem::take(&mut self.chunks[index]).len() as u64;
        }
        if let Some(block) = self.blocks.get_mut(index) {
            freed += std::mem::take(block).len() as u64;
        }
        if let Some(table) = self.tables.get_mut(index) {
            freed += table_bytes(&std::mem::take(table));
        }

        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_size_and_determinism() {
        let a = random_bytes(&mut StdRng::seed_from_u64(7), 1024);
        let b = random_bytes(&mut StdRng::seed_from_u64(7), 1024);
        assert_eq!(a.len(), 1024);
        assert_eq!(a, b);
        assert!(a.iter().any(|byte| *byte != 0));
    }

    #[test]
    fn test_side_allocations_are_retained_or_transient() {
        let mut set = PressureSet::default();

        let plain = allocate(64, SideAllocation::None, 0, 1);
        assert_eq!(set.retain(plain), 64);

        let block = allocate(64, SideAllocation::Block { bytes: 32 }, 1, 2);
        assert_eq!(set.retain(block), 96);

        let table = allocate(
            64,
            SideAllocation::Table {
                entries: 3,
                value_bytes: 8,
            },
            5,
            3,
        );
        // Keys "key_5_0" .. "key_5_2" are 7 bytes each
        assert_eq!(set.retain(table), 64 + 3 * (7 + 8));

        let nested = allocate(
            64,
            SideAllocation::Nested {
                groups: 2,
                entries: 2,
                value_bytes: 8,
            },
            6,
            4,
        );
        assert!(nested.transient_bytes >= 2 * 2 * 8);
        assert_eq!(set.retain(nested), 64);

        assert_eq!(set.len(), 4);
        assert_eq!(set.bytes(), 64 + 96 + 64 + 45 + 64);
    }

    #[test]
    fn test_release_step_keeps_the_last_stride_of_buffers() {
        let mut set = PressureSet::default();
        for i in 0..5 {
            set.retain(allocate(10, SideAllocation::Block { bytes: 1 }, i, i as u64));
        }

        assert_eq!(set.release_step(0, 2), 11);
        assert_eq!(set.release_step(2, 2), 11);
        // 4 + 2 is past the end, so only the side block goes
        assert_eq!(set.release_step(4, 2), 1);

        assert_eq!(set.len(), 5);
        assert_eq!(set.bytes(), 3 * 10 + 2);
    }
}
