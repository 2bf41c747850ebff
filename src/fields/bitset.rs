//! The bitset kind: a fixed number of bits per entry over a single bit
//! column, packed into native u64 words in memory.

use eyre::Result;

use crate::fields::{FieldId, FieldKind, FieldTree};
use crate::io::{ClusterIndex, ElementIndex};

const BITS_PER_WORD: usize = 64;

pub(crate) fn append(tree: &mut FieldTree, id: FieldId, from: *const u8) -> Result<usize> {
    let n_bits = match tree.kind(id) {
        FieldKind::Bitset { n_bits } => *n_bits,
        _ => unreachable!(),
    };
    let words =
        unsafe { std::slice::from_raw_parts(from as *const u64, n_bits.div_ceil(BITS_PER_WORD)) };
    let mut i = 0;
    for word in words {
        let mut mask = 0;
        while mask < BITS_PER_WORD && i < n_bits {
            let bit = ((word >> mask) & 1) as u8;
            tree.col_append(id, 0, &[bit])?;
            mask += 1;
            i += 1;
        }
    }
    Ok(n_bits)
}

pub(crate) fn read(tree: &FieldTree, id: FieldId, at: ElementIndex, to: *mut u8) -> Result<()> {
    let n_bits = match tree.kind(id) {
        FieldKind::Bitset { n_bits } => *n_bits,
        _ => unreachable!(),
    };
    let words = unsafe {
        std::slice::from_raw_parts_mut(to as *mut u64, n_bits.div_ceil(BITS_PER_WORD))
    };
    for i in 0..n_bits {
        let element = match at {
            ElementIndex::Global(g) => ElementIndex::Global(g * n_bits as u64 + i as u64),
            ElementIndex::Cluster(ci) => ElementIndex::Cluster(ClusterIndex::new(
                ci.cluster,
                ci.index * n_bits as u64 + i as u64,
            )),
        };
        let bit = tree.col_read_bit(id, 0, element)?;
        let mask = 1u64 << (i % BITS_PER_WORD);
        let word = &mut words[i / BITS_PER_WORD];
        *word = (*word & !mask) | ((bit as u64) << (i % BITS_PER_WORD));
    }
    Ok(())
}
