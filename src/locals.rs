// locals.rs - Target-language local slot assignment
//
// Maps every let-bound variable of a block to a C local slot. Policy is a
// single linear scan over the block: a slot frees up after its binding's
// last use, and the lowest free slot is reused first. Two bindings whose
// live ranges overlap never share a slot.

use crate::ir::{Statement, VarName};
use std::collections::{BTreeMap, BTreeSet};

/// Slot assignment for one block.
#[derive(Debug, Clone, Default)]
pub struct LocalAlloc {
    pub slots: BTreeMap<VarName, u32>,
    /// Number of distinct slots; the emitter declares this many locals.
    pub count: u32,
}

/// Assign a slot to every let binding in the block.
pub fn allocate(block: &[Statement]) -> LocalAlloc {
    // (name, definition index, last use index); an unused binding's range
    // is just its definition.
    let mut ranges: Vec<(VarName, usize, usize)> = Vec::new();
    for (i, stmt) in block.iter().enumerate() {
        if let Statement::Let(name, _) = stmt {
            let mut last = i;
            for (j, later) in block.iter().enumerate().skip(i + 1) {
                if later.mentions_var(name) {
                    last = j;
                }
            }
            ranges.push((name.clone(), i, last));
        }
    }

    let mut alloc = LocalAlloc::default();
    let mut free: BTreeSet<u32> = BTreeSet::new();
    let mut active: Vec<(u32, usize)> = Vec::new();

    for (name, def, last) in ranges {
        active.retain(|(slot, end)| {
            if *end < def {
                free.insert(*slot);
                false
            } else {
                true
            }
        });
        let slot = match free.pop_first() {
            Some(slot) => slot,
            None => {
                let slot = alloc.count;
                alloc.count += 1;
                slot
            }
        };
        active.push((slot, last));
        alloc.slots.insert(name, slot);
    }

    alloc
}
