// liveness.rs - Backward liveness dataflow
//
// Computes, for every block, the region that may be read before being
// overwritten on some path from block entry (live-in) and from block exit
// (live-out). Indirect control flow is approximated by a single cached
// region: the union of the live-in sets of all declared indirect-jump
// targets. Updates are monotone over the finite Region bitmap, so the
// iteration reaches a fixed point.

use crate::ir::{Address, BlockMap, CondExpr, Statement};
use crate::region::Region;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Where control may go after a block's terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    Direct(Address),
    /// Any declared indirect-jump target.
    Indirect,
}

/// Successors of a block, read off its final statement. A literal jump
/// condition prunes the untaken side.
pub fn successors(block: &[Statement]) -> Vec<Successor> {
    match block.last() {
        Some(Statement::Jump(CondExpr::LitCond(true), a, _)) => vec![Successor::Direct(*a)],
        Some(Statement::Jump(CondExpr::LitCond(false), _, b)) => vec![Successor::Direct(*b)],
        Some(Statement::Jump(_, a, b)) => {
            if a == b {
                vec![Successor::Direct(*a)]
            } else {
                vec![Successor::Direct(*a), Successor::Direct(*b)]
            }
        }
        Some(Statement::IndirectJump(_)) => vec![Successor::Indirect],
        Some(Statement::Syscall(a)) => vec![Successor::Direct(*a), Successor::Indirect],
        Some(Statement::Break) | None => vec![],
        Some(_) => vec![],
    }
}

/// Per-block transfer function: `gen` is read-before-written, `kill` is
/// everything written.
#[derive(Debug, Clone, Copy)]
struct GenKill {
    gen: Region,
    kill: Region,
}

fn gen_kill(block: &[Statement]) -> GenKill {
    let mut gen = Region::EMPTY;
    let mut kill = Region::EMPTY;
    for stmt in block.iter().rev() {
        let rd = stmt.read_region();
        let wr = stmt.write_region();
        gen = gen.difference(wr).union(rd);
        kill = kill.union(wr);
    }
    GenKill { gen, kill }
}

/// Result of the analysis, keyed by block entry address.
#[derive(Debug)]
pub struct Liveness {
    pub live_in: BTreeMap<Address, Region>,
    pub live_out: BTreeMap<Address, Region>,
}

/// Run the dataflow to its fixed point.
pub fn analyze(map: &BlockMap, indirect_targets: &BTreeSet<Address>) -> Liveness {
    let transfer: BTreeMap<Address, GenKill> =
        map.iter().map(|(a, b)| (*a, gen_kill(b))).collect();
    let succs: BTreeMap<Address, Vec<Successor>> =
        map.iter().map(|(a, b)| (*a, successors(b))).collect();

    let mut state = Liveness {
        live_in: map.keys().map(|a| (*a, Region::EMPTY)).collect(),
        live_out: map.keys().map(|a| (*a, Region::EMPTY)).collect(),
    };

    let mut rounds = 0usize;
    while iterate_all(&mut state, &transfer, &succs, indirect_targets) {
        rounds += 1;
    }
    debug!("liveness converged after {} rounds", rounds + 1);
    state
}

/// One pass over every block. Returns true if any set grew.
fn iterate_all(
    state: &mut Liveness,
    transfer: &BTreeMap<Address, GenKill>,
    succs: &BTreeMap<Address, Vec<Successor>>,
    indirect_targets: &BTreeSet<Address>,
) -> bool {
    let mut changed = false;

    for (addr, gk) in transfer {
        let new_in = state.live_out[addr].difference(gk.kill).union(gk.gen);
        if new_in != state.live_in[addr] {
            state.live_in.insert(*addr, new_in);
            changed = true;
        }
    }

    // One cached region serves every Indirect successor this round.
    let indirect_in = indirect_targets
        .iter()
        .filter_map(|t| state.live_in.get(t))
        .fold(Region::EMPTY, |acc, r| acc.union(*r));

    for (addr, ss) in succs {
        let mut new_out = Region::EMPTY;
        for s in ss {
            new_out = match s {
                Successor::Direct(t) => {
                    new_out.union(state.live_in.get(t).copied().unwrap_or(Region::EMPTY))
                }
                Successor::Indirect => new_out.union(indirect_in),
            };
        }
        if new_out != state.live_out[addr] {
            state.live_out.insert(*addr, new_out);
            changed = true;
        }
    }

    changed
}
