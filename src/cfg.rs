// cfg.rs - Basic-block recovery
//
// Partitions the decoder's flat (address, statement) stream into a map
// from entry address to block. A guest instruction may lift to several
// consecutive statements sharing one address; boundaries only ever apply
// at the first statement of such a group.
//
// A new block begins at the first statement, at every indirect-jump
// target, at the statement following a terminator, and at every direct
// jump target (a backward branch into straight-line code must land on a
// block entry). Blocks without a terminator of their own fall through via
// a synthetic always-taken jump.

use crate::error::{Error, Result};
use crate::ir::{Address, BlockMap, CondExpr, Statement};
use log::debug;
use std::collections::BTreeSet;

/// Build the block map from the lifted statement stream.
pub fn build(stmts: &[(Address, Statement)], indirect_targets: &BTreeSet<Address>) -> Result<BlockMap> {
    let mut map = BlockMap::new();
    if stmts.is_empty() {
        return Ok(map);
    }

    let boundaries = find_boundaries(stmts, indirect_targets)?;

    let mut entry = stmts[0].0;
    let mut block: Vec<Statement> = Vec::new();
    let mut prev_addr: Option<Address> = None;

    for (addr, stmt) in stmts {
        let group_start = prev_addr != Some(*addr);
        if group_start && boundaries.contains(addr) && !block.is_empty() {
            close_block(&mut map, entry, block, Some(*addr))?;
            block = Vec::new();
        }
        if block.is_empty() {
            entry = *addr;
        }
        if let Some(prev) = block.last() {
            if prev.is_terminator() {
                return Err(Error::InternalInvariant(format!(
                    "terminator mid-block at {:#010x}",
                    addr
                )));
            }
        }
        block.push(stmt.clone());
        prev_addr = Some(*addr);

        if stmt.is_terminator() {
            close_block(&mut map, entry, std::mem::take(&mut block), None)?;
        }
    }

    if !block.is_empty() {
        close_block(&mut map, entry, block, None)?;
    }

    debug!(
        "recovered {} basic blocks from {} statements",
        map.len(),
        stmts.len()
    );
    Ok(map)
}

/// Addresses at which a new block must begin.
fn find_boundaries(
    stmts: &[(Address, Statement)],
    indirect_targets: &BTreeSet<Address>,
) -> Result<BTreeSet<Address>> {
    let addrs: BTreeSet<Address> = stmts.iter().map(|(a, _)| *a).collect();
    let mut boundaries = BTreeSet::new();

    boundaries.insert(stmts[0].0);
    boundaries.extend(indirect_targets.iter().copied());

    for (i, (_, stmt)) in stmts.iter().enumerate() {
        if stmt.is_terminator() {
            if let Some((next_addr, _)) = stmts.get(i + 1) {
                boundaries.insert(*next_addr);
            }
        }
        if let Statement::Jump(_, then, els) = stmt {
            for target in [*then, *els] {
                if !addrs.contains(&target) {
                    return Err(Error::UnknownJumpTarget(target));
                }
                boundaries.insert(target);
            }
        }
    }

    Ok(boundaries)
}

/// Insert a finished block, appending the synthetic fall-through jump when
/// it does not end in a terminator of its own. The last block of the
/// stream has nowhere to fall through to and terminates instead.
fn close_block(
    map: &mut BlockMap,
    entry: Address,
    mut block: Vec<Statement>,
    fallthrough: Option<Address>,
) -> Result<()> {
    debug_assert!(!block.is_empty());
    if !block.last().is_some_and(Statement::is_terminator) {
        match fallthrough {
            Some(next) => block.push(Statement::Jump(CondExpr::LitCond(true), next, next)),
            None => block.push(Statement::Break),
        }
    }
    if map.insert(entry, block).is_some() {
        return Err(Error::InternalInvariant(format!(
            "duplicate block entry {:#010x}",
            entry
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondOp, Expr, RegName};

    fn store(r: RegName, n: i32) -> Statement {
        Statement::StoreReg(r, Expr::lit(n))
    }

    fn jump(cond: CondExpr, then: Address, els: Address) -> Statement {
        Statement::Jump(cond, then, els)
    }

    fn always(target: Address) -> Statement {
        jump(CondExpr::LitCond(true), target, target)
    }

    #[test]
    fn empty_input_builds_empty_map() {
        let map = build(&[], &BTreeSet::new()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn straight_line_code_is_one_block() {
        let stmts = vec![
            (0x100, store(RegName::A0, 1)),
            (0x104, store(RegName::A1, 2)),
            (0x108, Statement::Break),
        ];
        let map = build(&stmts, &BTreeSet::new()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0x100].len(), 3);
    }

    #[test]
    fn statement_after_terminator_starts_a_block() {
        let stmts = vec![
            (0x100, always(0x108)),
            (0x104, store(RegName::A0, 1)),
            (0x108, Statement::Break),
        ];
        let map = build(&stmts, &BTreeSet::new()).unwrap();
        assert_eq!(map.len(), 3);
        // 0x104 runs into 0x108 and falls through via a synthetic jump.
        assert_eq!(map[&0x104].len(), 2);
        assert_eq!(map[&0x104][1], always(0x108));
    }

    #[test]
    fn jump_target_splits_straight_line_code() {
        let stmts = vec![
            (0x100, store(RegName::A0, 1)),
            (0x104, store(RegName::A1, 2)),
            (0x108, store(RegName::A2, 3)),
            (
                0x10c,
                jump(
                    CondExpr::BinCond(CondOp::Equal, Expr::reg(RegName::A0), Expr::lit(0)),
                    0x104,
                    0x110,
                ),
            ),
            (0x110, Statement::Break),
        ];
        let map = build(&stmts, &BTreeSet::new()).unwrap();
        assert!(map.contains_key(&0x100));
        assert!(map.contains_key(&0x104));
        assert!(map.contains_key(&0x110));
        // The block broken at the branch target falls through into it.
        assert_eq!(map[&0x100].last(), Some(&always(0x104)));
    }

    #[test]
    fn indirect_target_starts_a_block() {
        let stmts = vec![
            (0x100, store(RegName::A0, 1)),
            (0x104, store(RegName::A1, 2)),
            (0x108, Statement::Break),
        ];
        let targets = BTreeSet::from([0x104]);
        let map = build(&stmts, &targets).unwrap();
        assert!(map.contains_key(&0x104));
        assert_eq!(map[&0x100].last(), Some(&always(0x104)));
    }

    #[test]
    fn unknown_jump_target_is_rejected() {
        let stmts = vec![(0x100, always(0x200))];
        let err = build(&stmts, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownJumpTarget(0x200)));
    }

    #[test]
    fn multi_statement_instruction_stays_in_one_block() {
        // A linking jump lifts to a register store plus the jump itself,
        // both at the same address.
        let stmts = vec![
            (0x100, store(RegName::Ra, 0x104)),
            (0x100, always(0x108)),
            (0x108, Statement::Break),
        ];
        let targets = BTreeSet::from([0x100]);
        let map = build(&stmts, &targets).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&0x100].len(), 2);
    }

    #[test]
    fn trailing_block_without_terminator_breaks() {
        let stmts = vec![(0x100, store(RegName::A0, 1))];
        let map = build(&stmts, &BTreeSet::new()).unwrap();
        assert_eq!(map[&0x100].last(), Some(&Statement::Break));
    }
}
