// passes.rs - Statement-level rewrites and the simplification driver
//
// All passes are functional: each takes a block (or the whole map) and
// returns a new value. The driver composes them under an optimization
// level:
//
//   level 0  identity
//   level 1  non-final-store lifting, then the per-block inner fixed point
//   level 2  level 1, then liveness, dead-store rewriting, and the inner
//            fixed point again
//
// The inner fixed point (simplify_block) interleaves expression folding,
// let-substitution, register constant propagation and useless-assignment
// removal until the block stops changing.

use crate::error::{Error, Result};
use crate::fold::{run_const_fold, run_const_fold_c};
use crate::ir::{Address, BlockMap, Expr, RegName, Statement, VarName};
use crate::liveness;
use crate::region::Region;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};

/// Simplify the whole block map at the given optimization level.
pub fn simplify(level: u8, indirect_targets: &BTreeSet<Address>, map: BlockMap) -> Result<BlockMap> {
    match level {
        0 => return Ok(map),
        1 | 2 => {}
        n => return Err(Error::InvalidOptimizationLevel(n)),
    }

    let mut map: BlockMap = map
        .into_iter()
        .map(|(addr, block)| (addr, simplify_block(lift_non_final_stores(&block))))
        .collect();
    if level == 1 {
        return Ok(map);
    }

    let live = liveness::analyze(&map, indirect_targets);
    map = map
        .into_iter()
        .map(|(addr, block)| {
            let dead = eliminate_dead_stores(&block, live.live_out[&addr]);
            (addr, simplify_block(dead))
        })
        .collect();
    debug!("simplified {} blocks at level 2", map.len());
    Ok(map)
}

/// Run the inner pass sequence to its fixed point.
pub fn simplify_block(block: Vec<Statement>) -> Vec<Statement> {
    let mut cur = block;
    loop {
        let next = simplify_block_once(&cur);
        if next == cur {
            return next;
        }
        cur = next;
    }
}

fn simplify_block_once(block: &[Statement]) -> Vec<Statement> {
    let folded: Vec<Statement> = block.iter().map(fold_statement).collect();
    let substituted = substitute(&folded);
    let propagated = propagate_consts(&substituted);
    remove_useless_assigns(&propagated)
}

fn fold_statement(stmt: &Statement) -> Statement {
    match stmt {
        Statement::Jump(cond, then, els) => {
            Statement::Jump(run_const_fold_c(cond.clone()), *then, *els)
        }
        stmt => stmt.map_exprs(&mut |e| run_const_fold(e.clone())),
    }
}

/// Rewrite every register store that is overwritten later in the same
/// block into a let-binding, so its value feeds substitution and folding
/// instead of bouncing through the register file.
pub fn lift_non_final_stores(block: &[Statement]) -> Vec<Statement> {
    let mut out = block.to_vec();
    let mut counter = 0usize;
    let mut i = 0;
    while i < out.len() {
        if let Statement::StoreReg(reg, rhs) = &out[i] {
            let (reg, rhs) = (*reg, rhs.clone());
            let next_store = out[i + 1..]
                .iter()
                .position(|s| matches!(s, Statement::StoreReg(r, _) if *r == reg));
            if let Some(offset) = next_store {
                let name = VarName::new(format!("nf_var_{counter}"));
                counter += 1;
                trace!("lifting non-final store to {} into {}", reg, name);
                out[i] = Statement::Let(name.clone(), rhs);
                // Reads of the old value extend through the overwriting
                // store's right-hand side, so the rewrite is inclusive.
                for stmt in &mut out[i + 1..=i + 1 + offset] {
                    *stmt = stmt.map_exprs(&mut |e| e.subst_reg(reg, &Expr::Var(name.clone())));
                }
            }
        }
        i += 1;
    }
    out
}

/// Inline let-bindings into their uses where doing so cannot change
/// observable behavior, dropping the binding.
pub fn substitute(block: &[Statement]) -> Vec<Statement> {
    let mut out = block.to_vec();
    let mut i = 0;
    while i < out.len() {
        let (name, rhs) = match &out[i] {
            Statement::Let(name, rhs) => (name.clone(), rhs.clone()),
            _ => {
                i += 1;
                continue;
            }
        };
        let rest = &out[i + 1..];
        let uses: usize = rest.iter().map(|s| s.count_var(&name)).sum();
        let simple = matches!(rhs, Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_));
        if hazard_blocks(&rhs, &name, rest) || !(simple || uses <= 1) {
            i += 1;
            continue;
        }
        trace!("substituting {} ({} uses)", name, uses);
        out.remove(i);
        for stmt in &mut out[i..] {
            *stmt = stmt.map_exprs(&mut |e| e.subst_var(&name, &rhs));
        }
        // The statement now at `i` has changed; reconsider it.
    }
    out
}

/// A substitution is blocked when some later statement overwrites state
/// the bound expression reads, and the binding is still referenced after
/// that overwrite. References by the overwriting statement itself are
/// fine: a statement's reads happen before its write.
fn hazard_blocks(rhs: &Expr, name: &VarName, rest: &[Statement]) -> bool {
    let reads = rhs.read_region();
    match rest.iter().position(|s| s.write_region().overlaps(reads)) {
        None => false,
        Some(first_hazard) => rest[first_hazard + 1..].iter().any(|s| s.mentions_var(name)),
    }
}

/// Forward literal register values through the block. The environment is
/// per-block; a register leaves it as soon as it is assigned anything
/// non-literal.
pub fn propagate_consts(block: &[Statement]) -> Vec<Statement> {
    let mut env: BTreeMap<RegName, i32> = BTreeMap::new();
    let mut out = Vec::with_capacity(block.len());
    for stmt in block {
        match stmt {
            Statement::StoreReg(reg, Expr::Lit(n)) => {
                out.push(stmt.clone());
                env.insert(*reg, *n);
            }
            Statement::StoreReg(reg, rhs) => {
                let rhs = subst_env(rhs, &env);
                out.push(Statement::StoreReg(*reg, rhs));
                env.remove(reg);
            }
            stmt => out.push(stmt.map_exprs(&mut |e| subst_env(e, &env))),
        }
    }
    out
}

fn subst_env(e: &Expr, env: &BTreeMap<RegName, i32>) -> Expr {
    let mut cur = e.clone();
    for (reg, value) in env {
        cur = cur.subst_reg(*reg, &Expr::Lit(*value));
    }
    cur
}

/// Drop stores of a register to itself; substitution can leave these
/// behind.
pub fn remove_useless_assigns(block: &[Statement]) -> Vec<Statement> {
    block
        .iter()
        .filter(|s| !matches!(s, Statement::StoreReg(r, Expr::LoadReg(r2)) if r == r2))
        .cloned()
        .collect()
}

/// Rewrite register stores that are dead on block exit into let-bindings,
/// exposing their right-hand sides to substitution on the next simplifier
/// round. Reads of the register between the store and the next store to
/// it (or block end) follow the binding.
pub fn eliminate_dead_stores(block: &[Statement], live_out: Region) -> Vec<Statement> {
    let mut out = block.to_vec();
    let mut counter = 0usize;
    let mut i = 0;
    while i < out.len() {
        if let Statement::StoreReg(reg, rhs) = &out[i] {
            let (reg, rhs) = (*reg, rhs.clone());
            if !Region::of_reg(reg).overlaps(live_out) {
                let name = VarName::new(format!("dead_var_{counter}"));
                counter += 1;
                trace!("store to dead register {} becomes {}", reg, name);
                out[i] = Statement::Let(name.clone(), rhs);
                let next_store = out[i + 1..]
                    .iter()
                    .position(|s| matches!(s, Statement::StoreReg(r, _) if *r == reg));
                let end = match next_store {
                    Some(offset) => i + 1 + offset,
                    None => out.len() - 1,
                };
                for stmt in &mut out[i + 1..=end] {
                    *stmt = stmt.map_exprs(&mut |e| e.subst_reg(reg, &Expr::Var(name.clone())));
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, CondExpr, CondOp, MemOp};

    fn let_(name: &str, rhs: Expr) -> Statement {
        Statement::Let(VarName::new(name), rhs)
    }

    fn halt() -> Statement {
        Statement::Break
    }

    #[test]
    fn data_hazard_blocks_substitution() {
        let block = vec![
            let_("v", Expr::reg(RegName::A0)),
            Statement::StoreReg(RegName::A0, Expr::lit(5)),
            Statement::StoreReg(RegName::A1, Expr::var("v")),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(out, block);

        let out = simplify_block(block);
        assert!(
            out.iter().any(|s| matches!(s, Statement::Let(..))),
            "binding must survive: {out:?}"
        );
    }

    #[test]
    fn safe_simple_binding_is_inlined() {
        let block = vec![
            let_("v", Expr::reg(RegName::A0)),
            Statement::StoreReg(RegName::A1, Expr::var("v")),
            Statement::StoreReg(RegName::A2, Expr::var("v")),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(
            out,
            vec![
                Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)),
                Statement::StoreReg(RegName::A2, Expr::reg(RegName::A0)),
                halt(),
            ]
        );
    }

    #[test]
    fn complex_binding_with_two_uses_is_kept() {
        let complex = Expr::bin(BinOp::Mult, Expr::reg(RegName::A0), Expr::reg(RegName::A1));
        let block = vec![
            let_("v", complex.clone()),
            Statement::StoreReg(RegName::A2, Expr::var("v")),
            Statement::StoreReg(RegName::A3, Expr::var("v")),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(out, block);
    }

    #[test]
    fn complex_binding_with_one_use_is_inlined() {
        let complex = Expr::bin(BinOp::Mult, Expr::reg(RegName::A0), Expr::reg(RegName::A1));
        let block = vec![
            let_("v", complex.clone()),
            Statement::StoreReg(RegName::A2, Expr::var("v")),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(
            out,
            vec![Statement::StoreReg(RegName::A2, complex), halt()]
        );
    }

    #[test]
    fn hazard_statement_itself_may_use_the_binding() {
        // The overwrite reads the binding in its own right-hand side;
        // reads precede writes, so inlining is sound.
        let block = vec![
            let_("v", Expr::reg(RegName::A0)),
            Statement::StoreReg(
                RegName::A0,
                Expr::bin(BinOp::Add, Expr::var("v"), Expr::lit(1)),
            ),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(
            out,
            vec![
                Statement::StoreReg(
                    RegName::A0,
                    Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(1)),
                ),
                halt(),
            ]
        );
    }

    #[test]
    fn memory_write_hazard_blocks_loaded_binding() {
        let block = vec![
            let_("v", Expr::load(MemOp::Word, Expr::reg(RegName::Sp))),
            Statement::StoreMem(MemOp::Word, Expr::reg(RegName::Sp), Expr::lit(0)),
            Statement::StoreReg(RegName::A0, Expr::var("v")),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(out, block);
    }

    #[test]
    fn constants_propagate_through_register_reads() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(7)),
            Statement::StoreReg(
                RegName::A1,
                Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(1)),
            ),
            halt(),
        ];
        let out = simplify_block(block);
        assert_eq!(
            out,
            vec![
                Statement::StoreReg(RegName::A0, Expr::lit(7)),
                Statement::StoreReg(RegName::A1, Expr::lit(8)),
                halt(),
            ]
        );
    }

    #[test]
    fn reassignment_invalidates_the_environment() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(7)),
            Statement::StoreReg(RegName::A0, Expr::load(MemOp::Word, Expr::reg(RegName::Sp))),
            Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)),
            halt(),
        ];
        let out = propagate_consts(&block);
        // a0 is no longer the literal after the load overwrites it.
        assert_eq!(out[2], Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)));
    }

    #[test]
    fn literal_branch_condition_folds() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(1)),
            Statement::Jump(
                CondExpr::BinCond(CondOp::Equal, Expr::reg(RegName::A0), Expr::lit(1)),
                0x10,
                0x20,
            ),
        ];
        let out = simplify_block(block);
        assert_eq!(
            out.last(),
            Some(&Statement::Jump(CondExpr::LitCond(true), 0x10, 0x20))
        );
    }

    #[test]
    fn non_final_store_is_lifted() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(7)),
            Statement::StoreReg(
                RegName::A1,
                Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(1)),
            ),
            Statement::StoreReg(RegName::A0, Expr::lit(9)),
            halt(),
        ];
        let out = lift_non_final_stores(&block);
        assert_eq!(out[0], let_("nf_var_0", Expr::lit(7)));
        assert_eq!(
            out[1],
            Statement::StoreReg(
                RegName::A1,
                Expr::bin(BinOp::Add, Expr::var("nf_var_0"), Expr::lit(1)),
            )
        );
        // The final store stays a store.
        assert_eq!(out[2], Statement::StoreReg(RegName::A0, Expr::lit(9)));
    }

    #[test]
    fn lifted_rewrite_stops_at_the_overwriting_store() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(7)),
            Statement::StoreReg(RegName::A0, Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(1))),
            Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)),
            halt(),
        ];
        let out = lift_non_final_stores(&block);
        // The overwriting store's right-hand side reads the old value.
        assert_eq!(
            out[1],
            Statement::StoreReg(
                RegName::A0,
                Expr::bin(BinOp::Add, Expr::var("nf_var_0"), Expr::lit(1)),
            )
        );
        // Reads after the overwrite see the register again.
        assert_eq!(out[2], Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)));
    }

    #[test]
    fn self_assignment_is_removed() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::reg(RegName::A0)),
            Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)),
            halt(),
        ];
        let out = remove_useless_assigns(&block);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Statement::StoreReg(RegName::A1, Expr::reg(RegName::A0)));
    }

    #[test]
    fn dead_store_becomes_binding_and_dissolves() {
        let complex = Expr::bin(BinOp::Mult, Expr::reg(RegName::A1), Expr::reg(RegName::A2));
        let block = vec![
            Statement::StoreReg(RegName::A0, complex),
            Statement::Jump(CondExpr::LitCond(true), 0x20, 0x20),
        ];
        let out = eliminate_dead_stores(&block, Region::of_reg(RegName::A1));
        assert!(matches!(&out[0], Statement::Let(v, _) if v.0 == "dead_var_0"));
        // The follow-up simplifier round drops the unused binding.
        let out = simplify_block(out);
        assert_eq!(
            out,
            vec![Statement::Jump(CondExpr::LitCond(true), 0x20, 0x20)]
        );
    }

    #[test]
    fn live_store_is_untouched_by_dead_store_pass() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(1)),
            halt(),
        ];
        let out = eliminate_dead_stores(&block, Region::of_reg(RegName::A0));
        assert_eq!(out, block);
    }

    #[test]
    fn dead_store_rewrite_covers_intermediate_reads() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(3)),
            Statement::StoreMem(MemOp::Word, Expr::reg(RegName::Sp), Expr::reg(RegName::A0)),
            halt(),
        ];
        let out = eliminate_dead_stores(&block, Region::MEMORY);
        assert_eq!(out[0], let_("dead_var_0", Expr::lit(3)));
        assert_eq!(
            out[1],
            Statement::StoreMem(MemOp::Word, Expr::reg(RegName::Sp), Expr::var("dead_var_0"))
        );
    }

    #[test]
    fn level_zero_is_identity() {
        let mut map = BlockMap::new();
        map.insert(
            0x00,
            vec![
                Statement::StoreReg(RegName::A0, Expr::bin(BinOp::Add, Expr::lit(1), Expr::lit(2))),
                halt(),
            ],
        );
        let out = simplify(0, &BTreeSet::new(), map.clone()).unwrap();
        assert_eq!(out, map);
    }

    #[test]
    fn invalid_level_is_rejected() {
        let err = simplify(3, &BTreeSet::new(), BlockMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidOptimizationLevel(3)));
    }

    #[test]
    fn inner_fixed_point_is_idempotent() {
        let block = vec![
            Statement::StoreReg(RegName::A0, Expr::lit(7)),
            Statement::StoreReg(
                RegName::A1,
                Expr::bin(
                    BinOp::Add,
                    Expr::reg(RegName::A0),
                    Expr::bin(BinOp::Add, Expr::lit(1), Expr::lit(2)),
                ),
            ),
            Statement::StoreMem(MemOp::Word, Expr::reg(RegName::Sp), Expr::reg(RegName::A1)),
            halt(),
        ];
        let once = simplify_block(block);
        assert_eq!(simplify_block(once.clone()), once);
    }

    #[test]
    fn dead_store_eliminated_across_blocks_at_level_two() {
        // Block 0x00 computes a value for a0 that block 0x20 never reads.
        let mut map = BlockMap::new();
        map.insert(
            0x00,
            vec![
                Statement::StoreReg(
                    RegName::A0,
                    Expr::bin(BinOp::Mult, Expr::reg(RegName::A1), Expr::reg(RegName::A2)),
                ),
                Statement::Jump(CondExpr::LitCond(true), 0x20, 0x20),
            ],
        );
        map.insert(
            0x20,
            vec![
                Statement::StoreReg(RegName::A3, Expr::reg(RegName::A1)),
                halt(),
            ],
        );
        let out = simplify(2, &BTreeSet::new(), map).unwrap();
        assert_eq!(
            out[&0x00],
            vec![Statement::Jump(CondExpr::LitCond(true), 0x20, 0x20)]
        );
        // At level 1 the store survives: liveness never runs.
        let mut map = BlockMap::new();
        map.insert(
            0x00,
            vec![
                Statement::StoreReg(
                    RegName::A0,
                    Expr::bin(BinOp::Mult, Expr::reg(RegName::A1), Expr::reg(RegName::A2)),
                ),
                Statement::Jump(CondExpr::LitCond(true), 0x20, 0x20),
            ],
        );
        map.insert(
            0x20,
            vec![
                Statement::StoreReg(RegName::A3, Expr::reg(RegName::A1)),
                halt(),
            ],
        );
        let out = simplify(1, &BTreeSet::new(), map).unwrap();
        assert_eq!(out[&0x00].len(), 2);
    }

    #[test]
    fn substitution_preserves_store_sequence() {
        // Inlined or not, the observable effects are the same stores in
        // the same order.
        let block = vec![
            let_("v", Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(4))),
            Statement::StoreMem(MemOp::Word, Expr::var("v"), Expr::lit(1)),
            halt(),
        ];
        let out = substitute(&block);
        assert_eq!(
            out,
            vec![
                Statement::StoreMem(
                    MemOp::Word,
                    Expr::bin(BinOp::Add, Expr::reg(RegName::A0), Expr::lit(4)),
                    Expr::lit(1),
                ),
                halt(),
            ]
        );
    }
}
