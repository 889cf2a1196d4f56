// fold.rs - Expression and condition simplifier
//
// Runs a fixed point of const_fold . associate . commute over expression
// trees. Commutation normalizes literals to the left of commutative
// operators, association re-parenthesizes right-leaning chains into
// left-leaning ones so adjacent literals cluster, and const_fold applies
// the literal tables and algebraic identities. The fixed point terminates
// when a full traversal returns a structurally equal tree.
//
// Literal arithmetic follows RV32IM semantics exactly: 32-bit wraparound,
// the defined division-by-zero and overflow results, shift amounts masked
// to 5 bits. Folding never raises.

use crate::ir::{BinOp, CondExpr, CondOp, Expr, UnOp};
use log::trace;

/// Simplify an expression to its fixed point.
pub fn run_const_fold(e: Expr) -> Expr {
    let mut cur = e;
    loop {
        let next = const_fold(associate(commute(cur.clone())));
        if next == cur {
            return next;
        }
        trace!("fold round: {:?} -> {:?}", cur, next);
        cur = next;
    }
}

/// Simplify a condition to its fixed point.
pub fn run_const_fold_c(c: CondExpr) -> CondExpr {
    let mut cur = c;
    loop {
        let next = cond_fold(cond_commute(cur.clone()));
        if next == cur {
            return next;
        }
        trace!("cond fold round: {:?} -> {:?}", cur, next);
        cur = next;
    }
}

/// Move literal right operands of commutative operators to the left,
/// exposing them to the literal rules in const_fold.
fn commute(e: Expr) -> Expr {
    match e {
        Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_) => e,
        Expr::LoadMem(op, addr) => Expr::load(op, commute(*addr)),
        Expr::Un(op, x) => Expr::un(op, commute(*x)),
        Expr::Bin(op, a, b) => {
            let a = commute(*a);
            let b = commute(*b);
            if op.is_commutative() && matches!(b, Expr::Lit(_)) && !matches!(a, Expr::Lit(_)) {
                Expr::bin(op, b, a)
            } else {
                Expr::bin(op, a, b)
            }
        }
    }
}

/// Left-associate chains of the same associative operator:
/// a op (b op c) becomes (a op b) op c.
fn associate(e: Expr) -> Expr {
    match e {
        Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_) => e,
        Expr::LoadMem(op, addr) => Expr::load(op, associate(*addr)),
        Expr::Un(op, x) => Expr::un(op, associate(*x)),
        Expr::Bin(op, a, b) => {
            let a = associate(*a);
            let b = associate(*b);
            match b {
                Expr::Bin(op2, b1, b2) if op == op2 && op.is_associative() => {
                    Expr::bin(op, Expr::bin(op, a, *b1), *b2)
                }
                b => Expr::bin(op, a, b),
            }
        }
    }
}

/// Bottom-up literal folding and algebraic identity rewriting.
fn const_fold(e: Expr) -> Expr {
    match e {
        Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_) => e,
        Expr::LoadMem(op, addr) => Expr::load(op, const_fold(*addr)),
        Expr::Un(op, x) => fold_un(op, const_fold(*x)),
        Expr::Bin(op, a, b) => fold_bin(op, const_fold(*a), const_fold(*b)),
    }
}

fn fold_un(op: UnOp, x: Expr) -> Expr {
    match (op, x) {
        (op, Expr::Lit(c)) => Expr::Lit(apply_un(op, c)),
        (UnOp::Negate, Expr::Un(UnOp::Negate, inner)) => *inner,
        (UnOp::Not, Expr::Un(UnOp::Not, inner)) => *inner,
        (op, x) => Expr::un(op, x),
    }
}

#[rustfmt::skip]
fn fold_bin(op: BinOp, a: Expr, b: Expr) -> Expr {
    use BinOp::*;
    match (op, a, b) {
        (op, Expr::Lit(a), Expr::Lit(b)) => {
            let folded = apply_bin(op, a, b);
            trace!("folding {:?}({}, {}) -> {}", op, a, b, folded);
            Expr::Lit(folded)
        }

        // Additive identities.
        (Add, Expr::Lit(0), x) => x,
        (Add, x, Expr::Un(UnOp::Negate, y)) => Expr::bin(Sub, x, *y),
        (Add, Expr::Un(UnOp::Negate, x), y) => Expr::bin(Sub, y, *x),
        (Sub, x, Expr::Lit(0)) => x,
        (Sub, Expr::Lit(0), x) => Expr::un(UnOp::Negate, x),
        (Sub, x, y) if x == y => Expr::Lit(0),
        (Sub, x, Expr::Un(UnOp::Negate, y)) => Expr::bin(Add, x, *y),

        // Multiplicative identities.
        (Mult, Expr::Lit(1), x) => x,
        (Mult, Expr::Lit(0), _) => Expr::Lit(0),
        (Mult, Expr::Lit(-1), x) => Expr::un(UnOp::Negate, x),
        (MultHi, Expr::Lit(0), _) => Expr::Lit(0),
        (MultHiU, Expr::Lit(0), _) => Expr::Lit(0),
        // The unsigned product 1*x never exceeds 32 bits, so its high
        // word is zero for every 32-bit x.
        (MultHiU, Expr::Lit(1), _) => Expr::Lit(0),

        // Division and remainder by one.
        (Quot, x, Expr::Lit(1)) => x,
        (QuotU, x, Expr::Lit(1)) => x,
        (Rem, _, Expr::Lit(1)) => Expr::Lit(0),
        (RemU, _, Expr::Lit(1)) => Expr::Lit(0),
        (Rem, _, Expr::Lit(-1)) => Expr::Lit(0),

        // Bitwise identities.
        (And, Expr::Lit(-1), x) => x,
        (And, Expr::Lit(0), _) => Expr::Lit(0),
        (Or, Expr::Lit(-1), _) => Expr::Lit(-1),
        (Or, Expr::Lit(0), x) => x,
        (Xor, Expr::Lit(-1), x) => Expr::un(UnOp::Not, x),
        (Xor, Expr::Lit(0), x) => x,

        // Shifts by zero.
        (LogicalShiftLeft, x, Expr::Lit(0)) => x,
        (LogicalShiftRight, x, Expr::Lit(0)) => x,
        (ArithShiftRight, x, Expr::Lit(0)) => x,

        // Comparisons.
        (SetIfLess, x, y) if x == y => Expr::Lit(0),
        (SetIfLessU, x, y) if x == y => Expr::Lit(0),
        (SetIfLessU, _, Expr::Lit(0)) => Expr::Lit(0),

        (op, a, b) => Expr::bin(op, a, b),
    }
}

/// Move literal left of the commutative condition operators.
fn cond_commute(c: CondExpr) -> CondExpr {
    match c {
        CondExpr::BinCond(op @ (CondOp::Equal | CondOp::NotEqual), a, b)
            if matches!(b, Expr::Lit(_)) && !matches!(a, Expr::Lit(_)) =>
        {
            CondExpr::BinCond(op, b, a)
        }
        c => c,
    }
}

fn cond_fold(c: CondExpr) -> CondExpr {
    match c {
        CondExpr::LitCond(_) => c,
        CondExpr::BinCond(op, Expr::Lit(a), Expr::Lit(b)) => {
            CondExpr::LitCond(apply_cond(op, a, b))
        }
        CondExpr::BinCond(CondOp::Equal, ref a, ref b) if a == b => CondExpr::LitCond(true),
        // Comparing a set-if-less result against zero is the comparison
        // itself; commutation may have put the literal on either side.
        CondExpr::BinCond(op @ (CondOp::Equal | CondOp::NotEqual), a, b) => {
            match as_setless_vs_zero(&a, &b) {
                Some((set_op, e1, e2)) => {
                    let cond_op = match (op, set_op) {
                        (CondOp::NotEqual, BinOp::SetIfLess) => CondOp::LessThan,
                        (CondOp::NotEqual, BinOp::SetIfLessU) => CondOp::LessThanU,
                        (CondOp::Equal, BinOp::SetIfLess) => CondOp::GtrEqual,
                        (CondOp::Equal, BinOp::SetIfLessU) => CondOp::GtrEqualU,
                        _ => unreachable!(),
                    };
                    CondExpr::BinCond(cond_op, e1, e2)
                }
                None => CondExpr::BinCond(op, run_const_fold(a), run_const_fold(b)),
            }
        }
        // Nothing unsigned is below zero.
        CondExpr::BinCond(CondOp::LessThanU, _, Expr::Lit(0)) => CondExpr::LitCond(false),
        CondExpr::BinCond(CondOp::GtrEqualU, _, Expr::Lit(0)) => CondExpr::LitCond(true),
        CondExpr::BinCond(op, a, b) => {
            CondExpr::BinCond(op, run_const_fold(a), run_const_fold(b))
        }
    }
}

/// Match `SetIfLess*(e1, e2)` compared against `Lit(0)`, in either operand
/// order. Returns the set operator and its operands.
fn as_setless_vs_zero(a: &Expr, b: &Expr) -> Option<(BinOp, Expr, Expr)> {
    let set = |e: &Expr| match e {
        Expr::Bin(op @ (BinOp::SetIfLess | BinOp::SetIfLessU), e1, e2) => {
            Some((*op, (**e1).clone(), (**e2).clone()))
        }
        _ => None,
    };
    match (a, b) {
        (Expr::Lit(0), e) => set(e),
        (e, Expr::Lit(0)) => set(e),
        _ => None,
    }
}

fn apply_un(op: UnOp, c: i32) -> i32 {
    match op {
        UnOp::Negate => c.wrapping_neg(),
        UnOp::Not => !c,
    }
}

/// RV32IM literal arithmetic. Division by zero and signed overflow take
/// the architecturally defined results rather than trapping.
pub fn apply_bin(op: BinOp, a: i32, b: i32) -> i32 {
    match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mult => a.wrapping_mul(b),
        BinOp::MultHi => ((i64::from(a) * i64::from(b)) >> 32) as i32,
        BinOp::MultHiU => ((u64::from(a as u32) * u64::from(b as u32)) >> 32) as i32,
        BinOp::Quot => {
            if b == 0 {
                -1
            } else {
                a.wrapping_div(b)
            }
        }
        BinOp::QuotU => {
            if b == 0 {
                -1
            } else {
                ((a as u32) / (b as u32)) as i32
            }
        }
        BinOp::Rem => {
            if b == 0 {
                a
            } else {
                a.wrapping_rem(b)
            }
        }
        BinOp::RemU => {
            if b == 0 {
                a
            } else {
                ((a as u32) % (b as u32)) as i32
            }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::LogicalShiftLeft => ((a as u32) << (b as u32 & 31)) as i32,
        BinOp::LogicalShiftRight => ((a as u32) >> (b as u32 & 31)) as i32,
        BinOp::ArithShiftRight => a >> (b as u32 & 31),
        BinOp::SetIfLess => i32::from(a < b),
        BinOp::SetIfLessU => i32::from((a as u32) < (b as u32)),
    }
}

fn apply_cond(op: CondOp, a: i32, b: i32) -> bool {
    match op {
        CondOp::Equal => a == b,
        CondOp::NotEqual => a != b,
        CondOp::LessThan => a < b,
        CondOp::LessThanU => (a as u32) < (b as u32),
        CondOp::GtrEqual => a >= b,
        CondOp::GtrEqualU => (a as u32) >= (b as u32),
    }
}
