// ir.rs - Typed intermediate representation
//
// The decoder lifts RV32IM instructions into this IR; every later stage
// (block building, simplification, liveness, emission) works on it.
// Expressions are pure trees, statements are the only effects, and a block
// is a statement sequence ending in exactly one terminator.

use std::collections::BTreeMap;
use std::fmt;

/// Guest PC value at which a statement or block begins.
pub type Address = u32;

/// The program after block recovery: entry address to block body.
/// `BTreeMap` keeps emission order deterministic.
pub type BlockMap = BTreeMap<Address, Vec<Statement>>;

/// The 31 general-purpose registers by ABI mnemonic. The zero register
/// never appears: the decoder lifts x0 reads to `Lit(0)` and drops x0
/// writes. Discriminant order is load-bearing for `Region` bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegName {
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
}

impl RegName {
    pub const COUNT: usize = 31;

    /// All registers in discriminant order.
    pub const ALL: [RegName; Self::COUNT] = [
        RegName::Ra,
        RegName::Sp,
        RegName::Gp,
        RegName::Tp,
        RegName::T0,
        RegName::T1,
        RegName::T2,
        RegName::T3,
        RegName::T4,
        RegName::T5,
        RegName::T6,
        RegName::S0,
        RegName::S1,
        RegName::S2,
        RegName::S3,
        RegName::S4,
        RegName::S5,
        RegName::S6,
        RegName::S7,
        RegName::S8,
        RegName::S9,
        RegName::S10,
        RegName::S11,
        RegName::A0,
        RegName::A1,
        RegName::A2,
        RegName::A3,
        RegName::A4,
        RegName::A5,
        RegName::A6,
        RegName::A7,
    ];

    /// Map an architectural register number (x1..=x31) to its name.
    /// Returns `None` for x0 and out-of-range numbers.
    pub fn from_index(x: u8) -> Option<RegName> {
        Some(match x {
            1 => RegName::Ra,
            2 => RegName::Sp,
            3 => RegName::Gp,
            4 => RegName::Tp,
            5 => RegName::T0,
            6 => RegName::T1,
            7 => RegName::T2,
            8 => RegName::S0,
            9 => RegName::S1,
            10 => RegName::A0,
            11 => RegName::A1,
            12 => RegName::A2,
            13 => RegName::A3,
            14 => RegName::A4,
            15 => RegName::A5,
            16 => RegName::A6,
            17 => RegName::A7,
            18 => RegName::S2,
            19 => RegName::S3,
            20 => RegName::S4,
            21 => RegName::S5,
            22 => RegName::S6,
            23 => RegName::S7,
            24 => RegName::S8,
            25 => RegName::S9,
            26 => RegName::S10,
            27 => RegName::S11,
            28 => RegName::T3,
            29 => RegName::T4,
            30 => RegName::T5,
            31 => RegName::T6,
            _ => return None,
        })
    }

    /// ABI mnemonic, also the field name in the emitted C state struct.
    pub fn mnemonic(self) -> &'static str {
        match self {
            RegName::Ra => "ra",
            RegName::Sp => "sp",
            RegName::Gp => "gp",
            RegName::Tp => "tp",
            RegName::T0 => "t0",
            RegName::T1 => "t1",
            RegName::T2 => "t2",
            RegName::T3 => "t3",
            RegName::T4 => "t4",
            RegName::T5 => "t5",
            RegName::T6 => "t6",
            RegName::S0 => "s0",
            RegName::S1 => "s1",
            RegName::S2 => "s2",
            RegName::S3 => "s3",
            RegName::S4 => "s4",
            RegName::S5 => "s5",
            RegName::S6 => "s6",
            RegName::S7 => "s7",
            RegName::S8 => "s8",
            RegName::S9 => "s9",
            RegName::S10 => "s10",
            RegName::S11 => "s11",
            RegName::A0 => "a0",
            RegName::A1 => "a1",
            RegName::A2 => "a2",
            RegName::A3 => "a3",
            RegName::A4 => "a4",
            RegName::A5 => "a5",
            RegName::A6 => "a6",
            RegName::A7 => "a7",
        }
    }
}

impl fmt::Display for RegName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// IR virtual variable, single static assignment within its block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarName(pub String);

impl VarName {
    pub fn new(name: impl Into<String>) -> VarName {
        VarName(name.into())
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Width and signedness of a memory access. Stores ignore the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    Byte,
    ByteU,
    Half,
    HalfU,
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    /// Two's-complement negation.
    Negate,
    /// Bitwise complement.
    Not,
}

/// Binary operators over 32-bit two's-complement values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    /// High 32 bits of the 64-bit signed product.
    MultHi,
    /// High 32 bits of the 64-bit unsigned product.
    MultHiU,
    Quot,
    QuotU,
    Rem,
    RemU,
    And,
    Or,
    Xor,
    LogicalShiftLeft,
    LogicalShiftRight,
    ArithShiftRight,
    /// 1 if left < right (signed), else 0.
    SetIfLess,
    /// 1 if left < right (unsigned), else 0.
    SetIfLessU,
}

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mult | BinOp::MultHi | BinOp::MultHiU | BinOp::And | BinOp::Or | BinOp::Xor
        )
    }

    pub fn is_associative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mult | BinOp::And | BinOp::Or | BinOp::Xor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanU,
    GtrEqual,
    GtrEqualU,
}

/// Pure expression tree. Structural equality (`PartialEq`) is what the
/// simplifier's fixed-point detection compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Lit(i32),
    Var(VarName),
    LoadReg(RegName),
    LoadMem(MemOp, Box<Expr>),
    Un(UnOp, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn lit(n: i32) -> Expr {
        Expr::Lit(n)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(VarName::new(name))
    }

    pub fn reg(r: RegName) -> Expr {
        Expr::LoadReg(r)
    }

    pub fn load(op: MemOp, addr: Expr) -> Expr {
        Expr::LoadMem(op, Box::new(addr))
    }

    pub fn un(op: UnOp, e: Expr) -> Expr {
        Expr::Un(op, Box::new(e))
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Bin(op, Box::new(lhs), Box::new(rhs))
    }

    /// Replace every `Var(name)` occurrence by `with`.
    pub fn subst_var(&self, name: &VarName, with: &Expr) -> Expr {
        match self {
            Expr::Var(v) if v == name => with.clone(),
            Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_) => self.clone(),
            Expr::LoadMem(op, addr) => Expr::load(*op, addr.subst_var(name, with)),
            Expr::Un(op, e) => Expr::un(*op, e.subst_var(name, with)),
            Expr::Bin(op, a, b) => {
                Expr::bin(*op, a.subst_var(name, with), b.subst_var(name, with))
            }
        }
    }

    /// Replace every `LoadReg(reg)` occurrence by `with`.
    pub fn subst_reg(&self, reg: RegName, with: &Expr) -> Expr {
        match self {
            Expr::LoadReg(r) if *r == reg => with.clone(),
            Expr::Lit(_) | Expr::Var(_) | Expr::LoadReg(_) => self.clone(),
            Expr::LoadMem(op, addr) => Expr::load(*op, addr.subst_reg(reg, with)),
            Expr::Un(op, e) => Expr::un(*op, e.subst_reg(reg, with)),
            Expr::Bin(op, a, b) => {
                Expr::bin(*op, a.subst_reg(reg, with), b.subst_reg(reg, with))
            }
        }
    }

    /// Number of `Var(name)` occurrences in the tree.
    pub fn count_var(&self, name: &VarName) -> usize {
        match self {
            Expr::Var(v) => usize::from(v == name),
            Expr::Lit(_) | Expr::LoadReg(_) => 0,
            Expr::LoadMem(_, addr) => addr.count_var(name),
            Expr::Un(_, e) => e.count_var(name),
            Expr::Bin(_, a, b) => a.count_var(name) + b.count_var(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CondExpr {
    LitCond(bool),
    BinCond(CondOp, Expr, Expr),
}

impl CondExpr {
    pub fn subst_var(&self, name: &VarName, with: &Expr) -> CondExpr {
        match self {
            CondExpr::LitCond(_) => self.clone(),
            CondExpr::BinCond(op, a, b) => {
                CondExpr::BinCond(*op, a.subst_var(name, with), b.subst_var(name, with))
            }
        }
    }

    pub fn subst_reg(&self, reg: RegName, with: &Expr) -> CondExpr {
        match self {
            CondExpr::LitCond(_) => self.clone(),
            CondExpr::BinCond(op, a, b) => {
                CondExpr::BinCond(*op, a.subst_reg(reg, with), b.subst_reg(reg, with))
            }
        }
    }

    pub fn count_var(&self, name: &VarName) -> usize {
        match self {
            CondExpr::LitCond(_) => 0,
            CondExpr::BinCond(_, a, b) => a.count_var(name) + b.count_var(name),
        }
    }
}

/// One IR statement. Within a block only the final statement may be a
/// terminator (`Jump`, `IndirectJump`, `Syscall`, `Break`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Bind a block-local variable; the name is unique within its block.
    Let(VarName, Expr),
    /// Write a guest register.
    StoreReg(RegName, Expr),
    /// Write guest memory: operand order is address, value.
    StoreMem(MemOp, Expr, Expr),
    /// Conditional direct branch: taken target, fall-through target.
    Jump(CondExpr, Address, Address),
    /// Branch to a computed address; feasible targets are the global
    /// indirect-target set.
    IndirectJump(Expr),
    /// Invoke the host syscall shim, resuming at the given address.
    Syscall(Address),
    /// Terminate guest execution.
    Break,
}

impl Statement {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Jump(..) | Statement::IndirectJump(_) | Statement::Syscall(_) | Statement::Break
        )
    }

    /// Rebuild the statement applying `f` to every expression position,
    /// including both operands of a `Jump` condition. This is the one
    /// traversal shared by substitution, constant propagation, store
    /// lifting and dead-store rewriting.
    pub fn map_exprs(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Statement {
        match self {
            Statement::Let(v, e) => Statement::Let(v.clone(), f(e)),
            Statement::StoreReg(r, e) => Statement::StoreReg(*r, f(e)),
            Statement::StoreMem(op, addr, val) => Statement::StoreMem(*op, f(addr), f(val)),
            Statement::Jump(cond, then, els) => {
                let cond = match cond {
                    CondExpr::LitCond(_) => cond.clone(),
                    CondExpr::BinCond(op, a, b) => CondExpr::BinCond(*op, f(a), f(b)),
                };
                Statement::Jump(cond, *then, *els)
            }
            Statement::IndirectJump(e) => Statement::IndirectJump(f(e)),
            Statement::Syscall(cont) => Statement::Syscall(*cont),
            Statement::Break => Statement::Break,
        }
    }

    /// Number of `Var(name)` reads across all expression positions.
    pub fn count_var(&self, name: &VarName) -> usize {
        match self {
            Statement::Let(_, e) | Statement::StoreReg(_, e) | Statement::IndirectJump(e) => {
                e.count_var(name)
            }
            Statement::StoreMem(_, addr, val) => addr.count_var(name) + val.count_var(name),
            Statement::Jump(cond, _, _) => cond.count_var(name),
            Statement::Syscall(_) | Statement::Break => 0,
        }
    }

    pub fn mentions_var(&self, name: &VarName) -> bool {
        self.count_var(name) > 0
    }
}
