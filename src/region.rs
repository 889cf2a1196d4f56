// region.rs - Bitmap abstraction of guest storage
//
// A Region is the set of guest locations a statement may read or write:
// bit 0 is "any memory location", bits 1..=31 are the registers in RegName
// order. Every aliasing question in the simplifier (data hazards, liveness,
// dead stores) reduces to constant-time bit operations on this type.

use crate::ir::{CondExpr, Expr, RegName, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(u64);

impl Region {
    pub const EMPTY: Region = Region(0);

    /// Any guest memory location.
    pub const MEMORY: Region = Region(1);

    /// Everything, including any bits a wider universe might ever use, so
    /// a syscall overlaps whatever it is compared against.
    pub const ALL: Region = Region(u64::MAX);

    pub fn of_reg(r: RegName) -> Region {
        Region(1 << (1 + r as u32))
    }

    pub fn union(self, other: Region) -> Region {
        Region(self.0 | other.0)
    }

    pub fn difference(self, other: Region) -> Region {
        Region(self.0 & !other.0)
    }

    pub fn overlaps(self, other: Region) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Expr {
    /// Guest state this expression may read. Literals and block-local
    /// variables read nothing; a memory load reads all of memory plus
    /// whatever its address expression reads.
    pub fn read_region(&self) -> Region {
        match self {
            Expr::Lit(_) | Expr::Var(_) => Region::EMPTY,
            Expr::LoadReg(r) => Region::of_reg(*r),
            Expr::LoadMem(_, addr) => Region::MEMORY.union(addr.read_region()),
            Expr::Un(_, e) => e.read_region(),
            Expr::Bin(_, a, b) => a.read_region().union(b.read_region()),
        }
    }
}

impl CondExpr {
    pub fn read_region(&self) -> Region {
        match self {
            CondExpr::LitCond(_) => Region::EMPTY,
            CondExpr::BinCond(_, a, b) => a.read_region().union(b.read_region()),
        }
    }
}

impl Statement {
    pub fn read_region(&self) -> Region {
        match self {
            Statement::Let(_, e) | Statement::StoreReg(_, e) | Statement::IndirectJump(e) => {
                e.read_region()
            }
            Statement::StoreMem(_, addr, val) => addr.read_region().union(val.read_region()),
            Statement::Jump(cond, _, _) => cond.read_region(),
            Statement::Syscall(_) => Region::ALL,
            Statement::Break => Region::EMPTY,
        }
    }

    pub fn write_region(&self) -> Region {
        match self {
            Statement::StoreReg(r, _) => Region::of_reg(*r),
            Statement::StoreMem(..) => Region::MEMORY,
            Statement::Syscall(_) => Region::ALL,
            Statement::Let(..) | Statement::Jump(..) | Statement::IndirectJump(_) | Statement::Break => {
                Region::EMPTY
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, MemOp};

    #[test]
    fn register_regions_are_distinct_and_disjoint() {
        for (i, a) in RegName::ALL.iter().enumerate() {
            assert!(!Region::of_reg(*a).is_empty());
            assert!(!Region::of_reg(*a).overlaps(Region::MEMORY));
            for b in &RegName::ALL[i + 1..] {
                assert!(!Region::of_reg(*a).overlaps(Region::of_reg(*b)));
            }
        }
    }

    #[test]
    fn union_difference_roundtrip() {
        let r = Region::of_reg(RegName::A0).union(Region::of_reg(RegName::A1));
        assert!(r.overlaps(Region::of_reg(RegName::A0)));
        let r = r.difference(Region::of_reg(RegName::A0));
        assert!(!r.overlaps(Region::of_reg(RegName::A0)));
        assert!(r.overlaps(Region::of_reg(RegName::A1)));
        assert!(r.difference(Region::of_reg(RegName::A1)).is_empty());
    }

    #[test]
    fn load_reads_memory_and_address_registers() {
        let e = Expr::load(
            MemOp::Word,
            Expr::bin(BinOp::Add, Expr::reg(RegName::Sp), Expr::lit(8)),
        );
        let r = e.read_region();
        assert!(r.overlaps(Region::MEMORY));
        assert!(r.overlaps(Region::of_reg(RegName::Sp)));
        assert!(!r.overlaps(Region::of_reg(RegName::A0)));
    }

    #[test]
    fn syscall_reads_and_writes_everything() {
        let s = Statement::Syscall(0x100);
        assert!(s.read_region().overlaps(Region::of_reg(RegName::T6)));
        assert!(s.write_region().overlaps(Region::MEMORY));
        assert!(s.write_region().overlaps(Region::ALL));
    }

    #[test]
    fn store_reg_writes_only_its_register() {
        let s = Statement::StoreReg(RegName::A0, Expr::reg(RegName::A1));
        assert!(s.write_region().overlaps(Region::of_reg(RegName::A0)));
        assert!(!s.write_region().overlaps(Region::of_reg(RegName::A1)));
        assert!(s.read_region().overlaps(Region::of_reg(RegName::A1)));
    }

    #[test]
    fn let_and_break_write_nothing() {
        assert!(Statement::Let(crate::ir::VarName::new("v"), Expr::lit(1))
            .write_region()
            .is_empty());
        assert!(Statement::Break.read_region().is_empty());
        assert!(Statement::Break.write_region().is_empty());
    }
}
