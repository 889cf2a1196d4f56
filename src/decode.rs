// decode.rs - RV32IM decoder and lifter
//
// Decodes fixed 4-byte RV32IM instructions and lifts each one directly to
// IR statements. Reads of x0 lift to Lit(0) and writes to x0 are dropped,
// so the zero register never reaches the IR. An instruction whose only
// effect was such a write still contributes a no-op binding, keeping every
// instruction address present in the statement stream for the block
// builder.
//
// Link addresses (pc+4 of jal/jalr with a link register) are reported as
// indirect-jump targets: returns reach them through a computed jump.

use crate::elf::CodeChunk;
use crate::error::{Error, Result};
use crate::ir::{
    Address, BinOp, CondExpr, CondOp, Expr, MemOp, RegName, Statement, VarName,
};
use log::debug;

/// Decoder output: the raw indirect-target list (unsorted, may contain
/// duplicates) and the lifted statement stream in ascending address order.
#[derive(Debug, Default)]
pub struct Decoded {
    pub indirect_targets: Vec<Address>,
    pub statements: Vec<(Address, Statement)>,
}

/// Lift all code chunks.
pub fn decode(chunks: &[CodeChunk]) -> Result<Decoded> {
    let mut out = Decoded::default();
    for chunk in chunks {
        let mut offset = 0usize;
        while offset + 4 <= chunk.data.len() {
            let pc = chunk.vaddr + offset as Address;
            let word = u32::from_le_bytes([
                chunk.data[offset],
                chunk.data[offset + 1],
                chunk.data[offset + 2],
                chunk.data[offset + 3],
            ]);
            lift(pc, word, &mut out)?;
            offset += 4;
        }
    }
    debug!(
        "lifted {} statements, {} raw indirect targets",
        out.statements.len(),
        out.indirect_targets.len()
    );
    Ok(out)
}

/// Read of an architectural register; x0 is hardwired zero.
fn reg_read(x: u8) -> Expr {
    match RegName::from_index(x) {
        Some(r) => Expr::LoadReg(r),
        None => Expr::Lit(0),
    }
}

/// Lift one instruction, pushing its statements.
fn lift(pc: Address, word: u32, out: &mut Decoded) -> Result<()> {
    let opcode = word & 0x7f;
    let rd = ((word >> 7) & 0x1f) as u8;
    let funct3 = (word >> 12) & 0x7;
    let rs1 = ((word >> 15) & 0x1f) as u8;
    let rs2 = ((word >> 20) & 0x1f) as u8;
    let funct7 = (word >> 25) & 0x7f;

    let mut push = |stmt: Statement| out.statements.push((pc, stmt));

    // Writes to x0 vanish; a no-op binding keeps the address mapped.
    let store_or_nop = |rd: u8, rhs: Expr| match RegName::from_index(rd) {
        Some(r) => Statement::StoreReg(r, rhs),
        None => Statement::Let(VarName::new(format!("tmp_{pc:x}")), Expr::Lit(0)),
    };

    match opcode {
        // lui
        0x37 => {
            let imm = (word & 0xffff_f000) as i32;
            push(store_or_nop(rd, Expr::Lit(imm)));
        }
        // auipc: the PC folds in at decode time.
        0x17 => {
            let imm = (word & 0xffff_f000) as i32;
            push(store_or_nop(rd, Expr::Lit((pc as i32).wrapping_add(imm))));
        }
        // jal
        0x6f => {
            let target = pc.wrapping_add(decode_j_imm(word) as Address);
            if RegName::from_index(rd).is_some() {
                push(store_or_nop(rd, Expr::Lit(pc.wrapping_add(4) as i32)));
                out.indirect_targets.push(pc.wrapping_add(4));
            }
            push(Statement::Jump(CondExpr::LitCond(true), target, target));
        }
        // jalr
        0x67 => {
            let imm = decode_i_imm(word);
            // Target is computed before the link write; the low bit is
            // cleared per the ISA.
            let target = Expr::bin(
                BinOp::And,
                Expr::bin(BinOp::Add, reg_read(rs1), Expr::Lit(imm)),
                Expr::Lit(-2),
            );
            if RegName::from_index(rd).is_some() {
                let tmp = VarName::new(format!("tmp_{pc:x}"));
                push(Statement::Let(tmp.clone(), target));
                push(store_or_nop(rd, Expr::Lit(pc.wrapping_add(4) as i32)));
                push(Statement::IndirectJump(Expr::Var(tmp)));
                out.indirect_targets.push(pc.wrapping_add(4));
            } else {
                push(Statement::IndirectJump(target));
            }
        }
        // branches
        0x63 => {
            let target = pc.wrapping_add(decode_b_imm(word) as Address);
            let fallthrough = pc.wrapping_add(4);
            let op = match funct3 {
                0 => CondOp::Equal,
                1 => CondOp::NotEqual,
                4 => CondOp::LessThan,
                5 => CondOp::GtrEqual,
                6 => CondOp::LessThanU,
                7 => CondOp::GtrEqualU,
                _ => return Err(illegal(pc, word)),
            };
            push(Statement::Jump(
                CondExpr::BinCond(op, reg_read(rs1), reg_read(rs2)),
                target,
                fallthrough,
            ));
        }
        // loads
        0x03 => {
            let mem_op = match funct3 {
                0 => MemOp::Byte,
                1 => MemOp::Half,
                2 => MemOp::Word,
                4 => MemOp::ByteU,
                5 => MemOp::HalfU,
                _ => return Err(illegal(pc, word)),
            };
            let addr = Expr::bin(BinOp::Add, reg_read(rs1), Expr::Lit(decode_i_imm(word)));
            push(store_or_nop(rd, Expr::load(mem_op, addr)));
        }
        // stores
        0x23 => {
            let mem_op = match funct3 {
                0 => MemOp::Byte,
                1 => MemOp::Half,
                2 => MemOp::Word,
                _ => return Err(illegal(pc, word)),
            };
            let addr = Expr::bin(BinOp::Add, reg_read(rs1), Expr::Lit(decode_s_imm(word)));
            push(Statement::StoreMem(mem_op, addr, reg_read(rs2)));
        }
        // op-imm
        0x13 => {
            let imm = decode_i_imm(word);
            let shamt = (imm & 0x1f) as i32;
            let rhs = match funct3 {
                0 => Expr::bin(BinOp::Add, reg_read(rs1), Expr::Lit(imm)),
                1 => Expr::bin(BinOp::LogicalShiftLeft, reg_read(rs1), Expr::Lit(shamt)),
                2 => Expr::bin(BinOp::SetIfLess, reg_read(rs1), Expr::Lit(imm)),
                3 => Expr::bin(BinOp::SetIfLessU, reg_read(rs1), Expr::Lit(imm)),
                4 => Expr::bin(BinOp::Xor, reg_read(rs1), Expr::Lit(imm)),
                5 if funct7 == 0x20 => {
                    Expr::bin(BinOp::ArithShiftRight, reg_read(rs1), Expr::Lit(shamt))
                }
                5 => Expr::bin(BinOp::LogicalShiftRight, reg_read(rs1), Expr::Lit(shamt)),
                6 => Expr::bin(BinOp::Or, reg_read(rs1), Expr::Lit(imm)),
                7 => Expr::bin(BinOp::And, reg_read(rs1), Expr::Lit(imm)),
                _ => return Err(illegal(pc, word)),
            };
            push(store_or_nop(rd, rhs));
        }
        // op
        0x33 => {
            let op = match (funct7, funct3) {
                (0x00, 0) => BinOp::Add,
                (0x20, 0) => BinOp::Sub,
                (0x00, 1) => BinOp::LogicalShiftLeft,
                (0x00, 2) => BinOp::SetIfLess,
                (0x00, 3) => BinOp::SetIfLessU,
                (0x00, 4) => BinOp::Xor,
                (0x00, 5) => BinOp::LogicalShiftRight,
                (0x20, 5) => BinOp::ArithShiftRight,
                (0x00, 6) => BinOp::Or,
                (0x00, 7) => BinOp::And,
                (0x01, 0) => BinOp::Mult,
                (0x01, 1) => BinOp::MultHi,
                (0x01, 3) => BinOp::MultHiU,
                (0x01, 4) => BinOp::Quot,
                (0x01, 5) => BinOp::QuotU,
                (0x01, 6) => BinOp::Rem,
                (0x01, 7) => BinOp::RemU,
                _ => return Err(illegal(pc, word)),
            };
            push(store_or_nop(rd, Expr::bin(op, reg_read(rs1), reg_read(rs2))));
        }
        // fence: no architectural effect in a single-threaded guest.
        0x0f => {
            push(Statement::Let(VarName::new(format!("tmp_{pc:x}")), Expr::Lit(0)));
        }
        // system
        0x73 => match word {
            0x0000_0073 => push(Statement::Syscall(pc.wrapping_add(4))),
            0x0010_0073 => push(Statement::Break),
            _ => return Err(illegal(pc, word)),
        },
        _ => return Err(illegal(pc, word)),
    }

    Ok(())
}

fn illegal(pc: Address, word: u32) -> Error {
    Error::MalformedInput(format!(
        "undecodable instruction {word:#010x} at {pc:#010x}"
    ))
}

// Immediate decoders

fn decode_i_imm(word: u32) -> i32 {
    (word as i32) >> 20
}

fn decode_s_imm(word: u32) -> i32 {
    let imm11_5 = (word >> 25) & 0x7f;
    let imm4_0 = (word >> 7) & 0x1f;
    let imm = (imm11_5 << 5) | imm4_0;
    // Sign extend from 12 bits.
    ((imm as i32) << 20) >> 20
}

fn decode_b_imm(word: u32) -> i32 {
    let imm12 = (word >> 31) & 0x1;
    let imm10_5 = (word >> 25) & 0x3f;
    let imm4_1 = (word >> 8) & 0xf;
    let imm11 = (word >> 7) & 0x1;
    let imm = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
    // Sign extend from 13 bits.
    ((imm as i32) << 19) >> 19
}

fn decode_j_imm(word: u32) -> i32 {
    let imm20 = (word >> 31) & 0x1;
    let imm10_1 = (word >> 21) & 0x3ff;
    let imm11 = (word >> 20) & 0x1;
    let imm19_12 = (word >> 12) & 0xff;
    let imm = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
    // Sign extend from 21 bits.
    ((imm as i32) << 11) >> 11
}
