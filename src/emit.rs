// emit.rs - C source emission
//
// Renders the simplified block map as a header/implementation pair. The
// generated runtime mirrors the dispatch architecture of the translator's
// output format: one static function per basic block returning the
// successor PC, and a central rv_run loop switching on the PC. A returned
// PC of zero halts the loop; the host-provided rv_syscall shim uses the
// same convention to stop on guest exit.
//
// All guest values are uint32_t in C; signedness lives in casts at the
// operators that care. Division, remainder and high-multiply render as
// helper calls so the emitted code keeps the guest's defined edge-case
// results without relying on C's implementation-defined behavior.

use crate::elf::DataChunk;
use crate::ir::{
    Address, BinOp, BlockMap, CondExpr, CondOp, Expr, MemOp, RegName, Statement, UnOp,
};
use crate::locals::LocalAlloc;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// The rendered translation.
#[derive(Debug)]
pub struct COutput {
    pub header: String,
    pub source: String,
}

/// Render the header and implementation.
pub fn emit(
    map: &BlockMap,
    allocs: &BTreeMap<Address, LocalAlloc>,
    indirect_targets: &BTreeSet<Address>,
    data_chunks: &[DataChunk],
    entry: Address,
    brk: Address,
    header_name: &str,
) -> COutput {
    debug!(
        "emitting {} blocks ({} indirect targets, {} data chunks)",
        map.len(),
        indirect_targets.len(),
        data_chunks.len()
    );
    COutput {
        header: emit_header(entry, brk),
        source: emit_source(map, allocs, data_chunks, header_name),
    }
}

fn emit_header(entry: Address, brk: Address) -> String {
    let mut h = String::new();
    let w = &mut h;

    let _ = writeln!(w, "#ifndef RV2C_GUEST_H");
    let _ = writeln!(w, "#define RV2C_GUEST_H");
    let _ = writeln!(w);
    let _ = writeln!(w, "#include <stdint.h>");
    let _ = writeln!(w);
    let _ = writeln!(w, "/* Guest machine state. The host allocates mem (RV_MEM_SIZE");
    let _ = writeln!(w, " * bytes, zero-initialized) and typically points sp near its top");
    let _ = writeln!(w, " * before calling rv_run(s, RV_ENTRY). */");
    let _ = writeln!(w, "typedef struct rv_state {{");
    for reg in RegName::ALL {
        let _ = writeln!(w, "    uint32_t {};", reg.mnemonic());
    }
    let _ = writeln!(w, "    uint8_t *mem;");
    let _ = writeln!(w, "    uint32_t brk;");
    let _ = writeln!(w, "}} rv_state;");
    let _ = writeln!(w);
    let _ = writeln!(w, "#define RV_ENTRY {:#010x}u", entry);
    let _ = writeln!(w, "#define RV_BRK {:#010x}u", brk);
    let _ = writeln!(w, "#define RV_MEM_SIZE 0x4000000u");
    let _ = writeln!(w);
    let _ = writeln!(w, "/* Copy the guest image into mem and set the break. */");
    let _ = writeln!(w, "void rv_init(rv_state *s);");
    let _ = writeln!(w);
    let _ = writeln!(w, "/* Run from pc until the guest stops. */");
    let _ = writeln!(w, "void rv_run(rv_state *s, uint32_t pc);");
    let _ = writeln!(w);
    let _ = writeln!(w, "/* Host-provided: handle one ecall, then return the");
    let _ = writeln!(w, " * continuation pc (its argument), or 0 to stop. */");
    let _ = writeln!(w, "uint32_t rv_syscall(rv_state *s, uint32_t pc);");
    let _ = writeln!(w);
    let _ = writeln!(w, "#endif /* RV2C_GUEST_H */");

    h
}

fn emit_source(
    map: &BlockMap,
    allocs: &BTreeMap<Address, LocalAlloc>,
    data_chunks: &[DataChunk],
    header_name: &str,
) -> String {
    let mut s = String::new();
    let w = &mut s;

    let _ = writeln!(w, "#include \"{header_name}\"");
    let _ = writeln!(w);
    let _ = writeln!(w, "#include <string.h>");
    let _ = writeln!(w);

    emit_helpers(w);
    emit_data(w, data_chunks);

    for (addr, block) in map {
        let empty = LocalAlloc::default();
        let alloc = allocs.get(addr).unwrap_or(&empty);
        emit_block(w, *addr, block, alloc);
    }

    emit_dispatch(w, map);
    s
}

fn emit_helpers(w: &mut String) {
    let _ = writeln!(
        w,
        "static uint32_t rv_quot(uint32_t a, uint32_t b) {{
    if (b == 0) return 0xffffffffu;
    if (a == 0x80000000u && b == 0xffffffffu) return a;
    return (uint32_t)((int32_t)a / (int32_t)b);
}}

static uint32_t rv_quotu(uint32_t a, uint32_t b) {{
    return b == 0 ? 0xffffffffu : a / b;
}}

static uint32_t rv_rem(uint32_t a, uint32_t b) {{
    if (b == 0) return a;
    if (a == 0x80000000u && b == 0xffffffffu) return 0;
    return (uint32_t)((int32_t)a % (int32_t)b);
}}

static uint32_t rv_remu(uint32_t a, uint32_t b) {{
    return b == 0 ? a : a % b;
}}

static uint32_t rv_mulh(uint32_t a, uint32_t b) {{
    return (uint32_t)(((int64_t)(int32_t)a * (int64_t)(int32_t)b) >> 32);
}}

static uint32_t rv_mulhu(uint32_t a, uint32_t b) {{
    return (uint32_t)(((uint64_t)a * (uint64_t)b) >> 32);
}}

static uint32_t rv_ld8(const rv_state *s, uint32_t a) {{
    return (uint32_t)(int32_t)(int8_t)s->mem[a];
}}

static uint32_t rv_ld8u(const rv_state *s, uint32_t a) {{
    return s->mem[a];
}}

static uint32_t rv_ld16(const rv_state *s, uint32_t a) {{
    uint32_t v = (uint32_t)s->mem[a] | ((uint32_t)s->mem[a + 1] << 8);
    return (uint32_t)(int32_t)(int16_t)v;
}}

static uint32_t rv_ld16u(const rv_state *s, uint32_t a) {{
    return (uint32_t)s->mem[a] | ((uint32_t)s->mem[a + 1] << 8);
}}

static uint32_t rv_ld32(const rv_state *s, uint32_t a) {{
    return (uint32_t)s->mem[a] | ((uint32_t)s->mem[a + 1] << 8)
        | ((uint32_t)s->mem[a + 2] << 16) | ((uint32_t)s->mem[a + 3] << 24);
}}

static void rv_st8(rv_state *s, uint32_t a, uint32_t v) {{
    s->mem[a] = (uint8_t)v;
}}

static void rv_st16(rv_state *s, uint32_t a, uint32_t v) {{
    s->mem[a] = (uint8_t)v;
    s->mem[a + 1] = (uint8_t)(v >> 8);
}}

static void rv_st32(rv_state *s, uint32_t a, uint32_t v) {{
    s->mem[a] = (uint8_t)v;
    s->mem[a + 1] = (uint8_t)(v >> 8);
    s->mem[a + 2] = (uint8_t)(v >> 16);
    s->mem[a + 3] = (uint8_t)(v >> 24);
}}
"
    );
}

fn emit_data(w: &mut String, data_chunks: &[DataChunk]) {
    for (i, chunk) in data_chunks.iter().enumerate() {
        let _ = writeln!(w, "static const uint8_t rv_chunk_{i}[] = {{");
        for row in chunk.data.chunks(12) {
            let _ = write!(w, "    ");
            for byte in row {
                let _ = write!(w, "{byte:#04x},");
            }
            let _ = writeln!(w);
        }
        let _ = writeln!(w, "}};");
        let _ = writeln!(w);
    }

    let _ = writeln!(w, "void rv_init(rv_state *s) {{");
    for (i, chunk) in data_chunks.iter().enumerate() {
        let _ = writeln!(
            w,
            "    memcpy(s->mem + {:#010x}u, rv_chunk_{i}, sizeof rv_chunk_{i});",
            chunk.vaddr
        );
    }
    let _ = writeln!(w, "    s->brk = RV_BRK;");
    let _ = writeln!(w, "}}");
    let _ = writeln!(w);
}

fn emit_block(w: &mut String, addr: Address, block: &[Statement], alloc: &LocalAlloc) {
    let _ = writeln!(w, "static uint32_t rv_block_{addr:x}(rv_state *s) {{");
    if alloc.count > 0 {
        let names: Vec<String> = (0..alloc.count).map(|i| format!("l{i}")).collect();
        let _ = writeln!(w, "    uint32_t {};", names.join(", "));
    }
    for stmt in block {
        emit_statement(w, stmt, alloc);
    }
    let _ = writeln!(w, "}}");
    let _ = writeln!(w);
}

fn emit_statement(w: &mut String, stmt: &Statement, alloc: &LocalAlloc) {
    match stmt {
        Statement::Let(name, rhs) => {
            let slot = alloc.slots.get(name).copied().unwrap_or(0);
            let _ = writeln!(w, "    l{slot} = {};", c_expr(rhs, alloc));
        }
        Statement::StoreReg(reg, rhs) => {
            let _ = writeln!(w, "    s->{} = {};", reg.mnemonic(), c_expr(rhs, alloc));
        }
        Statement::StoreMem(op, addr, val) => {
            let helper = match op {
                MemOp::Byte | MemOp::ByteU => "rv_st8",
                MemOp::Half | MemOp::HalfU => "rv_st16",
                MemOp::Word => "rv_st32",
            };
            let _ = writeln!(
                w,
                "    {helper}(s, {}, {});",
                c_expr(addr, alloc),
                c_expr(val, alloc)
            );
        }
        Statement::Jump(CondExpr::LitCond(true), then, _) => {
            let _ = writeln!(w, "    return {then:#010x}u;");
        }
        Statement::Jump(CondExpr::LitCond(false), _, els) => {
            let _ = writeln!(w, "    return {els:#010x}u;");
        }
        Statement::Jump(cond, then, els) => {
            let _ = writeln!(
                w,
                "    return {} ? {then:#010x}u : {els:#010x}u;",
                c_cond(cond, alloc)
            );
        }
        Statement::IndirectJump(target) => {
            let _ = writeln!(w, "    return {};", c_expr(target, alloc));
        }
        Statement::Syscall(cont) => {
            let _ = writeln!(w, "    return rv_syscall(s, {cont:#010x}u);");
        }
        Statement::Break => {
            let _ = writeln!(w, "    return 0u;");
        }
    }
}

fn emit_dispatch(w: &mut String, map: &BlockMap) {
    let _ = writeln!(w, "void rv_run(rv_state *s, uint32_t pc) {{");
    let _ = writeln!(w, "    for (;;) {{");
    let _ = writeln!(w, "        switch (pc) {{");
    for addr in map.keys() {
        let _ = writeln!(
            w,
            "        case {addr:#010x}u: pc = rv_block_{addr:x}(s); break;"
        );
    }
    let _ = writeln!(w, "        default: return;");
    let _ = writeln!(w, "        }}");
    let _ = writeln!(w, "    }}");
    let _ = writeln!(w, "}}");
}

fn c_expr(e: &Expr, alloc: &LocalAlloc) -> String {
    match e {
        Expr::Lit(n) => format!("{:#x}u", *n as u32),
        Expr::Var(name) => {
            let slot = alloc.slots.get(name).copied().unwrap_or(0);
            format!("l{slot}")
        }
        Expr::LoadReg(reg) => format!("s->{}", reg.mnemonic()),
        Expr::LoadMem(op, addr) => {
            let helper = match op {
                MemOp::Byte => "rv_ld8",
                MemOp::ByteU => "rv_ld8u",
                MemOp::Half => "rv_ld16",
                MemOp::HalfU => "rv_ld16u",
                MemOp::Word => "rv_ld32",
            };
            format!("{helper}(s, {})", c_expr(addr, alloc))
        }
        Expr::Un(UnOp::Negate, x) => format!("(0u - {})", c_expr(x, alloc)),
        Expr::Un(UnOp::Not, x) => format!("~{}", c_expr(x, alloc)),
        Expr::Bin(op, a, b) => {
            let a = c_expr(a, alloc);
            let b = c_expr(b, alloc);
            match op {
                BinOp::Add => format!("({a} + {b})"),
                BinOp::Sub => format!("({a} - {b})"),
                BinOp::Mult => format!("({a} * {b})"),
                BinOp::MultHi => format!("rv_mulh({a}, {b})"),
                BinOp::MultHiU => format!("rv_mulhu({a}, {b})"),
                BinOp::Quot => format!("rv_quot({a}, {b})"),
                BinOp::QuotU => format!("rv_quotu({a}, {b})"),
                BinOp::Rem => format!("rv_rem({a}, {b})"),
                BinOp::RemU => format!("rv_remu({a}, {b})"),
                BinOp::And => format!("({a} & {b})"),
                BinOp::Or => format!("({a} | {b})"),
                BinOp::Xor => format!("({a} ^ {b})"),
                BinOp::LogicalShiftLeft => format!("({a} << ({b} & 31u))"),
                BinOp::LogicalShiftRight => format!("({a} >> ({b} & 31u))"),
                BinOp::ArithShiftRight => {
                    format!("((uint32_t)((int32_t){a} >> ({b} & 31u)))")
                }
                BinOp::SetIfLess => format!("(((int32_t){a} < (int32_t){b}) ? 1u : 0u)"),
                BinOp::SetIfLessU => format!("(({a} < {b}) ? 1u : 0u)"),
            }
        }
    }
}

fn c_cond(c: &CondExpr, alloc: &LocalAlloc) -> String {
    match c {
        CondExpr::LitCond(true) => "1".to_string(),
        CondExpr::LitCond(false) => "0".to_string(),
        CondExpr::BinCond(op, a, b) => {
            let a = c_expr(a, alloc);
            let b = c_expr(b, alloc);
            match op {
                CondOp::Equal => format!("({a} == {b})"),
                CondOp::NotEqual => format!("({a} != {b})"),
                CondOp::LessThan => format!("((int32_t){a} < (int32_t){b})"),
                CondOp::LessThanU => format!("({a} < {b})"),
                CondOp::GtrEqual => format!("((int32_t){a} >= (int32_t){b})"),
                CondOp::GtrEqualU => format!("({a} >= {b})"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarName;

    fn tiny_map() -> (BlockMap, BTreeMap<Address, LocalAlloc>) {
        let mut map = BlockMap::new();
        map.insert(
            0x100,
            vec![
                Statement::Let(VarName::new("v"), Expr::reg(RegName::A0)),
                Statement::StoreReg(
                    RegName::A1,
                    Expr::bin(BinOp::Add, Expr::var("v"), Expr::lit(1)),
                ),
                Statement::StoreMem(MemOp::Word, Expr::reg(RegName::Sp), Expr::var("v")),
                Statement::Syscall(0x104),
            ],
        );
        map.insert(0x104, vec![Statement::Break]);
        let allocs = map
            .iter()
            .map(|(a, b)| (*a, crate::locals::allocate(b)))
            .collect();
        (map, allocs)
    }

    #[test]
    fn header_declares_state_and_entry_points() {
        let h = emit_header(0x100, 0x12000);
        assert!(h.contains("typedef struct rv_state"));
        assert!(h.contains("uint32_t ra;"));
        assert!(h.contains("uint32_t a7;"));
        assert!(h.contains("#define RV_ENTRY 0x00000100u"));
        assert!(h.contains("#define RV_BRK 0x00012000u"));
        assert!(h.contains("uint32_t rv_syscall(rv_state *s, uint32_t pc);"));
    }

    #[test]
    fn source_has_one_function_and_case_per_block() {
        let (map, allocs) = tiny_map();
        let out = emit(
            &map,
            &allocs,
            &BTreeSet::new(),
            &[],
            0x100,
            0x1000,
            "guest.h",
        );
        assert!(out.source.contains("#include \"guest.h\""));
        assert!(out.source.contains("static uint32_t rv_block_100(rv_state *s)"));
        assert!(out.source.contains("static uint32_t rv_block_104(rv_state *s)"));
        assert!(out.source.contains("case 0x00000100u: pc = rv_block_100(s); break;"));
        assert!(out.source.contains("case 0x00000104u: pc = rv_block_104(s); break;"));
    }

    #[test]
    fn statements_render_with_local_slots() {
        let (map, allocs) = tiny_map();
        let out = emit(
            &map,
            &allocs,
            &BTreeSet::new(),
            &[],
            0x100,
            0x1000,
            "guest.h",
        );
        assert!(out.source.contains("uint32_t l0;"));
        assert!(out.source.contains("l0 = s->a0;"));
        assert!(out.source.contains("s->a1 = (l0 + 0x1u);"));
        assert!(out.source.contains("rv_st32(s, s->sp, l0);"));
        assert!(out.source.contains("return rv_syscall(s, 0x00000104u);"));
        assert!(out.source.contains("return 0u;"));
    }

    #[test]
    fn conditional_jump_renders_as_ternary() {
        let mut map = BlockMap::new();
        map.insert(
            0x10,
            vec![Statement::Jump(
                CondExpr::BinCond(CondOp::LessThanU, Expr::reg(RegName::A0), Expr::reg(RegName::A1)),
                0x20,
                0x30,
            )],
        );
        map.insert(0x20, vec![Statement::Break]);
        map.insert(0x30, vec![Statement::Break]);
        let allocs = map
            .iter()
            .map(|(a, b)| (*a, crate::locals::allocate(b)))
            .collect();
        let out = emit(&map, &allocs, &BTreeSet::new(), &[], 0x10, 0x1000, "g.h");
        assert!(out
            .source
            .contains("return (s->a0 < s->a1) ? 0x00000020u : 0x00000030u;"));
    }

    #[test]
    fn data_chunks_render_with_init_copies() {
        let chunks = [DataChunk {
            vaddr: 0x2000,
            data: vec![1, 2, 3],
        }];
        let mut s = String::new();
        emit_data(&mut s, &chunks);
        assert!(s.contains("static const uint8_t rv_chunk_0[] = {"));
        assert!(s.contains("0x01,0x02,0x03,"));
        assert!(s.contains("memcpy(s->mem + 0x00002000u, rv_chunk_0, sizeof rv_chunk_0);"));
        assert!(s.contains("s->brk = RV_BRK;"));
    }

    #[test]
    fn negative_literals_render_as_unsigned_words() {
        let alloc = LocalAlloc::default();
        assert_eq!(c_expr(&Expr::lit(-2), &alloc), "0xfffffffeu");
        assert_eq!(c_expr(&Expr::lit(5), &alloc), "0x5u");
    }
}
