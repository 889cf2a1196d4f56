// rv2c - RISC-V to C static binary translator
//
// Translates 32-bit RISC-V (RV32IM) ELF executables ahead of time into a
// C header/implementation pair reproducing the guest's observable
// behavior. No interpretation happens at run time.
//
// # Architecture
//
// The translator works in several phases:
//
// 1. **ELF Parsing** (`elf.rs`): load the binary, extract code and data
//    segments plus the entry point and program break
// 2. **Decoding** (`decode.rs`): lift RV32IM instructions into the typed
//    IR, collecting indirect-jump targets along the way
// 3. **Block Recovery** (`cfg.rs`): partition the statement stream into a
//    map from entry address to basic block
// 4. **Simplification** (`fold.rs`, `passes.rs`, `liveness.rs`): run the
//    fixed-point simplifier over the block map under the selected
//    optimization level
// 5. **Local Allocation** (`locals.rs`): assign C local slots to the
//    simplifier's let bindings
// 6. **Emission** (`emit.rs`): render the header and implementation
//
// Data flows one way: every phase consumes the previous phase's value and
// returns a new one. The whole pipeline is a pure function of the input
// bytes and the optimization level.
//
// # Side-effect model
//
// `region.rs` gives every expression and statement a read and write
// region over a bitmap of the 31 guest registers plus memory. Hazard
// detection, liveness and dead-store elimination all answer their
// aliasing questions against these regions and nothing else.

pub mod cfg;
pub mod decode;
pub mod elf;
pub mod emit;
pub mod error;
pub mod fold;
pub mod ir;
pub mod liveness;
pub mod locals;
pub mod passes;
pub mod region;

pub use emit::COutput;
pub use error::{Error, Result};
pub use ir::{Address, BlockMap};

use std::collections::{BTreeMap, BTreeSet};

/// Translate a RISC-V ELF image to C. `header_name` is the file name the
/// implementation includes.
pub fn translate(elf_data: &[u8], opt_level: u8, header_name: &str) -> Result<COutput> {
    let info = elf::parse(elf_data)?;
    let code = elf::extract_code(elf_data, &info)?;
    let data_chunks = elf::extract_data(elf_data, &info)?;

    let decoded = decode::decode(&code)?;

    // Deduplicate and normalize the decoder's raw target list; the entry
    // point is reachable from outside and counts as a target. Link
    // addresses that fell past the end of a code chunk cannot be reached
    // and are dropped.
    let stmt_addrs: BTreeSet<Address> = decoded.statements.iter().map(|(a, _)| *a).collect();
    if !stmt_addrs.contains(&info.entry) {
        return Err(Error::MalformedInput(format!(
            "entry point {:#010x} is not in any executable segment",
            info.entry
        )));
    }
    let mut indirect_targets: BTreeSet<Address> = decoded
        .indirect_targets
        .iter()
        .copied()
        .filter(|t| stmt_addrs.contains(t))
        .collect();
    indirect_targets.insert(info.entry);

    let map = cfg::build(&decoded.statements, &indirect_targets)?;
    let map = passes::simplify(opt_level, &indirect_targets, map)?;

    let allocs: BTreeMap<Address, locals::LocalAlloc> = map
        .iter()
        .map(|(addr, block)| (*addr, locals::allocate(block)))
        .collect();

    Ok(emit::emit(
        &map,
        &allocs,
        &indirect_targets,
        &data_chunks,
        info.entry,
        elf::program_break(&info),
        header_name,
    ))
}
