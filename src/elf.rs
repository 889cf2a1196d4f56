// elf.rs - ELF parsing for 32-bit RISC-V executables
//
// Uses goblin for parsing. Validates the target (ELF32, RISC-V, static
// executable), then extracts executable chunks for the decoder and
// loadable chunks plus the initial program break for the emitted runtime.

use crate::error::{Error, Result};
use crate::ir::Address;
use goblin::elf::{header, program_header, Elf};
use log::debug;

/// Information about a loaded ELF.
#[derive(Debug, Clone)]
pub struct ElfInfo {
    pub entry: Address,
    pub segments: Vec<Segment>,
}

/// A loadable segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub vaddr: Address,
    pub memsz: u32,
    pub filesz: u32,
    pub offset: u32,
    pub flags: u32,
}

/// An executable chunk to decode.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub vaddr: Address,
    pub data: Vec<u8>,
    pub name: String,
}

/// A loadable chunk the emitted runtime copies into guest memory.
#[derive(Debug, Clone)]
pub struct DataChunk {
    pub vaddr: Address,
    pub data: Vec<u8>,
}

/// Parse and validate the ELF header and program headers.
pub fn parse(data: &[u8]) -> Result<ElfInfo> {
    let elf = Elf::parse(data).map_err(|e| Error::MalformedInput(format!("invalid ELF: {e}")))?;

    if elf.header.e_machine != header::EM_RISCV {
        return Err(Error::MalformedInput(format!(
            "not a RISC-V binary (e_machine={:#x})",
            elf.header.e_machine
        )));
    }
    if elf.is_64 {
        return Err(Error::MalformedInput(
            "64-bit RISC-V is not supported; expected ELF32".to_string(),
        ));
    }
    if elf.header.e_type != header::ET_EXEC {
        return Err(Error::MalformedInput(
            "not a static executable (PIE and relocatable objects are unsupported)".to_string(),
        ));
    }

    let segments: Vec<Segment> = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == program_header::PT_LOAD)
        .map(|ph| Segment {
            vaddr: ph.p_vaddr as Address,
            memsz: ph.p_memsz as u32,
            filesz: ph.p_filesz as u32,
            offset: ph.p_offset as u32,
            flags: ph.p_flags,
        })
        .collect();

    if segments.is_empty() {
        return Err(Error::MalformedInput(
            "no loadable segments".to_string(),
        ));
    }

    debug!(
        "parsed ELF: entry {:#010x}, {} loadable segments",
        elf.entry,
        segments.len()
    );
    Ok(ElfInfo {
        entry: elf.entry as Address,
        segments,
    })
}

/// Extract executable segment contents for the decoder.
pub fn extract_code(data: &[u8], info: &ElfInfo) -> Result<Vec<CodeChunk>> {
    let mut chunks = Vec::new();
    for seg in &info.segments {
        // PF_X
        if seg.flags & 0x1 != 0 && seg.filesz > 0 {
            let bytes = segment_bytes(data, seg)?;
            chunks.push(CodeChunk {
                vaddr: seg.vaddr,
                data: bytes.to_vec(),
                name: format!("seg_{:#x}", seg.vaddr),
            });
        }
    }
    if chunks.is_empty() {
        return Err(Error::MalformedInput(
            "no executable segments".to_string(),
        ));
    }
    Ok(chunks)
}

/// Extract every loadable segment's file-backed bytes. The emitted
/// runtime copies these into guest memory at startup; bss is covered by
/// zero-initialized memory up to the program break.
pub fn extract_data(data: &[u8], info: &ElfInfo) -> Result<Vec<DataChunk>> {
    info.segments
        .iter()
        .filter(|seg| seg.filesz > 0)
        .map(|seg| {
            Ok(DataChunk {
                vaddr: seg.vaddr,
                data: segment_bytes(data, seg)?.to_vec(),
            })
        })
        .collect()
}

/// Initial program break: the end of the highest loadable segment,
/// rounded up to a page.
pub fn program_break(info: &ElfInfo) -> Address {
    let end = info
        .segments
        .iter()
        .map(|seg| seg.vaddr.saturating_add(seg.memsz))
        .max()
        .unwrap_or(0);
    (end + 0xfff) & !0xfff
}

fn segment_bytes<'a>(data: &'a [u8], seg: &Segment) -> Result<&'a [u8]> {
    let start = seg.offset as usize;
    let end = start + seg.filesz as usize;
    data.get(start..end).ok_or_else(|| {
        Error::MalformedInput(format!(
            "segment at {:#010x} extends past end of file",
            seg.vaddr
        ))
    })
}
