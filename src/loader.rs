//! Kernel loading into the Shared Memory Region's DRAM: ELF images via
//! `goblin`, or a flat raw binary written straight at a load address — the
//! kernel image is "ELF or raw" per the external ISA's own convention, not
//! a format this core mandates.

use goblin::elf::{program_header::PT_LOAD, Elf};

use crate::shared_mem::Dram;

const ELF_MAGIC: &[u8; 4] = b"\x7FELF";

/// Loads `buffer` into `dram`, returning the entry program counter. ELF
/// images (detected by magic) go through [`load_elf_into_dram`]; anything
/// else is treated as a flat raw binary and copied verbatim to the base of
/// DRAM, with the entry PC equal to that base address.
pub fn load_kernel_into_dram(buffer: &[u8], dram: &Dram) -> Result<u64, String> {
    if buffer.starts_with(ELF_MAGIC) {
        load_elf_into_dram(buffer, dram)
    } else {
        load_raw_into_dram(buffer, dram, dram.base())
    }
}

/// Copies `buffer` verbatim into `dram` starting at `load_addr`. Used for
/// raw (non-ELF) kernel images, including those extracted by the SD-card
/// bootstrap, which carries its own fixed load address.
pub fn load_raw_into_dram(buffer: &[u8], dram: &Dram, load_addr: u64) -> Result<u64, String> {
    let offset = dram.offset(load_addr).ok_or_else(|| {
        format!("load address 0x{load_addr:x} outside DRAM range")
    })?;
    dram.write_bytes(offset, buffer).map_err(|e| format!("failed to load raw kernel: {e}"))?;
    log::debug!("raw kernel loaded: {} bytes at 0x{load_addr:x}", buffer.len());
    Ok(load_addr)
}

/// Parses `buffer` as an ELF image and copies every `PT_LOAD` segment into
/// `dram`, zero-filling the BSS tail where `p_memsz > p_filesz`. Returns the
/// entry program counter.
pub fn load_elf_into_dram(buffer: &[u8], dram: &Dram) -> Result<u64, String> {
    let elf = Elf::parse(buffer).map_err(|e| format!("ELF parse error: {e}"))?;
    let base = dram.base();
    let dram_end = base + dram.size() as u64;

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        let file_size = ph.p_filesz as usize;
        let mem_size = ph.p_memsz as usize;
        let file_offset = ph.p_offset as usize;

        if file_offset + file_size > buffer.len() {
            return Err("segment exceeds file bounds".to_string());
        }

        let target_addr = if ph.p_paddr != 0 { ph.p_paddr } else { ph.p_vaddr };

        let seg_end = target_addr
            .checked_add(mem_size as u64)
            .ok_or_else(|| "segment end overflow".to_string())?;
        if target_addr < base || seg_end > dram_end {
            return Err(format!("segment 0x{target_addr:x} out of DRAM range"));
        }

        let offset = (target_addr - base) as usize;

        if file_size > 0 {
            dram.write_bytes(offset, &buffer[file_offset..file_offset + file_size])
                .map_err(|e| format!("failed to load segment: {e}"))?;
        }
        if mem_size > file_size {
            dram.zero_range(offset + file_size, mem_size - file_size)
                .map_err(|e| format!("failed to zero bss: {e}"))?;
        }
    }

    log::debug!("ELF loaded: entry=0x{:x}, segments={}", elf.entry, elf.program_headers.len());

    Ok(elf.entry)
}


#[cfg(test)]
mod tests {
    use super::test_support::build_minimal_elf;
    use super::*;
    use crate::shared_mem::Dram;

    #[test]
    fn test_load_minimal_elf() {
        let dram = Dram::new(0x8000_0000, 4096);
        let elf = build_minimal_elf(0x8000_0000, &[0x13, 0x00, 0x00, 0x00]);
        let entry = load_elf_into_dram(&elf, &dram).unwrap();
        assert_eq!(entry, 0x8000_0000);
        assert_eq!(dram.read_range(0, 4).unwrap(), vec![0x13, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_segment_out_of_dram_range_rejected() {
        let dram = Dram::new(0x8000_0000, 4096);
        let elf = build_minimal_elf(0x9000_0000, &[0x13, 0x00, 0x00, 0x00]);
        assert!(load_elf_into_dram(&elf, &dram).is_err());
    }

    #[test]
    fn test_invalid_elf_rejected() {
        let dram = Dram::new(0x8000_0000, 4096);
        assert!(load_elf_into_dram(b"not an elf", &dram).is_err());
    }

    #[test]
    fn test_raw_kernel_dispatches_to_base() {
        let dram = Dram::new(0x8000_0000, 4096);
        let entry = load_kernel_into_dram(&[0x13, 0x00, 0x00, 0x00], &dram).unwrap();
        assert_eq!(entry, 0x8000_0000);
        assert_eq!(dram.read_range(0, 4).unwrap(), vec![0x13, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_elf_magic_dispatches_to_elf_path() {
        let dram = Dram::new(0x8000_0000, 4096);
        let elf = build_minimal_elf(0x8000_0010, &[0x13, 0x00, 0x00, 0x00]);
        let entry = load_kernel_into_dram(&elf, &dram).unwrap();
        assert_eq!(entry, 0x8000_0010);
    }

    #[test]
    fn test_raw_load_at_explicit_address() {
        let dram = Dram::new(0x8000_0000, 0x40_0000);
        let entry = load_raw_into_dram(&[0xAA; 16], &dram, 0x8020_0000).unwrap();
        assert_eq!(entry, 0x8020_0000);
        assert_eq!(dram.read_range(0x20_0000, 16).unwrap(), vec![0xAA; 16]);
    }

    #[test]
    fn test_raw_load_outside_dram_rejected() {
        let dram = Dram::new(0x8000_0000, 4096);
        assert!(load_raw_into_dram(&[0u8; 4], &dram, 0x9000_0000).is_err());
    }
}
