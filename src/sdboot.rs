//! SD-Card Bootstrap (C6).
//!
//! Parses a raw disk image's MBR and root FAT32 directory to extract the
//! kernel image, bit-exact against the documented on-disk layout: only
//! FAT32 partition types, only a literal `"KERNEL  BIN"` filename, only the
//! first cluster of the root directory (kernel images in this system are
//! written contiguously, so FAT chain walking is unneeded).

use crate::error::BootError;

const SECTOR_SIZE: usize = 512;
const MBR_SIGNATURE_OFFSET: usize = 510;
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const KERNEL_ENTRY_NAME: &[u8; 11] = b"KERNEL  BIN";
const LONG_NAME_ATTR: u8 = 0x0F;
const DIR_ATTR_DIRECTORY: u8 = 0x10;
/// Physical load address after the firmware reservation.
pub const KERNEL_LOAD_ADDR: u64 = 0x8020_0000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionEntry {
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

/// Scans the 4-entry MBR partition table starting at offset 446. Each entry
/// is 16 bytes; `partType` at +4, `startLBA` (little-endian u32) at +8,
/// sector count (little-endian u32) at +12.
fn parse_partitions(sector0: &[u8]) -> [PartitionEntry; 4] {
    let mut partitions = [PartitionEntry::default(); 4];
    for (i, slot) in partitions.iter_mut().enumerate() {
        let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
        let entry = &sector0[offset..offset + PARTITION_ENTRY_SIZE];
        slot.partition_type = entry[4];
        slot.start_lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
        slot.sector_count = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
    }
    partitions
}

/// First entry whose type is FAT32 (CHS `0x0B` or LBA `0x0C`).
fn find_boot_partition(partitions: &[PartitionEntry; 4]) -> Option<&PartitionEntry> {
    partitions.iter().find(|p| matches!(p.partition_type, 0x0B | 0x0C))
}

/// First non-zero-type entry that isn't the boot partition.
fn find_fs_partition<'a>(
    partitions: &'a [PartitionEntry; 4],
    boot: &PartitionEntry,
) -> Option<&'a PartitionEntry> {
    partitions.iter().find(|p| p.partition_type != 0 && p.start_lba != boot.start_lba)
}

/// The subset of a FAT32 BPB this bootstrap needs.
#[derive(Debug, Clone, Copy)]
struct Fat32BootSector {
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    sectors_per_fat: u32,
    root_cluster: u32,
}

impl Fat32BootSector {
    fn parse(bpb: &[u8]) -> Self {
        Self {
            sectors_per_cluster: bpb[13],
            reserved_sectors: u16::from_le_bytes([bpb[14], bpb[15]]),
            num_fats: bpb[16],
            sectors_per_fat: u32::from_le_bytes([bpb[36], bpb[37], bpb[38], bpb[39]]),
            root_cluster: u32::from_le_bytes([bpb[44], bpb[45], bpb[46], bpb[47]]),
        }
    }

    /// All sector arithmetic here runs in `u64`: `rootCluster` and file
    /// clusters come straight off the untrusted disk image, and the formulas
    /// in the on-disk-format documentation (`dataStartSector + (cluster-2) *
    /// sectorsPerCluster`) would underflow/overflow in native `u32` for a
    /// malformed image. Widening first means a garbage cluster number lands
    /// as an out-of-range byte offset, caught by this module's own bounds
    /// checks, rather than panicking.
    fn data_start_sector(&self) -> u64 {
        self.reserved_sectors as u64 + self.num_fats as u64 * self.sectors_per_fat as u64
    }

    /// Converts a cluster number to an absolute sector, relative to the
    /// partition's own base sector. Clusters below 2 (reserved/invalid)
    /// saturate to the data region's start rather than underflowing.
    fn cluster_to_sector(&self, cluster: u32) -> u64 {
        let cluster_index = (cluster as u64).saturating_sub(2);
        self.data_start_sector() + cluster_index * self.sectors_per_cluster as u64
    }

    fn root_dir_sector(&self) -> u64 {
        self.cluster_to_sector(self.root_cluster)
    }

    fn cluster_size_bytes(&self) -> u64 {
        self.sectors_per_cluster as u64 * SECTOR_SIZE as u64
    }
}

/// A parsed 32-byte FAT32 directory entry.
struct DirEntry {
    name: [u8; 11],
    attr: u8,
    cluster_high: u16,
    cluster_low: u16,
    file_size: u32,
}

impl DirEntry {
    fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);
        Self {
            name,
            attr: raw[11],
            cluster_high: u16::from_le_bytes([raw[20], raw[21]]),
            cluster_low: u16::from_le_bytes([raw[26], raw[27]]),
            file_size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    fn cluster(&self) -> u32 {
        ((self.cluster_high as u32) << 16) | self.cluster_low as u32
    }

    fn is_directory(&self) -> bool {
        self.attr & DIR_ATTR_DIRECTORY != 0
    }

    fn is_kernel_bin(&self) -> bool {
        &self.name == KERNEL_ENTRY_NAME
    }
}

/// Boot information extracted from the SD-card image.
#[derive(Debug)]
pub struct SdBootInfo {
    pub kernel_data: Vec<u8>,
    pub kernel_load_addr: u64,
    pub fs_partition_start: u32,
    pub fs_partition_sectors: u32,
}

/// Widens a sector index to a byte offset relative to `base_offset` and
/// confirms `len` bytes starting there fit inside `image_len`, returning the
/// offset. Every on-disk region this bootstrap reads goes through this, so a
/// malformed image (absurd LBA, garbage cluster number) surfaces as
/// `TruncatedFile` instead of panicking on overflowed pointer arithmetic.
fn checked_region(base_offset: u64, sector: u64, len: u64, image_len: u64) -> Result<u64, BootError> {
    let fail = || BootError::TruncatedFile { file_size: len, image_len: image_len as usize };
    let offset = sector.checked_mul(SECTOR_SIZE as u64).and_then(|s| s.checked_add(base_offset)).ok_or_else(fail)?;
    let end = offset.checked_add(len).ok_or_else(fail)?;
    if end > image_len {
        return Err(fail());
    }
    Ok(offset)
}

/// Runs the full eight-step parse documented for this bootstrap.
pub fn parse_sdcard(disk: &[u8]) -> Result<SdBootInfo, BootError> {
    if disk.len() < SECTOR_SIZE {
        return Err(BootError::ImageTooSmall(disk.len()));
    }
    if disk[MBR_SIGNATURE_OFFSET] != 0x55 || disk[MBR_SIGNATURE_OFFSET + 1] != 0xAA {
        return Err(BootError::InvalidMBR);
    }

    let partitions = parse_partitions(&disk[0..SECTOR_SIZE]);
    let boot_part = find_boot_partition(&partitions).ok_or(BootError::NoBootPartition)?;
    let fs_part = find_fs_partition(&partitions, boot_part);

    let image_len = disk.len() as u64;
    let bpb_offset = checked_region(0, boot_part.start_lba as u64, SECTOR_SIZE as u64, image_len)?;
    let fat32 = Fat32BootSector::parse(&disk[bpb_offset as usize..bpb_offset as usize + SECTOR_SIZE]);

    let root_sector = fat32.root_dir_sector();
    let root_offset = checked_region(bpb_offset, root_sector, fat32.cluster_size_bytes(), image_len)?;
    let cluster_size = fat32.cluster_size_bytes() as usize;
    let dir_data = &disk[root_offset as usize..root_offset as usize + cluster_size];

    let mut found: Option<DirEntry> = None;
    for chunk in dir_data.chunks_exact(32) {
        if chunk[0] == 0x00 {
            break;
        }
        if chunk[0] == 0xE5 || chunk[11] == LONG_NAME_ATTR {
            continue;
        }
        let entry = DirEntry::parse(chunk);
        if entry.is_kernel_bin() && !entry.is_directory() {
            found = Some(entry);
            break;
        }
    }
    let entry = found.ok_or(BootError::KernelNotFound)?;

    let file_sector = fat32.cluster_to_sector(entry.cluster());
    let file_offset =
        checked_region(bpb_offset, file_sector, entry.file_size as u64, image_len)?;
    let file_size = entry.file_size as usize;
    let kernel_data = disk[file_offset as usize..file_offset as usize + file_size].to_vec();

    let (fs_partition_start, fs_partition_sectors) = match fs_part {
        Some(p) => (p.start_lba, p.sector_count),
        None => (0, 0),
    };

    Ok(SdBootInfo { kernel_data, kernel_load_addr: KERNEL_LOAD_ADDR, fs_partition_start, fs_partition_sectors })
}
