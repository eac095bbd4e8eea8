//! Master boot record layout of a full appliance disk image.
//!
//! ```text
//! sector 0        MBR
//! sector 8192     boot   (FAT32, 100 MiB)
//! ...             root A (500 MiB)
//! ...             root B (500 MiB)
//! ...             perm   (rest of the disk)
//! ```

use std::ops::Range;

pub const SECTOR_SIZE: u64 = 512;
const MIB: u64 = 1024 * 1024;

pub const BOOT_START_SECTOR: u64 = 8192;
pub const BOOT_SIZE: u64 = 100 * MIB;
pub const ROOT_SIZE: u64 = 500 * MIB;
/// The permanent data partition must hold at least this much.
pub const MIN_PERM_SIZE: u64 = MIB;

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_LEN: usize = 16;
const DISK_SIGNATURE_OFFSET: usize = 440;
/// Bytes before the disk signature that hold bootstrap code.
pub const BOOTSTRAP_CODE_LEN: usize = DISK_SIGNATURE_OFFSET;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

const TYPE_FAT32_LBA: u8 = 0x0c;
const TYPE_LINUX: u8 = 0x83;
const STATUS_ACTIVE: u8 = 0x80;
/// CHS addressing is unused; this marks an entry as LBA only.
const CHS_LBA_ONLY: [u8; 3] = [0xfe, 0xff, 0xff];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error(
        "target storage of {actual} bytes is too small, at least {minimum} bytes are required"
    )]
    TooSmall { actual: u64, minimum: u64 },
    #[error("target storage of {0} bytes exceeds what an MBR can address")]
    TooLarge(u64),
    #[error("{name} image of {size} bytes does not fit its {capacity} byte partition")]
    ImageTooLarge {
        name: &'static str,
        size: u64,
        capacity: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub partition_type: u8,
    pub bootable: bool,
    pub start_sector: u64,
    pub sectors: u64,
}

impl Partition {
    pub fn byte_range(&self) -> Range<u64> {
        let start = self.start_sector * SECTOR_SIZE;
        start..start + self.sectors * SECTOR_SIZE
    }

    pub fn len(&self) -> u64 {
        self.sectors * SECTOR_SIZE
    }

    fn encode(&self, entry: &mut [u8]) {
        entry[0] = if self.bootable { STATUS_ACTIVE } else { 0 };
        entry[1..4].copy_from_slice(&CHS_LBA_ONLY);
        entry[4] = self.partition_type;
        entry[5..8].copy_from_slice(&CHS_LBA_ONLY);
        // Both fit in u32, enforced by DiskLayout::new.
        entry[8..12].copy_from_slice(&(self.start_sector as u32).to_le_bytes());
        entry[12..16].copy_from_slice(&(self.sectors as u32).to_le_bytes());
    }
}

/// Partition layout for a disk of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskLayout {
    pub total_bytes: u64,
    pub boot: Partition,
    pub root_a: Partition,
    pub root_b: Partition,
    pub perm: Partition,
}

impl DiskLayout {
    pub fn minimum_bytes() -> u64 {
        BOOT_START_SECTOR * SECTOR_SIZE + BOOT_SIZE + 2 * ROOT_SIZE + MIN_PERM_SIZE
    }

    pub fn new(total_bytes: u64) -> Result<Self, LayoutError> {
        let minimum = Self::minimum_bytes();
        if total_bytes < minimum {
            return Err(LayoutError::TooSmall {
                actual: total_bytes,
                minimum,
            });
        }
        let total_sectors = total_bytes / SECTOR_SIZE;
        if total_sectors > u64::from(u32::MAX) {
            return Err(LayoutError::TooLarge(total_bytes));
        }

        let boot = Partition {
            partition_type: TYPE_FAT32_LBA,
            bootable: true,
            start_sector: BOOT_START_SECTOR,
            sectors: BOOT_SIZE / SECTOR_SIZE,
        };
        let root_a = Partition {
            partition_type: TYPE_LINUX,
            bootable: false,
            start_sector: boot.start_sector + boot.sectors,
            sectors: ROOT_SIZE / SECTOR_SIZE,
        };
        let root_b = Partition {
            start_sector: root_a.start_sector + root_a.sectors,
            ..root_a
        };
        let perm_start = root_b.start_sector + root_b.sectors;
        let perm = Partition {
            partition_type: TYPE_LINUX,
            bootable: false,
            start_sector: perm_start,
            sectors: total_sectors - perm_start,
        };

        Ok(Self {
            total_bytes,
            boot,
            root_a,
            root_b,
            perm,
        })
    }

    pub fn partitions(&self) -> [Partition; 4] {
        [self.boot, self.root_a, self.root_b, self.perm]
    }

    /// Encodes the 512 byte MBR sector.
    ///
    /// `bootstrap` (at most [`BOOTSTRAP_CODE_LEN`] bytes) is copied to the start
    /// of the sector. The disk signature becomes the prefix of every
    /// partition's PARTUUID (`<signature>-<nn>`).
    pub fn encode_mbr(&self, disk_signature: u32, bootstrap: &[u8]) -> [u8; 512] {
        let mut sector = [0u8; 512];
        let code_len = bootstrap.len().min(BOOTSTRAP_CODE_LEN);
        sector[..code_len].copy_from_slice(&bootstrap[..code_len]);
        sector[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
            .copy_from_slice(&disk_signature.to_le_bytes());
        for (i, partition) in self.partitions().iter().enumerate() {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_LEN;
            partition.encode(&mut sector[offset..offset + PARTITION_ENTRY_LEN]);
        }
        sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
        sector
    }
}

/// PARTUUID of a partition as Linux reports it for MBR disks.
pub fn partuuid(disk_signature: u32, partition_number: u8) -> String {
    format!("{disk_signature:08x}-{partition_number:02x}")
}
