use std::{fs::File, io::Read as _, path::PathBuf};

use appliance_update::overwrite::{MbrOutput, OverwritePlan, OverwriteTarget, overwrite};
use appliance_update_core::mbr::{self, BOOTSTRAP_CODE_LEN};
use clap::Parser;
use eyre::{WrapErr as _, bail};
use tracing::info;

use super::Images;
use crate::invocation::Invocation;

/// Write a complete disk image, or its partition images, to local files
///
/// Used for first installs and devices that cannot be reached over the
/// network.
#[derive(Debug, Parser)]
pub struct Overwrite {
    /// Disk image file or block device to write.
    #[arg(long, conflicts_with_all = ["boot", "root"])]
    full: Option<PathBuf>,
    /// Size of the target storage in bytes.
    #[arg(long)]
    target_storage_bytes: Option<u64>,
    /// Write the boot partition image to this file.
    #[arg(long, requires = "root")]
    boot: Option<PathBuf>,
    /// Write the root partition image to this file.
    #[arg(long, requires = "boot")]
    root: Option<PathBuf>,
    /// Write the MBR to this file; needs --target-storage-bytes.
    #[arg(long, requires_all = ["boot", "target_storage_bytes"])]
    mbr: Option<PathBuf>,
    #[command(flatten)]
    images: Images,
}

impl Overwrite {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let target = match (self.full, self.boot, self.root) {
            (Some(path), None, None) => {
                let Some(target_storage_bytes) = self.target_storage_bytes else {
                    bail!("--full needs --target-storage-bytes");
                };
                OverwriteTarget::Full {
                    path,
                    target_storage_bytes,
                }
            }
            (None, Some(boot), Some(root)) => OverwriteTarget::Partitions {
                boot,
                root,
                mbr: self.mbr.zip(self.target_storage_bytes).map(
                    |(path, target_storage_bytes)| MbrOutput {
                        path,
                        target_storage_bytes,
                    },
                ),
            },
            _ => bail!("either --full or both --boot and --root are required"),
        };

        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;
        let overwrite_path = match &target {
            OverwriteTarget::Full { path, .. } => Some(path.as_path()),
            OverwriteTarget::Partitions { .. } => None,
        };
        let packed = self
            .images
            .get(invocation, &instance, overwrite_path)
            .await?;
        let disk_signature = disk_signature(packed.mbr.as_deref())?;
        let plan = OverwritePlan {
            packed,
            disk_signature,
            target,
        };
        let layout = overwrite(plan, invocation.cancel.clone())
            .await
            .wrap_err("failed to write images")?;
        if let Some(layout) = layout {
            let names = ["boot", "root A", "root B", "perm"];
            for ((number, name), partition) in (1u8..).zip(names).zip(layout.partitions()) {
                info!(
                    name,
                    partuuid = %mbr::partuuid(disk_signature, number),
                    start_sector = partition.start_sector,
                    sectors = partition.sectors,
                    "partition"
                );
            }
        }
        Ok(())
    }
}

/// The packer's MBR fixes the PARTUUIDs its images refer to. Without one any
/// signature will do.
fn disk_signature(packer_mbr: Option<&std::path::Path>) -> eyre::Result<u32> {
    if let Some(path) = packer_mbr {
        let mut head = [0u8; BOOTSTRAP_CODE_LEN + 4];
        File::open(path)
            .and_then(|mut f| f.read_exact(&mut head))
            .wrap_err_with(|| format!("failed reading `{}`", path.display()))?;
        let signature = u32::from_le_bytes([
            head[BOOTSTRAP_CODE_LEN],
            head[BOOTSTRAP_CODE_LEN + 1],
            head[BOOTSTRAP_CODE_LEN + 2],
            head[BOOTSTRAP_CODE_LEN + 3],
        ]);
        if signature != 0 {
            return Ok(signature);
        }
    }
    Ok(rand::random())
}
