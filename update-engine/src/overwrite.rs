//! Writing a complete disk image locally, for first installs.

use std::{
    fs::File,
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::{Path, PathBuf},
};

use appliance_update_core::{
    PackedImage,
    mbr::{BOOTSTRAP_CODE_LEN, DiskLayout, LayoutError, Partition},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteTarget {
    /// One disk image, or a block device, of exactly `target_storage_bytes`.
    Full {
        path: PathBuf,
        target_storage_bytes: u64,
    },
    /// Partition images as separate files.
    Partitions {
        boot: PathBuf,
        root: PathBuf,
        mbr: Option<MbrOutput>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrOutput {
    pub path: PathBuf,
    pub target_storage_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwritePlan {
    pub packed: PackedImage,
    /// Prefix of every PARTUUID on the disk.
    pub disk_signature: u32,
    pub target: OverwriteTarget,
}

/// Carries out `plan` on a blocking thread. Cancellation is honored between
/// partitions.
pub async fn overwrite(
    plan: OverwritePlan,
    cancel: CancellationToken,
) -> Result<Option<DiskLayout>, Error> {
    tokio::task::spawn_blocking(move || overwrite_blocking(&plan, &cancel))
        .await
        .map_err(|e| Error::io("overwrite task failed", io::Error::other(e)))?
}

fn overwrite_blocking(
    plan: &OverwritePlan,
    cancel: &CancellationToken,
) -> Result<Option<DiskLayout>, Error> {
    let packed = &plan.packed;
    match &plan.target {
        OverwriteTarget::Full {
            path,
            target_storage_bytes,
        } => {
            let layout = DiskLayout::new(*target_storage_bytes)?;
            check_fits("boot", &packed.boot, &layout.boot)?;
            check_fits("root", &packed.root, &layout.root_a)?;
            let bootstrap = read_bootstrap(packed.mbr.as_deref())?;

            let mut disk = open_output(path, *target_storage_bytes)?;
            let mbr = layout.encode_mbr(plan.disk_signature, &bootstrap);
            disk.write_all(&mbr)
                .map_err(|e| Error::io(format!("failed writing MBR to `{}`", path.display()), e))?;

            for (name, image, partition) in [
                ("boot", &packed.boot, &layout.boot),
                ("root", &packed.root, &layout.root_a),
            ] {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                copy_into(&mut disk, path, image, partition.byte_range().start)?;
                debug!(name, offset = partition.byte_range().start, "wrote partition");
            }
            disk.sync_all()
                .map_err(|e| Error::io(format!("failed syncing `{}`", path.display()), e))?;
            info!(
                path = %path.display(),
                bytes = target_storage_bytes,
                "wrote full disk image"
            );
            Ok(Some(layout))
        }
        OverwriteTarget::Partitions { boot, root, mbr } => {
            copy_file(&packed.boot, boot)?;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            copy_file(&packed.root, root)?;
            let layout = match mbr {
                Some(MbrOutput {
                    path,
                    target_storage_bytes,
                }) => {
                    let layout = DiskLayout::new(*target_storage_bytes)?;
                    let bootstrap = read_bootstrap(packed.mbr.as_deref())?;
                    std::fs::write(path, layout.encode_mbr(plan.disk_signature, &bootstrap))
                        .map_err(|e| {
                            Error::io(format!("failed writing `{}`", path.display()), e)
                        })?;
                    Some(layout)
                }
                None => None,
            };
            info!(boot = %boot.display(), root = %root.display(), "wrote partition images");
            Ok(layout)
        }
    }
}

fn check_fits(name: &'static str, image: &Path, partition: &Partition) -> Result<(), Error> {
    let size = std::fs::metadata(image)
        .map_err(|e| Error::io(format!("failed reading `{}`", image.display()), e))?
        .len();
    if size > partition.len() {
        return Err(LayoutError::ImageTooLarge {
            name,
            size,
            capacity: partition.len(),
        }
        .into());
    }
    Ok(())
}

/// Bootstrap code from the packer's MBR, if it produced one.
fn read_bootstrap(mbr: Option<&Path>) -> Result<Vec<u8>, Error> {
    let Some(mbr) = mbr else {
        return Ok(Vec::new());
    };
    let mut code = Vec::with_capacity(BOOTSTRAP_CODE_LEN);
    File::open(mbr)
        .and_then(|f| f.take(BOOTSTRAP_CODE_LEN as u64).read_to_end(&mut code))
        .map_err(|e| Error::io(format!("failed reading `{}`", mbr.display()), e))?;
    Ok(code)
}

/// Opens a regular file sized to `len`, or a device at least `len` long.
fn open_output(path: &Path, len: u64) -> Result<File, Error> {
    let context = || format!("failed opening `{}`", path.display());
    let mut file = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::io(context(), e))?;
    let is_file = file
        .metadata()
        .map_err(|e| Error::io(context(), e))?
        .file_type()
        .is_file();
    if is_file {
        // Drop stale contents so unwritten regions read as zero.
        file.set_len(0)
            .and_then(|()| file.set_len(len))
            .map_err(|e| Error::io(format!("failed sizing `{}`", path.display()), e))?;
    } else {
        let device_len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::io(context(), e))?;
        if device_len < len {
            return Err(Error::io(
                format!(
                    "`{}` holds {device_len} bytes, {len} bytes are required",
                    path.display()
                ),
                io::Error::from(io::ErrorKind::InvalidInput),
            ));
        }
    }
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io(context(), e))?;
    Ok(file)
}

fn copy_into(disk: &mut File, disk_path: &Path, image: &Path, offset: u64) -> Result<(), Error> {
    let mut src = File::open(image)
        .map_err(|e| Error::io(format!("failed opening `{}`", image.display()), e))?;
    disk.seek(SeekFrom::Start(offset))
        .and_then(|_| io::copy(&mut src, disk))
        .map_err(|e| {
            Error::io(
                format!(
                    "failed copying `{}` into `{}` at offset {offset}",
                    image.display(),
                    disk_path.display()
                ),
                e,
            )
        })?;
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<(), Error> {
    std::fs::copy(from, to).map_err(|e| {
        Error::io(
            format!("failed copying `{}` to `{}`", from.display(), to.display()),
            e,
        )
    })?;
    Ok(())
}
