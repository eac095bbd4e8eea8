//! External tools behind the engine's build seams.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
};

use appliance_update::{
    PackageSource,
    build::{BuildSettings, Builder, PackRequest, Packer},
};
use appliance_update_core::PackedImage;
use async_trait::async_trait;
use eyre::{WrapErr as _, bail, eyre};
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the document a packer leaves in its output directory.
pub const PACKED_MANIFEST: &str = "packed.json";

/// Builds every package with `go build`, one module build directory at a
/// time.
#[derive(Debug, Default)]
pub struct GoBuilder;

#[async_trait]
impl Builder for GoBuilder {
    async fn build(
        &self,
        build_dir: &Path,
        packages: &[String],
        settings: &BuildSettings,
        out_dir: &Path,
    ) -> eyre::Result<()> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .wrap_err_with(|| format!("failed creating `{}`", out_dir.display()))?;
        for package in packages {
            let module_dir = build_dir.join(package);
            let go_mod = module_dir.join("go.mod");
            if !go_mod.is_file() {
                // Packages that were never `add`ed build at whatever version
                // the toolchain resolves.
                tokio::fs::create_dir_all(&module_dir)
                    .await
                    .wrap_err_with(|| format!("failed creating `{}`", module_dir.display()))?;
                let source = PackageSource::Latest {
                    import_path: package.clone(),
                };
                tokio::fs::write(&go_mod, source.go_mod())
                    .await
                    .wrap_err_with(|| format!("failed writing `{}`", go_mod.display()))?;
            }
            let contents = tokio::fs::read_to_string(&go_mod)
                .await
                .wrap_err_with(|| format!("failed reading `{}`", go_mod.display()))?;
            if !contents.lines().any(|l| l.trim_start().starts_with("require")) {
                go(settings, &module_dir, ["get", package.as_str()]).await?;
            }
            go(
                settings,
                &module_dir,
                [
                    OsStr::new("build"),
                    OsStr::new("-o"),
                    out_dir.as_os_str(),
                    OsStr::new(package),
                ],
            )
            .await?;
            info!(package, "built");
        }
        Ok(())
    }
}

async fn go<I, S>(settings: &BuildSettings, module_dir: &Path, args: I) -> eyre::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(&settings.toolchain);
    command
        .args(args)
        .current_dir(module_dir)
        .env("CGO_ENABLED", "0")
        .env("GOOS", &settings.target_os)
        .env("GOARCH", &settings.target_arch)
        .envs(settings.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    debug!(?command, "running toolchain");
    let output = command
        .output()
        .await
        .wrap_err_with(|| format!("failed to run `{}`", settings.toolchain.display()))?;
    if !output.status.success() {
        bail!(
            "`{}` failed in `{}` with {}: {}",
            settings.toolchain.display(),
            module_dir.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Runs an external packer executable and reads back what it produced.
///
/// The packer is invoked as
/// `<packer> --config <file> --instance-dir <dir> --binaries <dir> --out <dir>`
/// and must leave a [`PACKED_MANIFEST`] in the output directory. Relative image
/// paths in it are relative to the output directory.
#[derive(Debug)]
pub struct CommandPacker {
    pub program: PathBuf,
}

#[async_trait]
impl Packer for CommandPacker {
    async fn pack(&self, request: &PackRequest) -> eyre::Result<PackedImage> {
        let output = Command::new(&self.program)
            .arg("--config")
            .arg(&request.config_path)
            .arg("--instance-dir")
            .arg(&request.instance_dir)
            .arg("--binaries")
            .arg(&request.binaries_dir)
            .arg("--out")
            .arg(&request.out_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .wrap_err_with(|| format!("failed to run packer `{}`", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "packer `{}` exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        read_packed(&request.out_dir)
    }
}

/// Reads the packer's manifest from `out_dir`, resolving relative paths.
pub fn read_packed(out_dir: &Path) -> eyre::Result<PackedImage> {
    let manifest = out_dir.join(PACKED_MANIFEST);
    let contents = std::fs::read(&manifest)
        .wrap_err_with(|| format!("failed reading `{}`", manifest.display()))?;
    let mut packed: PackedImage = serde_json::from_slice(&contents)
        .wrap_err_with(|| format!("failed parsing `{}`", manifest.display()))?;
    let resolve = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = out_dir.join(&*p);
        }
    };
    resolve(&mut packed.boot);
    resolve(&mut packed.root);
    for image in [packed.mbr.as_mut(), packed.bootloader.as_mut()]
        .into_iter()
        .flatten()
    {
        resolve(image);
    }
    for image in [&packed.boot, &packed.root] {
        if !image.is_file() {
            return Err(eyre!("packer did not produce `{}`", image.display()));
        }
    }
    Ok(packed)
}
