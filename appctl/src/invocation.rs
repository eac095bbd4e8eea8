use std::path::{Path, PathBuf};

use appliance_update::{
    DeviceClient, Instance, Target,
    build::{BuildSettings, Builder as _, PackRequest, Packer as _},
};
use appliance_update_core::{PackedImage, config::InternalCompatibilityFlags};
use eyre::WrapErr as _;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    settings::Settings,
    toolchain::{CommandPacker, GoBuilder},
};

/// Everything a verb needs to know about how it was invoked.
#[derive(Debug)]
pub struct Invocation {
    pub instance: String,
    pub parent_dir: PathBuf,
    /// Trust the device certificate on first use.
    pub insecure: bool,
    /// Testboot instead of switch when updating.
    pub testboot: bool,
    pub settings: Settings,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn open_instance(&self) -> eyre::Result<Instance> {
        Instance::open(&self.parent_dir, &self.instance)
            .wrap_err_with(|| format!("failed to open instance `{}`", self.instance))
    }

    /// Resolves the instance's device and connects to it, probing features.
    pub async fn connect(&self, instance: &Instance) -> eyre::Result<DeviceClient> {
        let config = instance.load_config()?;
        let target = Target::resolve(instance, &config, self.insecure)?;
        info!(host = target.host(), url = target.base_url(), "connecting");
        let client =
            DeviceClient::connect(target, self.settings.engine(), &self.cancel).await?;
        Ok(client)
    }

    /// Builds every package of the instance and packs the images into the
    /// instance's `out` directory.
    pub async fn build(
        &self,
        instance: &Instance,
        overwrite: Option<&Path>,
    ) -> eyre::Result<PackedImage> {
        let mut config = instance.load_config()?;
        config.internal_compatibility_flags = Some(InternalCompatibilityFlags {
            overwrite: overwrite.map(|p| p.display().to_string()),
            insecure: self.insecure,
            testboot: self.testboot,
        });

        let scratch = tempfile::tempdir().wrap_err("failed creating a build directory")?;
        let binaries_dir = scratch.path().join("bin");
        let config_path = scratch.path().join("config.json");
        let contents = serde_json::to_vec_pretty(&config)?;
        tokio::fs::write(&config_path, contents)
            .await
            .wrap_err_with(|| format!("failed writing `{}`", config_path.display()))?;

        let settings = BuildSettings {
            toolchain: self.settings.go.clone(),
            ..BuildSettings::default()
        };
        let packages = config.all_packages();
        let build_dir = instance.build_dir();
        info!(packages = packages.len(), "building");
        tokio::select! {
            () = self.cancel.cancelled() => return Err(appliance_update::Error::Cancelled.into()),
            built = GoBuilder.build(&build_dir, &packages, &settings, &binaries_dir) => {
                built.wrap_err("failed to build packages")?;
            }
        }

        let out_dir = instance.dir().join("out");
        tokio::fs::create_dir_all(&out_dir)
            .await
            .wrap_err_with(|| format!("failed creating `{}`", out_dir.display()))?;
        let request = PackRequest {
            config_path,
            instance_dir: instance.dir().to_path_buf(),
            binaries_dir,
            out_dir,
        };
        let packer = CommandPacker {
            program: self.settings.packer.clone(),
        };
        let packed = tokio::select! {
            () = self.cancel.cancelled() => return Err(appliance_update::Error::Cancelled.into()),
            packed = packer.pack(&request) => packed.wrap_err("failed to pack images")?,
        };
        info!(build = %packed.build_timestamp, "packed images");
        Ok(packed)
    }
}
