//! Seams to the external tools that turn an instance into images.

use std::path::{Path, PathBuf};

use appliance_update_core::PackedImage;
use async_trait::async_trait;

/// Knobs passed through to the toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Path or name of the toolchain executable.
    pub toolchain: PathBuf,
    pub target_os: String,
    pub target_arch: String,
    /// Extra `KEY=value` pairs for the toolchain environment.
    pub env: Vec<(String, String)>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            toolchain: PathBuf::from("go"),
            target_os: "linux".to_owned(),
            target_arch: "arm64".to_owned(),
            env: Vec::new(),
        }
    }
}

/// Compiles packages into a directory of executables.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Builds every import path in `packages`, each from its module build
    /// directory below `build_dir`, into `out_dir`.
    async fn build(
        &self,
        build_dir: &Path,
        packages: &[String],
        settings: &BuildSettings,
        out_dir: &Path,
    ) -> eyre::Result<()>;
}

/// Everything a packer needs, by explicit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRequest {
    pub config_path: PathBuf,
    pub instance_dir: PathBuf,
    pub binaries_dir: PathBuf,
    pub out_dir: PathBuf,
}

/// Assembles boot, root and optional MBR and bootloader images.
#[async_trait]
pub trait Packer: Send + Sync {
    async fn pack(&self, request: &PackRequest) -> eyre::Result<PackedImage>;
}
