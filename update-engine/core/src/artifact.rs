//! Content streamed to a device.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

/// Where on the device an artifact is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Root,
    Boot,
    Mbr,
    Bootloader,
    /// Staging namespace used by divert; discarded on reboot.
    UploadTemp { tag: String, basename: String },
}

impl Destination {
    /// Request path relative to the device base URL.
    pub fn path(&self) -> String {
        match self {
            Destination::Root => "/update/root".to_owned(),
            Destination::Boot => "/update/boot".to_owned(),
            Destination::Mbr => "/update/mbr".to_owned(),
            Destination::Bootloader => "/update/bootloader".to_owned(),
            Destination::UploadTemp { tag, basename } => {
                format!("/uploadtemp/{tag}/{basename}")
            }
        }
    }

    /// Partition writes are `POST`, staging uploads are `PUT`.
    pub fn is_staging(&self) -> bool {
        matches!(self, Destination::UploadTemp { .. })
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// A named blob on local disk bound for one [`Destination`].
///
/// The body is never held in memory; it is streamed from `local_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub destination: Destination,
    pub local_path: PathBuf,
    pub size: u64,
}

impl Artifact {
    /// Creates an artifact, reading its size from the file system.
    pub fn from_path(
        name: impl Into<String>,
        destination: Destination,
        local_path: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        let local_path = local_path.as_ref().to_path_buf();
        let size = std::fs::metadata(&local_path)?.len();
        Ok(Self {
            name: name.into(),
            destination,
            local_path,
            size,
        })
    }
}

/// What a packer produces for one instance build.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PackedImage {
    pub boot: PathBuf,
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbr: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<PathBuf>,
    /// Announced by the device once it runs this build.
    pub build_timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_includes_tag_and_basename() {
        let dest = Destination::UploadTemp {
            tag: "hello".into(),
            basename: "hello".into(),
        };
        assert_eq!(dest.path(), "/uploadtemp/hello/hello");
        assert!(dest.is_staging());
        assert!(!Destination::Root.is_staging());
        assert_eq!(Destination::Bootloader.to_string(), "/update/bootloader");
    }
}
