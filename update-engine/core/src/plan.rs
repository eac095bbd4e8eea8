use crate::{Artifact, Destination, Features, PackedImage};

/// What happens after all artifacts of a plan were uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    /// Mark the inactive root pending (or testboot it), reboot, wait for the
    /// device to come back running the new build, then commit.
    SwitchTestbootCommit {
        /// The build timestamp of the uploaded images. A device that comes
        /// back with another new build is still committed, with a warning.
        expected_build_timestamp: Option<String>,
        /// Issue `/update/testboot` instead of `/update/switch`.
        testboot: bool,
    },
    /// Route the named service to the single staged artifact.
    Divert { service: String },
    None,
}

/// Ordered uploads plus a terminal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub artifacts: Vec<Artifact>,
    pub action: TerminalAction,
}

impl UpdatePlan {
    /// Builds the plan for an over-the-network update of a packed image.
    ///
    /// Uploads are ordered root, boot, bootloader, MBR. Devices without
    /// `partuuid` cannot resolve partitions by UUID, so the MBR is left alone
    /// on them.
    pub fn for_update(
        packed: &PackedImage,
        features: &Features,
        testboot: bool,
    ) -> std::io::Result<Self> {
        let mut artifacts = vec![
            Artifact::from_path("root", Destination::Root, &packed.root)?,
            Artifact::from_path("boot", Destination::Boot, &packed.boot)?,
        ];
        if let Some(bootloader) = &packed.bootloader {
            artifacts.push(Artifact::from_path(
                "bootloader",
                Destination::Bootloader,
                bootloader,
            )?);
        }
        if let Some(mbr) = &packed.mbr
            && features.partuuid
        {
            artifacts.push(Artifact::from_path("mbr", Destination::Mbr, mbr)?);
        }

        Ok(Self {
            artifacts,
            action: TerminalAction::SwitchTestbootCommit {
                expected_build_timestamp: Some(packed.build_timestamp.clone()),
                testboot,
            },
        })
    }

    /// Builds the plan that stages one binary and reroutes `service` to it.
    pub fn for_divert(service: &str, binary: &std::path::Path) -> std::io::Result<Self> {
        let basename = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| service.to_owned());
        let destination = Destination::UploadTemp {
            tag: service.to_owned(),
            basename,
        };
        Ok(Self {
            artifacts: vec![Artifact::from_path(service, destination, binary)?],
            action: TerminalAction::Divert {
                service: service.to_owned(),
            },
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}
