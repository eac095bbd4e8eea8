#![forbid(unsafe_code)]
#![warn(unreachable_pub)]

mod artifact;
pub mod config;
pub mod features;
pub mod mbr;
mod plan;
mod root;
pub mod status;

pub use artifact::{Artifact, Destination, PackedImage};
pub use config::{InstanceConfig, PackageConfig, TlsPosture, UpdateConfig};
pub use features::{Features, HashAlgorithm};
pub use plan::{TerminalAction, UpdatePlan};
pub use root::{Root, RootParseError};
pub use status::{BootSelector, DeviceStatus};
