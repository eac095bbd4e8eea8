use std::path::PathBuf;

use clap::Args as ClapArgs;
use serde::Serialize;

/// Options shared by every verb. Unset ones fall through to the environment
/// and the settings file.
#[derive(Debug, Default, ClapArgs, Serialize)]
pub struct Args {
    /// The path to the settings file.
    #[arg(long, global = true)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
    /// Directory holding the instance directories.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_dir: Option<PathBuf>,
    /// Timeout of control requests to the device, in milliseconds.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// How long the device may take to come back after a reboot, in
    /// milliseconds.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reboot_window: Option<u64>,
    /// Interval between status polls while the device reboots, in
    /// milliseconds.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    /// Attempts per upload before giving up on transient failures.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_attempts: Option<u32>,
    /// The packer executable.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packer: Option<PathBuf>,
    /// The Go toolchain executable.
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go: Option<PathBuf>,
}
