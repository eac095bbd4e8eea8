//! The status document a device announces on `GET /` with
//! `Accept: application/json`.

use serde::{Deserialize, Serialize};

use crate::Root;

/// Device side A/B root selector.
///
/// After a successful update `pending` names the previously inactive root and
/// `committed` stays `false` until the new root booted and was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootSelector {
    pub active: Root,
    #[serde(default)]
    pub pending: Option<Root>,
    #[serde(default = "committed_default")]
    pub committed: bool,
}

fn committed_default() -> bool {
    true
}

impl BootSelector {
    /// The root an update is written to.
    pub fn inactive(&self) -> Root {
        self.active.opposite()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceStatus {
    pub build_timestamp: String,
    /// Absent on devices that predate boot selector reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_selector: Option<BootSelector>,
}

impl DeviceStatus {
    pub fn active_root(&self) -> Option<Root> {
        self.boot_selector.map(|s| s.active)
    }
}
