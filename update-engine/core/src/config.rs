//! The instance configuration document, `config.json` in an instance
//! directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Packages every new instance gets unless it is created empty.
pub const DEFAULT_PACKAGES: &[&str] = &[
    "github.com/gokrazy/fbstatus",
    "github.com/gokrazy/hello",
    "github.com/gokrazy/serial-busybox",
];
pub const DEFAULT_KERNEL_PACKAGE: &str = "github.com/gokrazy/kernel";
pub const DEFAULT_FIRMWARE_PACKAGE: &str = "github.com/gokrazy/firmware";

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// How the control plane secures its connection to the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsPosture {
    #[default]
    #[serde(rename = "off", alias = "")]
    Off,
    #[serde(rename = "self-signed")]
    SelfSigned,
    #[serde(rename = "system")]
    System,
}

impl TlsPosture {
    fn is_off(&self) -> bool {
        matches!(self, TlsPosture::Off)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct UpdateConfig {
    /// Network host to reach the device at, if it differs from `Hostname`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "HTTPPort", default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(rename = "HTTPSPort", default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
    #[serde(rename = "UseTLS", default, skip_serializing_if = "TlsPosture::is_off")]
    pub use_tls: TlsPosture,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_line_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    /// Destination path in the image to a local file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_file_paths: BTreeMap<String, String>,
    /// Destination path in the image to literal contents.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_file_contents: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dont_start: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wait_for_clock: bool,
}

/// Transient, command line derived state. Never part of the canonical form.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternalCompatibilityFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub testboot: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct InstanceConfig {
    pub hostname: String,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Keyed by import path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub package_config: BTreeMap<String, PackageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_package: Option<String>,
    #[serde(
        rename = "EEPROMPackage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub eeprom_package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_compatibility_flags: Option<InternalCompatibilityFlags>,
}

impl InstanceConfig {
    /// Configuration of a freshly created instance.
    ///
    /// An empty instance has no packages at all, not even the defaults.
    pub fn new(hostname: impl Into<String>, empty: bool) -> Self {
        let packages = if empty {
            Vec::new()
        } else {
            DEFAULT_PACKAGES.iter().map(|p| (*p).to_owned()).collect()
        };
        Self {
            hostname: hostname.into(),
            packages,
            kernel_package: Some(DEFAULT_KERNEL_PACKAGE.to_owned()),
            firmware_package: Some(DEFAULT_FIRMWARE_PACKAGE.to_owned()),
            ..Default::default()
        }
    }

    /// Host the device is reached at.
    pub fn update_hostname(&self) -> &str {
        self.update
            .as_ref()
            .and_then(|u| u.hostname.as_deref())
            .unwrap_or(&self.hostname)
    }

    pub fn tls_posture(&self) -> TlsPosture {
        self.update.as_ref().map(|u| u.use_tls).unwrap_or_default()
    }

    pub fn http_port(&self) -> u16 {
        self.update
            .as_ref()
            .and_then(|u| u.http_port)
            .unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn https_port(&self) -> u16 {
        self.update
            .as_ref()
            .and_then(|u| u.https_port)
            .unwrap_or(DEFAULT_HTTPS_PORT)
    }

    /// Adds a package unless it is already present. Returns whether it was
    /// added.
    pub fn add_package(&mut self, import_path: &str) -> bool {
        if self.packages.iter().any(|p| p == import_path) {
            return false;
        }
        self.packages.push(import_path.to_owned());
        true
    }

    /// Every Go package the build needs: user packages plus kernel, firmware
    /// and EEPROM packages.
    pub fn all_packages(&self) -> Vec<String> {
        let mut all = self.packages.clone();
        all.extend(
            [
                &self.kernel_package,
                &self.firmware_package,
                &self.eeprom_package,
            ]
            .into_iter()
            .flatten()
            .cloned(),
        );
        all
    }

    /// Stable serialized form: sorted keys, no whitespace, transient state
    /// removed.
    pub fn canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        let canonical = Self {
            internal_compatibility_flags: None,
            ..self.clone()
        };
        // `Value` keeps object keys in a BTreeMap, which sorts them.
        let value = serde_json::to_value(&canonical)?;
        serde_json::to_vec(&value)
    }
}
