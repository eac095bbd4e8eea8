//! Optional update capabilities a device advertises on `/update/features`.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Value of the `X-Gokrazy-Update-Hash` header, selecting the rolling hash the
/// device computes over an upload body.
pub const UPDATE_HASH_HEADER: &str = "X-Gokrazy-Update-Hash";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Crc32,
    #[default]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Length of the raw digest in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Crc32 => 4,
            HashAlgorithm::Sha256 => 32,
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported update hash algorithm `{0}`")]
pub struct UnknownHashAlgorithm(String);

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crc32" => Ok(HashAlgorithm::Crc32),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(UnknownHashAlgorithm(other.to_owned())),
        }
    }
}

/// Body of a successful `GET /update/features`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FeaturesDocument {
    #[serde(default)]
    pub features: Vec<String>,
}

/// Capabilities of one device, probed once per command.
///
/// The default value describes a device that predates the capability endpoint:
/// every optional feature is absent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub partuuid: bool,
    pub update_hash: Option<HashAlgorithm>,
    pub divert: bool,
}

impl Features {
    /// Parses the advertised feature list. Unknown entries are ignored so that
    /// newer devices keep working with older clients.
    pub fn from_advertised<I, S>(advertised: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut features = Features::default();
        for entry in advertised {
            let entry = entry.as_ref().trim();
            let (name, value) = match entry.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (entry, None),
            };
            match (name, value) {
                ("partuuid", _) => features.partuuid = true,
                ("divert", _) => features.divert = true,
                // The bare form predates algorithm negotiation and meant crc32.
                ("updatehash", None) => {
                    features.update_hash = Some(HashAlgorithm::Crc32)
                }
                ("updatehash", Some(algo)) => {
                    if let Ok(algo) = algo.parse() {
                        features.update_hash = Some(algo);
                    }
                }
                _ => {}
            }
        }
        features
    }

    /// The hash used for uploads: the advertised one, else SHA-256.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.update_hash.unwrap_or_default()
    }
}

impl From<FeaturesDocument> for Features {
    fn from(doc: FeaturesDocument) -> Self {
        Features::from_advertised(doc.features)
    }
}
