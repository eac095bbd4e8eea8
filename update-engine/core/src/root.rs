use std::{borrow::Cow, fmt::Display, str::FromStr};

/// One of the two root filesystem partitions of an appliance.
#[derive(serde::Serialize, Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Root {
    A = 0,
    B = 1,
}

impl Root {
    /// Returns the root opposite to the current one.
    ///
    /// # Examples
    ///
    /// ```
    /// use appliance_update_core::Root;
    ///
    /// assert_eq!(Root::B, Root::opposite(Root::A));
    /// assert_eq!(Root::A, Root::opposite(Root::B));
    /// ```
    pub fn opposite(self) -> Self {
        match self {
            Root::A => Root::B,
            Root::B => Root::A,
        }
    }

    /// The 1-based MBR partition number holding this root.
    pub fn partition_number(self) -> u8 {
        match self {
            Root::A => 2,
            Root::B => 3,
        }
    }
}

impl Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Root::A => "a",
            Root::B => "b",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("failed to parse unknown string `{unknown}` as Root")]
pub struct RootParseError {
    unknown: String,
}

impl RootParseError {
    pub fn unknown<'a, T: Into<Cow<'a, str>>>(val: T) -> Self {
        Self {
            unknown: val.into().into_owned(),
        }
    }
}

impl FromStr for Root {
    type Err = RootParseError;

    fn from_str(unknown: &str) -> Result<Self, Self::Err> {
        // Devices report either the letter or the partition number.
        let root = match unknown.to_ascii_lowercase().as_str() {
            "a" | "2" => Root::A,
            "b" | "3" => Root::B,
            _ => return Err(RootParseError::unknown(unknown)),
        };
        Ok(root)
    }
}

mod serde_imp {
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer};

    use super::Root;

    impl<'de> Deserialize<'de> for Root {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            FromStr::from_str(&s).map_err(de::Error::custom)
        }
    }
}
