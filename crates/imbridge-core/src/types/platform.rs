//! Platform identifiers.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A chat platform a driver can speak to.
///
/// `Minecraft` is the host's own pseudo-platform; messages originating in the
/// host carry it so they can be told apart from bridged traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Minecraft,
    Qq,
    Kook,
    Discord,
    Telegram,
    Matrix,
}

impl Platform {
    /// Every known platform, in declaration order.
    pub const ALL: [Platform; 6] = [
        Platform::Minecraft,
        Platform::Qq,
        Platform::Kook,
        Platform::Discord,
        Platform::Telegram,
        Platform::Matrix,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Minecraft => "minecraft",
            Platform::Qq => "qq",
            Platform::Kook => "kook",
            Platform::Discord => "discord",
            Platform::Telegram => "telegram",
            Platform::Matrix => "matrix",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| Error::UnknownPlatform(s.to_string()))
    }
}
