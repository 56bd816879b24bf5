use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{SetupError, SetupResult};

const DEFAULT_LEVEL_NAME: &str = "world";

/// Dotted server version such as `1.8.9`. Also accepts `_` and `,` as
/// separators, as found in older jar names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerVersion(Vec<u32>);

impl ServerVersion {
    pub fn new(components: Vec<u32>) -> SetupResult<Self> {
        if components.is_empty() {
            return Err(SetupError::InvalidVersion(String::new()));
        }
        Ok(Self(components))
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn major(&self) -> u32 {
        self.get(0).unwrap_or(0)
    }

    pub fn minor(&self) -> u32 {
        self.get(1).unwrap_or(0)
    }
}

impl FromStr for ServerVersion {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components: Vec<u32> = s
            .split(['.', '_', ','])
            .filter_map(|part| part.trim().parse().ok())
            .collect();
        if components.is_empty() {
            return Err(SetupError::InvalidVersion(s.to_string()));
        }
        Ok(Self(components))
    }
}

impl TryFrom<String> for ServerVersion {
    type Error = SetupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServerVersion> for String {
    fn from(value: ServerVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for ServerVersion {
    /// Missing trailing components count as zero; `1.8` sorts just before `1.8.0`.
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let ours = self.get(i).unwrap_or(0);
            let theirs = other.get(i).unwrap_or(0);
            match ours.cmp(&theirs) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Choices gathered by the setup wizard.
///
/// Each `*_source` is a directory of a previous server whose file of that
/// kind should carry over into the new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupOptions {
    pub server_name: String,
    pub server_version: ServerVersion,
    /// World seed for a freshly generated map.
    #[serde(default)]
    pub server_seed: Option<String>,
    #[serde(default)]
    pub server_properties_source: Option<PathBuf>,
    #[serde(default)]
    pub whitelist_source: Option<PathBuf>,
    #[serde(default)]
    pub banlist_source: Option<PathBuf>,
    #[serde(default)]
    pub usercache_source: Option<PathBuf>,
    #[serde(default)]
    pub operators_source: Option<PathBuf>,
    #[serde(default)]
    pub map_data_source: Option<PathBuf>,
    /// `level-name` of the map source; `world` when unset.
    #[serde(default)]
    pub level_name: Option<String>,
}

impl SetupOptions {
    pub fn new(server_name: impl Into<String>, server_version: ServerVersion) -> Self {
        Self {
            server_name: server_name.into(),
            server_version,
            server_seed: None,
            server_properties_source: None,
            whitelist_source: None,
            banlist_source: None,
            usercache_source: None,
            operators_source: None,
            map_data_source: None,
            level_name: None,
        }
    }

    /// Names must be non-blank and limited to letters, digits, `-`, `_` and spaces.
    pub fn validate_server_name(&self) -> SetupResult<()> {
        let name = &self.server_name;
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c.is_whitespace());
        if name.trim().is_empty() || !valid_chars {
            return Err(SetupError::InvalidServerName(name.clone()));
        }
        Ok(())
    }

    pub fn server_jar_name(&self) -> String {
        format!(
            "minecraft_server.{}.{}.jar",
            self.server_version.major(),
            self.server_version.minor()
        )
    }

    pub fn level_name(&self) -> &str {
        self.level_name.as_deref().unwrap_or(DEFAULT_LEVEL_NAME)
    }
}
