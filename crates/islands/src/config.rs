use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::world::{DimensionSettings, NamespaceSettings, WorldId};

pub const CONFIG_FILE_NAME: &str = "islands.json";

const DEFAULT_PROTECTION_RANGE: u32 = 100;
const DEFAULT_ISLAND_DISTANCE: u32 = 400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("config {path} lists no namespaces")]
    NoNamespaces { path: PathBuf },
    #[error("namespace #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("namespace {name} is listed more than once")]
    DuplicateName { name: String },
    #[error("namespace {name}: default_protection_range must be even and greater than 0, got {range}")]
    InvalidProtectionRange { name: String, range: u32 },
    #[error("namespace {name}: island_distance must be greater than 0")]
    InvalidIslandDistance { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IslandsConfig {
    pub namespaces: Vec<NamespaceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceConfig {
    pub name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    pub base_world: String,
    /// Relative to the root; defaults to `data/<name>`.
    #[serde(default)]
    pub data_folder: Option<PathBuf>,
    #[serde(default)]
    pub addon: Option<String>,
    #[serde(default)]
    pub nether: DimensionSettings,
    #[serde(default)]
    pub end: DimensionSettings,
    #[serde(default = "default_protection_range")]
    pub default_protection_range: u32,
    #[serde(default = "default_island_distance")]
    pub island_distance: u32,
    /// Defaults to `<name>.`.
    #[serde(default)]
    pub permission_prefix: Option<String>,
}

fn default_protection_range() -> u32 {
    DEFAULT_PROTECTION_RANGE
}

fn default_island_distance() -> u32 {
    DEFAULT_ISLAND_DISTANCE
}

impl IslandsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(path, &raw)?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize::<_, IslandsConfig>(&mut deserializer).map_err(|error| {
            let at = error.path().to_string();
            let source = error.into_inner();
            let message = if at.is_empty() || at == "." {
                source.to_string()
            } else {
                format!("at {at}: {source}")
            };
            ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            }
        })
    }

    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.namespaces.is_empty() {
            return Err(ConfigError::NoNamespaces {
                path: path.to_path_buf(),
            });
        }
        let mut seen = HashSet::new();
        for (index, namespace) in self.namespaces.iter().enumerate() {
            let name = namespace.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateName {
                    name: name.to_string(),
                });
            }
            let range = namespace.default_protection_range;
            if range == 0 || range % 2 != 0 {
                return Err(ConfigError::InvalidProtectionRange {
                    name: name.to_string(),
                    range,
                });
            }
            if namespace.island_distance == 0 {
                return Err(ConfigError::InvalidIslandDistance {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn into_settings(self, root: &Path) -> Vec<NamespaceSettings> {
        self.namespaces
            .into_iter()
            .map(|namespace| namespace.into_settings(root))
            .collect()
    }
}

impl NamespaceConfig {
    fn into_settings(self, root: &Path) -> NamespaceSettings {
        let name = self.name.trim().to_string();
        let data_folder = match self.data_folder {
            Some(folder) if folder.is_absolute() => folder,
            Some(folder) => root.join(folder),
            None => root.join("data").join(&name),
        };
        NamespaceSettings {
            friendly_name: self
                .friendly_name
                .unwrap_or_else(|| name.to_ascii_uppercase()),
            base_world: WorldId::new(self.base_world),
            data_folder,
            addon: self.addon,
            nether: self.nether,
            end: self.end,
            default_protection_range: self.default_protection_range,
            island_distance: self.island_distance,
            permission_prefix: self
                .permission_prefix
                .unwrap_or_else(|| format!("{name}.")),
            name,
        }
    }
}
