use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NETHER_SUFFIX: &str = "_nether";
const END_SUFFIX: &str = "_the_end";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(String);

impl WorldId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Overworld,
    Nether,
    End,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Overworld, Dimension::Nether, Dimension::End];

    fn world_suffix(self) -> &'static str {
        match self {
            Self::Overworld => "",
            Self::Nether => NETHER_SUFFIX,
            Self::End => END_SUFFIX,
        }
    }
}

/// Strips the nether/end suffix from a world name.
pub fn overworld_name(name: &str) -> &str {
    name.strip_suffix(NETHER_SUFFIX)
        .or_else(|| name.strip_suffix(END_SUFFIX))
        .unwrap_or(name)
}

/// True when both worlds belong to the same island universe, whatever
/// their dimension.
pub fn same_world(a: &WorldId, b: &WorldId) -> bool {
    overworld_name(a.as_str()).eq_ignore_ascii_case(overworld_name(b.as_str()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSettings {
    #[serde(default)]
    pub generate: bool,
    #[serde(default)]
    pub islands: bool,
}

/// Configuration of one game mode and the worlds it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSettings {
    pub name: String,
    pub friendly_name: String,
    pub base_world: WorldId,
    pub data_folder: PathBuf,
    /// Extension that bundles this namespace's resources; `None` for the
    /// base system.
    pub addon: Option<String>,
    pub nether: DimensionSettings,
    pub end: DimensionSettings,
    pub default_protection_range: u32,
    pub island_distance: u32,
    pub permission_prefix: String,
}

impl NamespaceSettings {
    pub fn world_for(&self, dimension: Dimension) -> WorldId {
        WorldId::new(format!("{}{}", self.base_world, dimension.world_suffix()))
    }

    pub fn generates(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Overworld => true,
            Dimension::Nether => self.nether.generate,
            Dimension::End => self.end.generate,
        }
    }

    /// Whether an island template is pasted in `dimension`.
    pub fn has_island_template(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Overworld => true,
            Dimension::Nether => self.nether.generate && self.nether.islands,
            Dimension::End => self.end.generate && self.end.islands,
        }
    }

    /// Full capability prefix for a setting, e.g. `bskyblock.island.range`.
    pub fn capability(&self, setting: &str) -> String {
        format!("{}{}", self.permission_prefix, setting)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldRegistryError {
    #[error("namespace name cannot be empty")]
    EmptyNamespace,
    #[error("duplicate namespace: {name}")]
    DuplicateNamespace { name: String },
    #[error("world {world} is already owned by namespace {owner}")]
    WorldTaken { world: WorldId, owner: String },
}

/// Index from every generated world to the namespace that owns it.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    namespaces: Vec<NamespaceSettings>,
    by_world: HashMap<WorldId, (usize, Dimension)>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, settings: NamespaceSettings) -> Result<(), WorldRegistryError> {
        if settings.name.trim().is_empty() {
            return Err(WorldRegistryError::EmptyNamespace);
        }
        if self.namespaces.iter().any(|ns| ns.name == settings.name) {
            return Err(WorldRegistryError::DuplicateNamespace {
                name: settings.name,
            });
        }

        let generated = Dimension::ALL
            .into_iter()
            .filter(|dimension| settings.generates(*dimension))
            .map(|dimension| (settings.world_for(dimension), dimension))
            .collect::<Vec<_>>();
        for (world, _) in &generated {
            if let Some((owner_idx, _)) = self.by_world.get(world) {
                return Err(WorldRegistryError::WorldTaken {
                    world: world.clone(),
                    owner: self.namespaces[*owner_idx].name.clone(),
                });
            }
        }

        let idx = self.namespaces.len();
        for (world, dimension) in generated {
            self.by_world.insert(world, (idx, dimension));
        }
        self.namespaces.push(settings);
        Ok(())
    }

    pub fn contains(&self, world: &WorldId) -> bool {
        self.by_world.contains_key(world)
    }

    pub fn namespace_of(&self, world: &WorldId) -> Option<&NamespaceSettings> {
        let (idx, _) = self.by_world.get(world)?;
        self.namespaces.get(*idx)
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceSettings> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    pub fn dimension_of(&self, world: &WorldId) -> Option<Dimension> {
        self.by_world.get(world).map(|(_, dimension)| *dimension)
    }

    pub fn friendly_name(&self, world: &WorldId) -> Option<&str> {
        self.namespace_of(world)
            .map(|settings| settings.friendly_name.as_str())
    }

    pub fn namespaces(&self) -> &[NamespaceSettings] {
        &self.namespaces
    }
}

#[cfg(test)]
pub(crate) fn test_namespace(name: &str, data_folder: PathBuf) -> NamespaceSettings {
    NamespaceSettings {
        name: name.to_string(),
        friendly_name: name.to_ascii_uppercase(),
        base_world: WorldId::new(format!("{name}_world")),
        data_folder,
        addon: None,
        nether: DimensionSettings {
            generate: true,
            islands: true,
        },
        end: DimensionSettings {
            generate: true,
            islands: false,
        },
        default_protection_range: 80,
        island_distance: 400,
        permission_prefix: format!("{name}."),
    }
}
