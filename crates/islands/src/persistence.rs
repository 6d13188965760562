use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::atomic_io::write_text_atomic;
use crate::island::{Island, IslandId};

const ISLAND_SAVE_VERSION: u32 = 1;
const ISLAND_FILE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode {island}: {source}")]
    Encode {
        island: IslandId,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write island file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read island data at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse island file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Accepts save requests for changed islands.
pub trait IslandPersistence {
    fn request_save(&mut self, island: &Island) -> Result<(), PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedIsland {
    save_version: u32,
    island: Island,
}

/// One JSON file per island under a directory.
#[derive(Debug, Clone)]
pub struct JsonIslandStore {
    dir: PathBuf,
}

impl JsonIslandStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, island: IslandId) -> PathBuf {
        self.dir
            .join(format!("island-{}.{ISLAND_FILE_EXTENSION}", island.0))
    }

    pub fn save(&self, island: &Island) -> Result<PathBuf, PersistenceError> {
        let saved = SavedIsland {
            save_version: ISLAND_SAVE_VERSION,
            island: island.clone(),
        };
        let json =
            serde_json::to_string_pretty(&saved).map_err(|source| PersistenceError::Encode {
                island: island.id(),
                source,
            })?;
        let path = self.path_for(island.id());
        write_text_atomic(&path, &json).map_err(|source| PersistenceError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(island = %island.id(), path = %path.display(), "island_saved");
        Ok(path)
    }

    /// Reads every island file, sorted by id. A missing directory holds no
    /// islands.
    pub fn load_all(&self) -> Result<Vec<Island>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut islands = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| PersistenceError::Read {
                    path: self.dir.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ISLAND_FILE_EXTENSION) {
                continue;
            }
            islands.push(read_island_file(&path)?);
        }
        islands.sort_by_key(Island::id);
        Ok(islands)
    }
}

impl IslandPersistence for JsonIslandStore {
    fn request_save(&mut self, island: &Island) -> Result<(), PersistenceError> {
        self.save(island).map(|_| ())
    }
}

fn read_island_file(path: &Path) -> Result<Island, PersistenceError> {
    let raw = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut deserializer = serde_json::Deserializer::from_str(&raw);
    let saved = serde_path_to_error::deserialize::<_, SavedIsland>(&mut deserializer).map_err(
        |error| {
            let at = error.path().to_string();
            let source = error.into_inner();
            let message = if at.is_empty() || at == "." {
                source.to_string()
            } else {
                format!("at {at}: {source}")
            };
            PersistenceError::Parse {
                path: path.to_path_buf(),
                message,
            }
        },
    )?;
    if saved.save_version != ISLAND_SAVE_VERSION {
        warn!(
            path = %path.display(),
            expected = ISLAND_SAVE_VERSION,
            actual = saved.save_version,
            "island_save_version_mismatch"
        );
        return Err(PersistenceError::Parse {
            path: path.to_path_buf(),
            message: format!(
                "save_version expected {ISLAND_SAVE_VERSION}, got {}",
                saved.save_version
            ),
        });
    }
    Ok(saved.island)
}
