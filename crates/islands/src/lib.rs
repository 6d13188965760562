use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod atomic_io;
pub mod capability;
pub mod config;
pub mod island;
pub mod location;
pub mod paste;
pub mod persistence;
pub mod provision;
pub mod template;
pub mod template_store;
pub mod text;
pub mod transfer;
pub mod world;

pub use capability::{
    resolve_bound, resolve_bound_detailed, round_down_to_even, BoundResolution, GrantSet,
    InvalidGrant, InvalidGrantReason, RANGE_CAPABILITY,
};
pub use config::{ConfigError, IslandsConfig, NamespaceConfig, CONFIG_FILE_NAME};
pub use island::{Island, IslandError, IslandId, IslandRegistry, PlayerId};
pub use location::{location_to_string, parse_location, BlockPos, Location};
pub use paste::{
    Continuation, PasteCompletion, PastePipeline, PasteRequest, PasteTicket, PlacementError,
    PlacementJob, PlacementSummary, StructurePlacer,
};
pub use persistence::{IslandPersistence, JsonIslandStore, PersistenceError};
pub use provision::{
    DirectoryResources, ProvisionError, ProvisionOutcome, ProvisionedTemplate, Provisioner,
    ResourceProvider,
};
pub use template::{
    parse_template, SourceLocation, Template, TemplateBlock, TemplateErrorCode, TemplateName,
    TemplateParseError,
};
pub use template_store::{TemplateLoadAttempt, TemplateLoadError, TemplateStore, WorldSetReport};
pub use text::{prettify_text, tab_limit};
pub use transfer::{
    LeadershipChangeEvent, Notice, Notifier, OwnershipTransferCoordinator, PlayerDirectory,
    RangeReconciliation, TeamReason, TransferContext, TransferError, TransferObserver,
    TransferOutcome, TransferPhase, Verdict,
};
pub use world::{
    overworld_name, same_world, Dimension, DimensionSettings, NamespaceSettings, WorldId,
    WorldRegistry, WorldRegistryError,
};

pub const ROOT_ENV_VAR: &str = "ISLANDS_ROOT";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    /// Bundled defaults of the base system.
    pub bundle_dir: PathBuf,
    /// One bundle directory per addon, named by addon id.
    pub addons_dir: PathBuf,
    pub saves_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("failed to create saves directory at {path}: {source}")]
    CreateSavesDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "ISLANDS_ROOT is set but does not point to a valid root: {path}\n\
A valid root must contain islands.json and an assets/ directory."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not find the islands root by walking upward from {start_dir}\n\
Expected a directory containing islands.json and assets/.\n\
Set {env_var} explicitly, for example:\n\
export {env_var}=\"/path/to/islands\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

pub fn resolve_app_paths() -> Result<AppPaths, StartupError> {
    app_paths_at(resolve_root()?)
}

pub fn app_paths_at(root: PathBuf) -> Result<AppPaths, StartupError> {
    let saves_dir = root.join("saves");
    fs::create_dir_all(&saves_dir).map_err(|source| StartupError::CreateSavesDir {
        path: saves_dir.clone(),
        source,
    })?;

    Ok(AppPaths {
        config_path: root.join(CONFIG_FILE_NAME),
        bundle_dir: root.join("assets").join("bundle"),
        addons_dir: root.join("assets").join("addons"),
        saves_dir,
        root,
    })
}

fn resolve_root() -> Result<PathBuf, StartupError> {
    match env::var(ROOT_ENV_VAR) {
        Ok(value) => {
            let normalized = normalize_path(&PathBuf::from(value));
            if is_root_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
            let exe_dir = exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

            exe_dir
                .ancestors()
                .find(|candidate| is_root_marker(candidate))
                .map(normalize_path)
                .ok_or_else(|| StartupError::RootNotFound {
                    start_dir: normalize_path(&exe_dir),
                    env_var: ROOT_ENV_VAR,
                })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ROOT_ENV_VAR,
            source,
        }),
    }
}

fn is_root_marker(path: &Path) -> bool {
    path.join(CONFIG_FILE_NAME).is_file() && path.join("assets").is_dir()
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn root_marker_needs_config_and_assets() {
        let temp = TempDir::new().expect("temp");
        assert!(!is_root_marker(temp.path()));
        fs::write(temp.path().join(CONFIG_FILE_NAME), "{}").expect("config");
        assert!(!is_root_marker(temp.path()));
        fs::create_dir(temp.path().join("assets")).expect("assets");
        assert!(is_root_marker(temp.path()));
    }

    #[test]
    fn app_paths_create_saves_dir() {
        let temp = TempDir::new().expect("temp");
        let paths = app_paths_at(temp.path().to_path_buf()).expect("paths");
        assert!(paths.saves_dir.is_dir());
        assert_eq!(paths.config_path, temp.path().join("islands.json"));
    }
}
