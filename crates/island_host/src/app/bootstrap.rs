use std::io;

use islands::{
    resolve_app_paths, AppPaths, ConfigError, Dimension, DirectoryResources, IslandError,
    IslandRegistry, IslandsConfig, JsonIslandStore, PastePipeline, PersistenceError, Provisioner,
    StartupError, TemplateStore, WorldRegistry, WorldRegistryError,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::block_world::BlockWorld;
use super::commands::CommandRegistry;
use super::host::{Host, HostParts};
use super::players::{load_player_seed, PlayerBook, PlayerSeedError, PLAYERS_FILE_NAME};

const BASE_PROVIDER_ID: &str = "base";

#[derive(Debug, Error)]
pub(crate) enum BootError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Worlds(#[from] WorldRegistryError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("failed to restore saved island: {0}")]
    Restore(#[from] IslandError),
    #[error(transparent)]
    Players(#[from] PlayerSeedError),
    #[error("failed to register command table: {0}")]
    Commands(String),
    #[error("failed to start paste worker: {0}")]
    SpawnWorker(#[source] io::Error),
}

pub(crate) fn build_app() -> Result<Host, BootError> {
    init_tracing();
    info!("=== Islands Host Startup ===");
    let paths = resolve_app_paths()?;
    info!(root = %paths.root.display(), "islands_root_resolved");
    assemble(paths)
}

/// Wires every subsystem from the files under `paths`.
pub(crate) fn assemble(paths: AppPaths) -> Result<Host, BootError> {
    let config = IslandsConfig::load(&paths.config_path)?;

    let mut worlds = WorldRegistry::new();
    for settings in config.into_settings(&paths.root) {
        info!(
            namespace = %settings.name,
            world = %settings.base_world,
            data_folder = %settings.data_folder.display(),
            "namespace_registered"
        );
        worlds.register(settings)?;
    }

    let mut provisioner = Provisioner::new(Box::new(DirectoryResources::new(
        BASE_PROVIDER_ID,
        &paths.bundle_dir,
    )));
    for addon in worlds
        .namespaces()
        .iter()
        .filter_map(|settings| settings.addon.clone())
    {
        let root = paths.addons_dir.join(&addon);
        if !root.is_dir() {
            warn!(addon = %addon, path = %root.display(), "addon_bundle_missing");
        }
        provisioner.register_addon(Box::new(DirectoryResources::new(addon, root)));
    }

    let mut templates = TemplateStore::new(provisioner);
    for settings in worlds.namespaces() {
        let report = templates.load_world_set(&worlds, &settings.base_world);
        info!(
            namespace = %settings.name,
            loaded = report.loaded_count(),
            failed = report.failed_count(),
            "namespace_templates_ready"
        );
    }

    let store = JsonIslandStore::new(&paths.saves_dir);
    let mut islands = IslandRegistry::new();
    for island in store.load_all()? {
        if !worlds.contains(island.world()) {
            warn!(island = %island.id(), world = %island.world(), "saved_island_world_unregistered");
        }
        islands.restore(island)?;
    }
    info!(count = islands.len(), "islands_restored");

    let players = PlayerBook::from_seed(load_player_seed(&paths.root.join(PLAYERS_FILE_NAME))?);

    let loaded_worlds = worlds
        .namespaces()
        .iter()
        .flat_map(|settings| {
            Dimension::ALL
                .into_iter()
                .filter(move |dimension| settings.generates(*dimension))
                .map(move |dimension| settings.world_for(dimension))
        })
        .collect::<Vec<_>>();
    let blocks = BlockWorld::with_worlds(loaded_worlds);
    let pipeline = PastePipeline::spawn(blocks.placer()).map_err(BootError::SpawnWorker)?;
    let commands = CommandRegistry::with_host_builtins().map_err(BootError::Commands)?;

    Ok(Host::new(HostParts {
        paths,
        worlds,
        islands,
        templates,
        pipeline,
        players,
        store,
        blocks,
        commands,
    }))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
