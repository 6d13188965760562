use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use islands::{BlockPos, PlacementError, PlacementJob, PlacementSummary, StructurePlacer, WorldId};
use tracing::{debug, warn};

static BLOCK_WORLD_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_block_world_lock_poison_once(operation: &'static str) {
    if BLOCK_WORLD_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "block world lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Default)]
struct BlockWorldState {
    loaded: HashSet<WorldId>,
    blocks: HashMap<WorldId, BTreeMap<BlockPos, String>>,
}

/// In-memory voxel store shared between the host thread and the paste
/// worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockWorld {
    state: Arc<Mutex<BlockWorldState>>,
}

impl BlockWorld {
    pub(crate) fn with_worlds(worlds: impl IntoIterator<Item = WorldId>) -> Self {
        let world = Self::default();
        world.lock("load").loaded.extend(worlds);
        world
    }

    pub(crate) fn placer(&self) -> BlockWorldPlacer {
        BlockWorldPlacer {
            world: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn block_at(&self, world: &WorldId, pos: BlockPos) -> Option<String> {
        self.lock("read")
            .blocks
            .get(world)
            .and_then(|blocks| blocks.get(&pos).cloned())
    }

    /// Placed block count per kind, sorted by kind.
    pub(crate) fn census(&self, world: &WorldId) -> BTreeMap<String, usize> {
        let state = self.lock("read");
        let mut counts = BTreeMap::new();
        for kind in state.blocks.get(world).into_iter().flat_map(BTreeMap::values) {
            *counts.entry(kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self, operation: &'static str) -> MutexGuard<'_, BlockWorldState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_block_world_lock_poison_once(operation);
                poisoned.into_inner()
            }
        }
    }
}

pub(crate) struct BlockWorldPlacer {
    world: BlockWorld,
}

impl StructurePlacer for BlockWorldPlacer {
    fn place(&mut self, job: &PlacementJob) -> Result<PlacementSummary, PlacementError> {
        let mut state = self.world.lock("write");
        if !state.loaded.contains(&job.world) {
            return Err(PlacementError::WorldUnavailable {
                world: job.world.clone(),
            });
        }
        let blocks = state.blocks.entry(job.world.clone()).or_default();
        for block in job.template.blocks() {
            blocks.insert(job.anchor.offset(block.offset), block.kind.clone());
        }
        let blocks_written = job.template.blocks().len();
        debug!(
            ticket = %job.ticket,
            world = %job.world,
            anchor = %job.anchor.xyz(),
            blocks_written,
            "blocks_placed"
        );
        Ok(PlacementSummary { blocks_written })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;

    use islands::{parse_template, IslandId, PasteTicket, TemplateName};

    use super::*;

    fn job(world: &str) -> PlacementJob {
        let world = WorldId::new(world);
        let template = parse_template(
            &world,
            TemplateName::Island,
            Path::new("island.schem"),
            r#"<Template name="island">
                <Block x="0" y="0" z="0" type="bedrock"/>
                <Block x="0" y="1" z="0" type="grass_block"/>
            </Template>"#,
        )
        .expect("template");
        PlacementJob {
            ticket: PasteTicket(0),
            world,
            island: IslandId(0),
            anchor: BlockPos::new(400, 120, 0),
            template: Arc::new(template),
        }
    }

    #[test]
    fn places_blocks_relative_to_anchor() {
        let world = BlockWorld::with_worlds([WorldId::new("sky_world")]);
        let summary = world.placer().place(&job("sky_world")).expect("place");

        assert_eq!(summary.blocks_written, 2);
        assert_eq!(
            world.block_at(&WorldId::new("sky_world"), BlockPos::new(400, 121, 0)),
            Some("grass_block".to_string())
        );
        assert_eq!(world.census(&WorldId::new("sky_world")).len(), 2);
    }

    #[test]
    fn unloaded_world_is_unavailable() {
        let world = BlockWorld::with_worlds([WorldId::new("sky_world")]);
        let error = world.placer().place(&job("lobby")).expect_err("unavailable");
        assert_eq!(
            error,
            PlacementError::WorldUnavailable {
                world: WorldId::new("lobby")
            }
        );
    }

    #[test]
    fn census_recovers_after_poison_without_panic() {
        let world = BlockWorld::with_worlds([WorldId::new("sky_world")]);
        let poisoner = world.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.state.lock().expect("guard");
            panic!("poison block world lock");
        })
        .join();

        assert!(world.census(&WorldId::new("sky_world")).is_empty());
        world.placer().place(&job("sky_world")).expect("place");
    }
}
