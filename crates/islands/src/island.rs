use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::capability::{resolve_bound_detailed, GrantSet, RANGE_CAPABILITY};
use crate::location::Location;
use crate::world::{NamespaceSettings, WorldId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IslandId(pub u64);

impl fmt::Display for IslandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "island#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Island {
    id: IslandId,
    world: WorldId,
    center: Location,
    owner: PlayerId,
    members: BTreeSet<PlayerId>,
    protection_range: u32,
}

impl Island {
    pub fn new(
        id: IslandId,
        world: WorldId,
        center: Location,
        owner: PlayerId,
        protection_range: u32,
    ) -> Self {
        Self {
            id,
            world,
            center,
            owner,
            members: BTreeSet::from([owner]),
            protection_range,
        }
    }

    pub fn id(&self) -> IslandId {
        self.id
    }

    pub fn world(&self) -> &WorldId {
        &self.world
    }

    pub fn center(&self) -> &Location {
        &self.center
    }

    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    pub fn members(&self) -> &BTreeSet<PlayerId> {
        &self.members
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    /// A team is an island with at least one member besides the owner.
    pub fn has_team(&self) -> bool {
        self.members.len() > 1
    }

    pub fn protection_range(&self) -> u32 {
        self.protection_range
    }

    pub(crate) fn set_owner(&mut self, owner: PlayerId) {
        debug_assert!(self.members.contains(&owner));
        self.owner = owner;
    }

    pub(crate) fn set_protection_range(&mut self, range: u32) {
        self.protection_range = range;
    }

    fn members_consistent(&self) -> bool {
        self.members.contains(&self.owner)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IslandError {
    #[error("{player} already belongs to {island}")]
    AlreadyHasIsland { player: PlayerId, island: IslandId },
    #[error("unknown island {0}")]
    UnknownIsland(IslandId),
    #[error("{0} is already registered")]
    DuplicateIsland(IslandId),
    #[error("{island} owner {owner} is not in its member set")]
    OwnerNotMember { island: IslandId, owner: PlayerId },
    #[error("{player} is the owner of {island} and cannot be removed")]
    OwnerRemoval { player: PlayerId, island: IslandId },
    #[error("{player} is not a member of {island}")]
    NotMember { player: PlayerId, island: IslandId },
}

/// All islands, indexed by id and by member.
#[derive(Debug, Default)]
pub struct IslandRegistry {
    islands: BTreeMap<IslandId, Island>,
    by_member: HashMap<PlayerId, IslandId>,
    next_id: u64,
}

impl IslandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an island for `owner`, sizing its protection range from the
    /// namespace default and the owner's range grants.
    pub fn create_island(
        &mut self,
        owner: PlayerId,
        owner_name: &str,
        center: Location,
        settings: &NamespaceSettings,
        owner_grants: &GrantSet,
    ) -> Result<IslandId, IslandError> {
        if let Some(existing) = self.by_member.get(&owner) {
            return Err(IslandError::AlreadyHasIsland {
                player: owner,
                island: *existing,
            });
        }

        let resolution = resolve_bound_detailed(
            owner_name,
            owner_grants,
            &settings.capability(RANGE_CAPABILITY),
            settings.default_protection_range,
        );
        let range = resolution.even_value();
        let id = IslandId(self.next_id);
        self.next_id += 1;

        let island = Island::new(id, center.world.clone(), center, owner, range);
        info!(
            island = %id,
            owner = %owner,
            world = %island.world,
            center = %island.center.block().xyz(),
            protection_range = range,
            "island_created"
        );
        self.by_member.insert(owner, id);
        self.islands.insert(id, island);
        Ok(id)
    }

    /// Registers a previously persisted island.
    pub fn restore(&mut self, island: Island) -> Result<(), IslandError> {
        if !island.members_consistent() {
            return Err(IslandError::OwnerNotMember {
                island: island.id,
                owner: island.owner,
            });
        }
        if self.islands.contains_key(&island.id) {
            return Err(IslandError::DuplicateIsland(island.id));
        }
        for member in &island.members {
            if let Some(existing) = self.by_member.get(member) {
                return Err(IslandError::AlreadyHasIsland {
                    player: *member,
                    island: *existing,
                });
            }
        }
        for member in &island.members {
            self.by_member.insert(*member, island.id);
        }
        self.next_id = self.next_id.max(island.id.0 + 1);
        self.islands.insert(island.id, island);
        Ok(())
    }

    pub fn add_member(&mut self, id: IslandId, player: PlayerId) -> Result<(), IslandError> {
        if let Some(existing) = self.by_member.get(&player) {
            return Err(IslandError::AlreadyHasIsland {
                player,
                island: *existing,
            });
        }
        let island = self
            .islands
            .get_mut(&id)
            .ok_or(IslandError::UnknownIsland(id))?;
        island.members.insert(player);
        self.by_member.insert(player, id);
        Ok(())
    }

    pub fn remove_member(&mut self, id: IslandId, player: PlayerId) -> Result<(), IslandError> {
        let island = self
            .islands
            .get_mut(&id)
            .ok_or(IslandError::UnknownIsland(id))?;
        if island.owner == player {
            return Err(IslandError::OwnerRemoval { player, island: id });
        }
        if !island.members.remove(&player) {
            return Err(IslandError::NotMember { player, island: id });
        }
        self.by_member.remove(&player);
        Ok(())
    }

    pub fn get(&self, id: IslandId) -> Option<&Island> {
        self.islands.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: IslandId) -> Option<&mut Island> {
        self.islands.get_mut(&id)
    }

    pub fn island_of(&self, player: PlayerId) -> Option<&Island> {
        let id = self.by_member.get(&player)?;
        self.islands.get(id)
    }

    pub fn owner_of(&self, player: PlayerId) -> Option<PlayerId> {
        self.island_of(player).map(Island::owner)
    }

    pub fn len(&self) -> usize {
        self.islands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.islands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Island> {
        self.islands.values()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::world::test_namespace;

    fn center() -> Location {
        Location::new(WorldId::new("sky_world"), 0.0, 120.0, 0.0)
    }

    #[test]
    fn new_island_owner_is_only_member() {
        let island = Island::new(IslandId(1), WorldId::new("w"), center(), PlayerId(7), 80);
        assert!(island.is_member(PlayerId(7)));
        assert!(!island.has_team());
        assert_eq!(island.members().len(), 1);
    }

    #[test]
    fn create_island_uses_default_range_without_grants() {
        let settings = test_namespace("sky", PathBuf::from("data"));
        let mut registry = IslandRegistry::new();
        let id = registry
            .create_island(PlayerId(1), "alice", center(), &settings, &GrantSet::new())
            .expect("create");
        assert_eq!(registry.get(id).expect("island").protection_range(), 80);
    }

    #[test]
    fn create_island_rounds_granted_range_down_to_even() {
        let settings = test_namespace("sky", PathBuf::from("data"));
        let grants = ["sky.island.range.151"].into_iter().collect::<GrantSet>();
        let mut registry = IslandRegistry::new();
        let id = registry
            .create_island(PlayerId(1), "alice", center(), &settings, &grants)
            .expect("create");
        assert_eq!(registry.get(id).expect("island").protection_range(), 150);
    }

    #[test]
    fn create_island_rejects_player_with_island() {
        let settings = test_namespace("sky", PathBuf::from("data"));
        let mut registry = IslandRegistry::new();
        let first = registry
            .create_island(PlayerId(1), "alice", center(), &settings, &GrantSet::new())
            .expect("create");
        let error = registry
            .create_island(PlayerId(1), "alice", center(), &settings, &GrantSet::new())
            .expect_err("second");
        assert_eq!(
            error,
            IslandError::AlreadyHasIsland {
                player: PlayerId(1),
                island: first
            }
        );
    }

    #[test]
    fn members_are_indexed_and_owner_cannot_be_removed() {
        let settings = test_namespace("sky", PathBuf::from("data"));
        let mut registry = IslandRegistry::new();
        let id = registry
            .create_island(PlayerId(1), "alice", center(), &settings, &GrantSet::new())
            .expect("create");
        registry.add_member(id, PlayerId(2)).expect("add");
        assert_eq!(registry.owner_of(PlayerId(2)), Some(PlayerId(1)));
        assert!(registry.island_of(PlayerId(2)).expect("island").has_team());

        assert!(matches!(
            registry.remove_member(id, PlayerId(1)),
            Err(IslandError::OwnerRemoval { .. })
        ));
        registry.remove_member(id, PlayerId(2)).expect("remove");
        assert!(registry.island_of(PlayerId(2)).is_none());
    }

    #[test]
    fn restore_advances_id_allocation() {
        let settings = test_namespace("sky", PathBuf::from("data"));
        let mut registry = IslandRegistry::new();
        registry
            .restore(Island::new(
                IslandId(9),
                WorldId::new("sky_world"),
                center(),
                PlayerId(3),
                100,
            ))
            .expect("restore");
        let id = registry
            .create_island(PlayerId(4), "bob", center(), &settings, &GrantSet::new())
            .expect("create");
        assert_eq!(id, IslandId(10));
    }
}
