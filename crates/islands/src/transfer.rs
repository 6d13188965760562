use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capability::{resolve_bound_detailed, GrantSet, RANGE_CAPABILITY};
use crate::island::{Island, IslandId, IslandRegistry, PlayerId};
use crate::persistence::IslandPersistence;
use crate::world::{NamespaceSettings, WorldRegistry};

/// Looks up identities known to the host.
pub trait PlayerDirectory {
    /// Resolves a command argument (name or numeric id) to an identity.
    fn resolve(&self, name_or_id: &str) -> Option<PlayerId>;

    fn name(&self, player: PlayerId) -> Option<String>;

    /// Capability grants of a connected player; `None` while offline.
    fn online_grants(&self, player: PlayerId) -> Option<GrantSet>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamReason {
    MakeLeader,
}

#[derive(Debug, Clone, Copy)]
pub struct LeadershipChangeEvent<'a> {
    pub island: &'a Island,
    pub reason: TeamReason,
    pub involved: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Observer consulted before a leadership change is committed.
pub trait TransferObserver {
    fn on_leadership_change(&mut self, event: &LeadershipChangeEvent<'_>) -> Verdict;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowOwner { name: String },
    YouAreNowOwner,
    RangeUpdated { range: u32 },
    TransferFailed(TransferError),
}

/// Delivers notices to players. Rendering them to text is the host's job.
pub trait Notifier {
    fn notify(&mut self, recipient: PlayerId, notice: Notice);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("requester does not lead an island")]
    NotLeader,
    #[error("requester is not in a team")]
    NotInTeam,
    #[error("unknown player: {name}")]
    UnknownTarget { name: String },
    #[error("cannot transfer leadership to yourself")]
    SelfTransfer,
    #[error("that player is not in your team")]
    TargetNotInTeam,
    #[error("leadership change was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Validating,
    Notifying,
    Committing,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeReconciliation {
    /// Offline targets are reconciled when they next connect.
    TargetOffline,
    /// No range grant applies; the stored range was left alone.
    NoMatchingGrant,
    Unchanged { range: u32 },
    Updated { from: u32, to: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub island: IslandId,
    pub previous_owner: PlayerId,
    pub new_owner: PlayerId,
    /// The stored range was 0 and was reset to the namespace default.
    pub range_reset_from_zero: bool,
    pub range: RangeReconciliation,
}

/// Collaborators a transfer reads and writes.
pub struct TransferContext<'a> {
    pub islands: &'a mut IslandRegistry,
    pub worlds: &'a WorldRegistry,
    pub players: &'a dyn PlayerDirectory,
    pub notifier: &'a mut dyn Notifier,
    pub persistence: &'a mut dyn IslandPersistence,
}

/// Sequences a leadership change: gates, veto, commit, range reconcile,
/// save. A failed gate or a veto leaves every island untouched.
pub struct OwnershipTransferCoordinator {
    observers: Vec<Box<dyn TransferObserver>>,
    phase: TransferPhase,
}

impl Default for OwnershipTransferCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipTransferCoordinator {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            phase: TransferPhase::Idle,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn TransferObserver>) {
        self.observers.push(observer);
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn transfer(
        &mut self,
        ctx: TransferContext<'_>,
        requester: PlayerId,
        target_arg: &str,
    ) -> Result<TransferOutcome, TransferError> {
        let result = self.run(ctx, requester, target_arg);
        self.enter(TransferPhase::Idle);
        result
    }

    fn run(
        &mut self,
        ctx: TransferContext<'_>,
        requester: PlayerId,
        target_arg: &str,
    ) -> Result<TransferOutcome, TransferError> {
        let TransferContext {
            islands,
            worlds,
            players,
            notifier,
            persistence,
        } = ctx;

        self.enter(TransferPhase::Validating);
        let (island_id, target) = match validate(islands, players, requester, target_arg) {
            Ok(validated) => validated,
            Err(gate) => {
                debug!(requester = %requester, target = target_arg, gate = ?gate, "transfer_gate_failed");
                notifier.notify(requester, Notice::TransferFailed(gate.clone()));
                return Err(gate);
            }
        };

        self.enter(TransferPhase::Notifying);
        let island = islands.get(island_id).ok_or(TransferError::NotLeader)?;
        let event = LeadershipChangeEvent {
            island,
            reason: TeamReason::MakeLeader,
            involved: target,
        };
        for observer in &mut self.observers {
            if observer.on_leadership_change(&event) == Verdict::Reject {
                info!(island = %island_id, requester = %requester, target = %target, "transfer_vetoed");
                return Err(TransferError::Cancelled);
            }
        }

        self.enter(TransferPhase::Committing);
        let island = islands.get_mut(island_id).ok_or(TransferError::NotLeader)?;
        island.set_owner(target);
        let target_name = players
            .name(target)
            .unwrap_or_else(|| target.to_string());
        notifier.notify(
            requester,
            Notice::NowOwner {
                name: target_name.clone(),
            },
        );
        info!(island = %island_id, from = %requester, to = %target, "island_leadership_transferred");

        self.enter(TransferPhase::Reconciling);
        let mut range_reset_from_zero = false;
        let range = match players.online_grants(target) {
            None => RangeReconciliation::TargetOffline,
            Some(grants) => {
                notifier.notify(target, Notice::YouAreNowOwner);
                match worlds.namespace_of(island.world()) {
                    Some(settings) => {
                        if island.protection_range() == 0 {
                            warn!(
                                island = %island_id,
                                default_range = settings.default_protection_range,
                                "island_protection_range_zero_reset_to_default"
                            );
                            island.set_protection_range(settings.default_protection_range);
                            range_reset_from_zero = true;
                        }
                        reconcile_range(island, settings, &target_name, &grants)
                    }
                    None => {
                        warn!(island = %island_id, world = %island.world(), "transfer_island_world_unregistered");
                        RangeReconciliation::NoMatchingGrant
                    }
                }
            }
        };
        if let RangeReconciliation::Updated { to, .. } = range {
            notifier.notify(requester, Notice::RangeUpdated { range: to });
            notifier.notify(target, Notice::RangeUpdated { range: to });
        }

        if let Err(save_error) = persistence.request_save(island) {
            error!(island = %island_id, error = %save_error, "island_save_failed_after_transfer");
        }

        Ok(TransferOutcome {
            island: island_id,
            previous_owner: requester,
            new_owner: target,
            range_reset_from_zero,
            range,
        })
    }

    fn enter(&mut self, phase: TransferPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "transfer_phase");
            self.phase = phase;
        }
    }
}

/// Overwrites the range with the owner's granted bound, using the current
/// range as the baseline. Without a matching grant the range is kept.
fn reconcile_range(
    island: &mut Island,
    settings: &NamespaceSettings,
    owner_name: &str,
    grants: &GrantSet,
) -> RangeReconciliation {
    let from = island.protection_range();
    let resolution = resolve_bound_detailed(
        owner_name,
        grants,
        &settings.capability(RANGE_CAPABILITY),
        from,
    );
    if !resolution.matched {
        return RangeReconciliation::NoMatchingGrant;
    }
    let to = resolution.even_value();
    island.set_protection_range(to);
    if from == to {
        return RangeReconciliation::Unchanged { range: to };
    }
    info!(
        island = %island.id(),
        owner = %island.owner(),
        from,
        to,
        "island_protection_range_changed_by_capability"
    );
    RangeReconciliation::Updated { from, to }
}

fn validate(
    islands: &IslandRegistry,
    players: &dyn PlayerDirectory,
    requester: PlayerId,
    target_arg: &str,
) -> Result<(IslandId, PlayerId), TransferError> {
    let island = islands
        .island_of(requester)
        .filter(|island| island.owner() == requester)
        .ok_or(TransferError::NotLeader)?;
    if !(island.is_member(requester) && island.has_team()) {
        return Err(TransferError::NotInTeam);
    }
    let target = players
        .resolve(target_arg)
        .ok_or_else(|| TransferError::UnknownTarget {
            name: target_arg.to_string(),
        })?;
    if target == requester {
        return Err(TransferError::SelfTransfer);
    }
    if !island.is_member(target) {
        return Err(TransferError::TargetNotInTeam);
    }
    Ok((island.id(), target))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::location::Location;
    use crate::persistence::PersistenceError;
    use crate::world::{test_namespace, WorldId};

    const A: PlayerId = PlayerId(1);
    const B: PlayerId = PlayerId(2);
    const C: PlayerId = PlayerId(3);

    #[derive(Default)]
    struct Players {
        names: HashMap<PlayerId, String>,
        online: HashMap<PlayerId, GrantSet>,
    }

    impl Players {
        fn known(mut self, id: PlayerId, name: &str) -> Self {
            self.names.insert(id, name.to_string());
            self
        }

        fn online(mut self, id: PlayerId, grants: &[&str]) -> Self {
            self.online.insert(id, grants.iter().copied().collect());
            self
        }
    }

    impl PlayerDirectory for Players {
        fn resolve(&self, name_or_id: &str) -> Option<PlayerId> {
            self.names
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(name_or_id))
                .map(|(id, _)| *id)
        }

        fn name(&self, player: PlayerId) -> Option<String> {
            self.names.get(&player).cloned()
        }

        fn online_grants(&self, player: PlayerId) -> Option<GrantSet> {
            self.online.get(&player).cloned()
        }
    }

    #[derive(Default)]
    struct Inbox(Vec<(PlayerId, Notice)>);

    impl Notifier for Inbox {
        fn notify(&mut self, recipient: PlayerId, notice: Notice) {
            self.0.push((recipient, notice));
        }
    }

    #[derive(Default)]
    struct Saves(Vec<IslandId>);

    impl IslandPersistence for Saves {
        fn request_save(&mut self, island: &Island) -> Result<(), PersistenceError> {
            self.0.push(island.id());
            Ok(())
        }
    }

    struct Veto {
        seen: Rc<RefCell<Vec<(IslandId, PlayerId, TeamReason)>>>,
        verdict: Verdict,
    }

    impl TransferObserver for Veto {
        fn on_leadership_change(&mut self, event: &LeadershipChangeEvent<'_>) -> Verdict {
            self.seen
                .borrow_mut()
                .push((event.island.id(), event.involved, event.reason));
            self.verdict
        }
    }

    struct Fixture {
        islands: IslandRegistry,
        worlds: WorldRegistry,
        island: IslandId,
        inbox: Inbox,
        saves: Saves,
    }

    impl Fixture {
        fn new(protection_range: u32, members: &[PlayerId]) -> Self {
            let settings = test_namespace("bskyblock", PathBuf::from("data"));
            let mut worlds = WorldRegistry::new();
            worlds.register(settings).expect("register");
            let mut islands = IslandRegistry::new();
            let world = WorldId::new("bskyblock_world");
            islands
                .restore(Island::new(
                    IslandId(0),
                    world.clone(),
                    Location::new(world, 0.0, 120.0, 0.0),
                    A,
                    protection_range,
                ))
                .expect("restore");
            for member in members {
                islands.add_member(IslandId(0), *member).expect("member");
            }
            Self {
                islands,
                worlds,
                island: IslandId(0),
                inbox: Inbox::default(),
                saves: Saves::default(),
            }
        }

        fn transfer(
            &mut self,
            coordinator: &mut OwnershipTransferCoordinator,
            players: &Players,
            requester: PlayerId,
            target: &str,
        ) -> Result<TransferOutcome, TransferError> {
            coordinator.transfer(
                TransferContext {
                    islands: &mut self.islands,
                    worlds: &self.worlds,
                    players,
                    notifier: &mut self.inbox,
                    persistence: &mut self.saves,
                },
                requester,
                target,
            )
        }

        fn island(&self) -> &Island {
            self.islands.get(self.island).expect("island")
        }
    }

    fn players() -> Players {
        Players::default()
            .known(A, "alice")
            .known(B, "bob")
            .known(C, "carol")
    }

    #[test]
    fn zero_range_is_reset_then_raised_by_grant() {
        let mut fixture = Fixture::new(0, &[B]);
        let players = players().online(B, &["bskyblock.island.range.100"]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let outcome = fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect("transfer");

        assert_eq!(fixture.island().owner(), B);
        assert_eq!(fixture.island().protection_range(), 100);
        assert!(outcome.range_reset_from_zero);
        assert_eq!(outcome.range, RangeReconciliation::Updated { from: 80, to: 100 });
        assert_eq!(fixture.saves.0, vec![IslandId(0)]);
        assert_eq!(coordinator.phase(), TransferPhase::Idle);
        assert!(fixture
            .inbox
            .0
            .contains(&(A, Notice::RangeUpdated { range: 100 })));
        assert!(fixture
            .inbox
            .0
            .contains(&(B, Notice::RangeUpdated { range: 100 })));
    }

    #[test]
    fn target_without_range_grants_keeps_range() {
        let mut fixture = Fixture::new(120, &[B]);
        let players = players().online(B, &["bskyblock.island.maxhomes.5"]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let outcome = fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect("transfer");

        assert_eq!(fixture.island().owner(), B);
        assert_eq!(fixture.island().protection_range(), 120);
        assert_eq!(outcome.range, RangeReconciliation::NoMatchingGrant);
    }

    #[test]
    fn odd_granted_range_is_rounded_down() {
        let mut fixture = Fixture::new(80, &[B]);
        let players = players().online(B, &["bskyblock.island.range.151"]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect("transfer");
        assert_eq!(fixture.island().protection_range(), 150);
    }

    #[test]
    fn invalid_grant_does_not_block_reconciliation() {
        let mut fixture = Fixture::new(80, &[B]);
        let players = players().online(
            B,
            &["bskyblock.island.range.abc", "bskyblock.island.range.90"],
        );
        let mut coordinator = OwnershipTransferCoordinator::new();

        let outcome = fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect("transfer");
        assert_eq!(outcome.range, RangeReconciliation::Updated { from: 80, to: 90 });
    }

    #[test]
    fn offline_target_gets_ownership_without_range_change() {
        let mut fixture = Fixture::new(0, &[B]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let outcome = fixture
            .transfer(&mut coordinator, &players(), A, "bob")
            .expect("transfer");

        assert_eq!(fixture.island().owner(), B);
        assert_eq!(fixture.island().protection_range(), 0);
        assert_eq!(outcome.range, RangeReconciliation::TargetOffline);
        assert!(!fixture.inbox.0.iter().any(|(to, _)| *to == B));
        assert_eq!(fixture.saves.0.len(), 1);
    }

    #[test]
    fn self_transfer_always_fails_and_keeps_owner() {
        for range in [0, 80, 151] {
            let mut fixture = Fixture::new(range, &[B]);
            let mut coordinator = OwnershipTransferCoordinator::new();
            let error = fixture
                .transfer(&mut coordinator, &players(), A, "alice")
                .expect_err("self");
            assert_eq!(error, TransferError::SelfTransfer);
            assert_eq!(fixture.island().owner(), A);
            assert_eq!(fixture.island().protection_range(), range);
            assert!(fixture.saves.0.is_empty());
        }
    }

    #[test]
    fn not_leader_is_reported_before_unknown_target() {
        let mut fixture = Fixture::new(80, &[B]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let error = fixture
            .transfer(&mut coordinator, &players(), B, "nobody")
            .expect_err("not leader");
        assert_eq!(error, TransferError::NotLeader);
        assert_eq!(
            fixture.inbox.0,
            vec![(B, Notice::TransferFailed(TransferError::NotLeader))]
        );
    }

    #[test]
    fn solo_owner_is_not_in_team() {
        let mut fixture = Fixture::new(80, &[]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let error = fixture
            .transfer(&mut coordinator, &players(), A, "nobody")
            .expect_err("not in team");
        assert_eq!(error, TransferError::NotInTeam);
    }

    #[test]
    fn unknown_target_is_reported_by_name() {
        let mut fixture = Fixture::new(80, &[B]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let error = fixture
            .transfer(&mut coordinator, &players(), A, "dave")
            .expect_err("unknown");
        assert_eq!(
            error,
            TransferError::UnknownTarget {
                name: "dave".to_string()
            }
        );
    }

    #[test]
    fn target_outside_team_is_rejected() {
        let mut fixture = Fixture::new(80, &[B]);
        let mut coordinator = OwnershipTransferCoordinator::new();

        let error = fixture
            .transfer(&mut coordinator, &players(), A, "carol")
            .expect_err("not in team");
        assert_eq!(error, TransferError::TargetNotInTeam);
        assert_eq!(fixture.island().owner(), A);
    }

    #[test]
    fn veto_aborts_without_mutation_or_save() {
        let mut fixture = Fixture::new(0, &[B]);
        let players = players().online(B, &["bskyblock.island.range.100"]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut coordinator = OwnershipTransferCoordinator::new();
        coordinator.add_observer(Box::new(Veto {
            seen: Rc::clone(&seen),
            verdict: Verdict::Reject,
        }));

        let error = fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect_err("vetoed");

        assert_eq!(error, TransferError::Cancelled);
        assert_eq!(fixture.island().owner(), A);
        assert_eq!(fixture.island().protection_range(), 0);
        assert!(fixture.saves.0.is_empty());
        assert!(fixture.inbox.0.is_empty());
        assert_eq!(
            seen.borrow().as_slice(),
            &[(IslandId(0), B, TeamReason::MakeLeader)]
        );
    }

    #[test]
    fn accepting_observer_lets_transfer_commit() {
        let mut fixture = Fixture::new(80, &[B]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut coordinator = OwnershipTransferCoordinator::new();
        coordinator.add_observer(Box::new(Veto {
            seen: Rc::clone(&seen),
            verdict: Verdict::Accept,
        }));

        fixture
            .transfer(&mut coordinator, &players(), A, "bob")
            .expect("transfer");
        assert_eq!(fixture.island().owner(), B);
        assert_eq!(seen.borrow().len(), 1);
    }

    // The wildcard stops the grant scan without raising the bound; the
    // range is re-applied (even-rounded) rather than left untouched.
    #[test]
    fn wildcard_grant_counts_as_match_but_does_not_raise() {
        let mut fixture = Fixture::new(80, &[B]);
        let players = players().online(
            B,
            &["bskyblock.island.range.*", "bskyblock.island.range.400"],
        );
        let mut coordinator = OwnershipTransferCoordinator::new();

        let outcome = fixture
            .transfer(&mut coordinator, &players, A, "bob")
            .expect("transfer");
        assert_eq!(outcome.range, RangeReconciliation::Unchanged { range: 80 });
    }
}
