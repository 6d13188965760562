use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use islands::{
    location_to_string, parse_location, prettify_text, same_world, tab_limit, AppPaths, Dimension,
    IslandId, IslandPersistence, IslandRegistry, JsonIslandStore, Location,
    OwnershipTransferCoordinator, PasteCompletion, PastePipeline, PasteRequest, PlayerDirectory,
    PlayerId, RangeReconciliation, TemplateStore, TransferContext, WorldId, WorldRegistry,
};
use tracing::{error, info, warn};

use super::block_world::BlockWorld;
use super::commands::{tokenize_line, CommandRegistry, HostCommand};
use super::players::{render_notice, Outbox, PlayerBook};

/// Height at which new island centers are placed.
const ISLAND_CENTER_Y: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

/// Output lines shared with paste continuations.
#[derive(Debug, Clone, Default)]
pub(crate) struct Console {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Console {
    pub(crate) fn push(&self, line: impl Into<String>) {
        self.lines.borrow_mut().push(line.into());
    }

    pub(crate) fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

pub(crate) struct HostParts {
    pub(crate) paths: AppPaths,
    pub(crate) worlds: WorldRegistry,
    pub(crate) islands: IslandRegistry,
    pub(crate) templates: TemplateStore,
    pub(crate) pipeline: PastePipeline,
    pub(crate) players: PlayerBook,
    pub(crate) store: JsonIslandStore,
    pub(crate) blocks: BlockWorld,
    pub(crate) commands: CommandRegistry,
}

/// Single-threaded owner of all island state. Commands, notices and paste
/// continuations all run here.
pub(crate) struct Host {
    paths: AppPaths,
    worlds: WorldRegistry,
    islands: IslandRegistry,
    templates: TemplateStore,
    pipeline: PastePipeline,
    players: PlayerBook,
    store: JsonIslandStore,
    blocks: BlockWorld,
    commands: CommandRegistry,
    coordinator: OwnershipTransferCoordinator,
    outbox: Outbox,
    console: Console,
}

impl Host {
    pub(crate) fn new(parts: HostParts) -> Self {
        Self {
            paths: parts.paths,
            worlds: parts.worlds,
            islands: parts.islands,
            templates: parts.templates,
            pipeline: parts.pipeline,
            players: parts.players,
            store: parts.store,
            blocks: parts.blocks,
            commands: parts.commands,
            coordinator: OwnershipTransferCoordinator::new(),
            outbox: Outbox::default(),
            console: Console::default(),
        }
    }

    pub(crate) fn drain_output(&self) -> Vec<String> {
        self.console.drain()
    }

    pub(crate) fn execute(&mut self, raw_line: &str) -> Flow {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Flow::Continue;
        }
        let tokens = match tokenize_line(trimmed) {
            Ok(tokens) => tokens,
            Err(reason) => {
                self.console.push(format!("error: {reason}. usage: help"));
                return Flow::Continue;
            }
        };
        let Some((name, args)) = tokens.split_first() else {
            return Flow::Continue;
        };
        let Some(spec) = self.commands.lookup(name) else {
            self.console
                .push(format!("error: unknown command '{name}'. try: help"));
            return Flow::Continue;
        };
        match spec.parse(args) {
            Ok(command) => self.apply(command),
            Err(parse_error) => {
                self.console.push(format!(
                    "error: {}. usage: {}",
                    parse_error.reason, parse_error.usage
                ));
                Flow::Continue
            }
        }
    }

    /// Delivers finished pastes; successful continuations run here.
    pub(crate) fn pump(&mut self) {
        let completions = self.pipeline.pump_completions();
        self.report_completions(completions);
    }

    pub(crate) fn drain_pastes(&mut self, timeout: Duration) {
        let completions = self.pipeline.wait_for_completions(timeout);
        self.report_completions(completions);
    }

    fn report_completions(&self, completions: Vec<PasteCompletion>) {
        for completion in completions {
            if let Err(placement_error) = completion.result {
                self.console.push(format!(
                    "error: paste of {} into {} failed: {placement_error}",
                    completion.island, completion.world
                ));
            }
        }
    }

    fn apply(&mut self, command: HostCommand) -> Flow {
        match command {
            HostCommand::Help => {
                for line in self.commands.help_lines() {
                    self.console.push(line);
                }
            }
            HostCommand::Connect { player, grants } => {
                let id = self.players.connect(&player);
                for grant in &grants {
                    self.players.grant(id, grant);
                }
                self.console.push(format!("{player} is online as {id}"));
            }
            HostCommand::Disconnect { player } => {
                if let Some(id) = self.known_player(&player) {
                    if !self.players.disconnect(id) {
                        self.console.push(format!("{player} is already offline"));
                    }
                }
            }
            HostCommand::Grant { player, capability } => {
                if let Some(id) = self.known_player(&player) {
                    self.players.grant(id, &capability);
                    self.console.push(format!("granted {capability} to {player}"));
                }
            }
            HostCommand::Revoke { player, capability } => {
                if let Some(id) = self.known_player(&player) {
                    if self.players.revoke(id, &capability) {
                        self.console.push(format!("revoked {capability} from {player}"));
                    } else {
                        self.console
                            .push(format!("{player} does not hold {capability}"));
                    }
                }
            }
            HostCommand::Create {
                player,
                namespace,
                location,
            } => self.create_island(&player, &namespace, location.as_deref()),
            HostCommand::AddMember { owner, member } => self.add_member(&owner, &member),
            HostCommand::Promote { requester, target } => self.promote(&requester, &target),
            HostCommand::Complete { requester, partial } => self.complete(&requester, &partial),
            HostCommand::Paste { player } => {
                if let Some(id) = self.known_player(&player) {
                    match self.islands.island_of(id).map(|island| island.id()) {
                        Some(island) if self.pipeline.is_pending(island) => self.console.push(
                            format!("error: {island} is still being pasted; try again shortly"),
                        ),
                        Some(island) => self.paste_island(island),
                        None => self.console.push(format!("{player} has no island")),
                    }
                }
            }
            HostCommand::Islands { world } => self.list_islands(world.as_deref()),
            HostCommand::Blocks { world } => {
                let census = self.blocks.census(&WorldId::new(world.as_str()));
                if census.is_empty() {
                    self.console.push(format!("no blocks placed in {world}"));
                }
                for (kind, count) in census {
                    self.console.push(format!("{} x{count}", prettify_text(&kind)));
                }
            }
            HostCommand::Reload => self.reload_templates(),
            HostCommand::Exit => return Flow::Exit,
        }
        Flow::Continue
    }

    fn known_player(&self, name: &str) -> Option<PlayerId> {
        let id = self.players.resolve(name);
        if id.is_none() {
            self.console.push(format!("error: unknown player: {name}"));
        }
        id
    }

    fn create_island(&mut self, player: &str, namespace: &str, location: Option<&str>) {
        let Some(owner) = self.known_player(player) else {
            return;
        };
        let Some(settings) = self.worlds.namespace(namespace) else {
            self.console
                .push(format!("error: unknown namespace: {namespace}"));
            return;
        };
        let center = match location {
            Some(raw) => match parse_location(raw, &self.worlds) {
                Some(center) if same_world(&center.world, &settings.base_world) => Location {
                    world: settings.base_world.clone(),
                    ..center
                },
                Some(center) => {
                    self.console.push(format!(
                        "error: {} is not a {} world",
                        center.world, settings.friendly_name
                    ));
                    return;
                }
                None => {
                    self.console.push(format!("error: invalid location '{raw}'"));
                    return;
                }
            },
            None => {
                let taken = self
                    .islands
                    .iter()
                    .filter(|island| island.world() == &settings.base_world)
                    .map(|island| island.center().block())
                    .collect::<BTreeSet<_>>();
                let slot_center = |slot: u32| {
                    Location::new(
                        settings.base_world.clone(),
                        f64::from(slot) * f64::from(settings.island_distance),
                        ISLAND_CENTER_Y,
                        0.0,
                    )
                };
                let mut slot = 0;
                while taken.contains(&slot_center(slot).block()) {
                    slot += 1;
                }
                slot_center(slot)
            }
        };

        let grants = self.players.grants(owner);
        let island = match self
            .islands
            .create_island(owner, player, center, settings, &grants)
        {
            Ok(island) => island,
            Err(island_error) => {
                self.console.push(format!("error: {island_error}"));
                return;
            }
        };
        self.save(island);
        if let Some(created) = self.islands.get(island) {
            self.console.push(format!(
                "created {island} for {player} at {} (range {})",
                location_to_string(Some(created.center())),
                created.protection_range()
            ));
        }
        self.paste_island(island);
    }

    fn paste_island(&mut self, id: IslandId) {
        let Some(island) = self.islands.get(id) else {
            return;
        };
        let Some(settings) = self.worlds.namespace_of(island.world()) else {
            warn!(island = %id, world = %island.world(), "paste_island_world_unregistered");
            return;
        };
        let owner_name = self.players.display_name(island.owner());
        let targets = Dimension::ALL
            .into_iter()
            .filter(|dimension| settings.has_island_template(*dimension))
            .map(|dimension| settings.world_for(dimension))
            .collect::<Vec<_>>();

        for world in targets {
            let console = self.console.clone();
            let ready = format!("{owner_name}: {id} is ready in {world}");
            let request = self.pipeline.paste(
                &self.templates,
                &world,
                island,
                Some(Box::new(move || console.push(ready))),
            );
            match request {
                Ok(PasteRequest::Scheduled(_)) => {}
                Ok(PasteRequest::NoTemplate) => self
                    .console
                    .push(format!("no island template loaded for {world}")),
                Err(placement_error) => {
                    error!(island = %id, world = %world, error = %placement_error, "paste_request_failed");
                    self.console
                        .push(format!("error: cannot paste into {world}: {placement_error}"));
                }
            }
        }
    }

    fn add_member(&mut self, owner: &str, member: &str) {
        let (Some(owner_id), Some(member_id)) = (self.known_player(owner), self.known_player(member))
        else {
            return;
        };
        let Some(island) = self
            .islands
            .island_of(owner_id)
            .filter(|island| island.owner() == owner_id)
            .map(|island| island.id())
        else {
            self.console.push(format!("error: {owner} does not own an island"));
            return;
        };
        match self.islands.add_member(island, member_id) {
            Ok(()) => {
                info!(island = %island, member = %member_id, "island_member_added");
                self.save(island);
                self.console.push(format!("{member} joined {owner}'s team"));
            }
            Err(island_error) => self.console.push(format!("error: {island_error}")),
        }
    }

    fn promote(&mut self, requester: &str, target: &str) {
        let Some(requester_id) = self.known_player(requester) else {
            return;
        };
        let result = self.coordinator.transfer(
            TransferContext {
                islands: &mut self.islands,
                worlds: &self.worlds,
                players: &self.players,
                notifier: &mut self.outbox,
                persistence: &mut self.store,
            },
            requester_id,
            target,
        );
        for (recipient, notice) in self.outbox.drain() {
            self.console.push(format!(
                "[{}] {}",
                self.players.display_name(recipient),
                render_notice(&notice)
            ));
        }
        if let Ok(outcome) = result {
            if outcome.range == RangeReconciliation::TargetOffline {
                self.console.push(format!(
                    "{} is offline; range will be checked when they next connect",
                    self.players.display_name(outcome.new_owner)
                ));
            }
        }
    }

    fn complete(&self, requester: &str, partial: &str) {
        let Some(requester_id) = self.known_player(requester) else {
            return;
        };
        let names = self
            .islands
            .island_of(requester_id)
            .map(|island| {
                island
                    .members()
                    .iter()
                    .map(|member| self.players.display_name(*member))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let matches = tab_limit(names, partial);
        self.console.push(if matches.is_empty() {
            "(no completions)".to_string()
        } else {
            matches.join(" ")
        });
    }

    fn list_islands(&self, world: Option<&str>) {
        let filter = world.map(WorldId::new);
        let mut listed = 0;
        for island in self.islands.iter() {
            if let Some(filter) = &filter {
                if !same_world(island.world(), filter) {
                    continue;
                }
            }
            let members = island
                .members()
                .iter()
                .map(|member| self.players.display_name(*member))
                .collect::<Vec<_>>();
            self.console.push(format!(
                "{} owner={} members=[{}] range={} center={}",
                island.id(),
                self.players.display_name(island.owner()),
                members.join(", "),
                island.protection_range(),
                location_to_string(Some(island.center()))
            ));
            listed += 1;
        }
        if listed == 0 {
            self.console.push("no islands");
        }
    }

    fn reload_templates(&mut self) {
        let base_worlds = self
            .worlds
            .namespaces()
            .iter()
            .map(|settings| settings.base_world.clone())
            .collect::<Vec<_>>();
        for world in base_worlds {
            let report = self.templates.load_world_set(&self.worlds, &world);
            self.console.push(format!(
                "{world}: {} template(s) loaded, {} failed",
                report.loaded_count(),
                report.failed_count()
            ));
            for attempt in report.attempts {
                if let Err(load_error) = attempt.result {
                    self.console
                        .push(format!("  {} ({}): {load_error}", attempt.world, attempt.name));
                }
            }
        }
    }

    fn save(&mut self, island: IslandId) {
        let Some(island) = self.islands.get(island) else {
            return;
        };
        if let Err(save_error) = self.store.request_save(island) {
            error!(island = %island.id(), error = %save_error, "island_save_failed");
            self.console.push(format!("error: {save_error}"));
        }
    }

    pub(crate) fn paths(&self) -> &AppPaths {
        &self.paths
    }
}
