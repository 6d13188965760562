use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use islands::{GrantSet, Notice, Notifier, PlayerDirectory, PlayerId};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub(crate) const PLAYERS_FILE_NAME: &str = "players.json";

#[derive(Debug, Error)]
pub(crate) enum PlayerSeedError {
    #[error("failed to read player seed {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse player seed {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PlayerSeed {
    pub(crate) id: u64,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) grants: Vec<String>,
    #[serde(default)]
    pub(crate) online: bool,
}

/// Reads the optional player seed; a missing file seeds nobody.
pub(crate) fn load_player_seed(path: &Path) -> Result<Vec<PlayerSeed>, PlayerSeedError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PlayerSeedError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut deserializer = serde_json::Deserializer::from_str(&raw);
    serde_path_to_error::deserialize::<_, Vec<PlayerSeed>>(&mut deserializer).map_err(|error| {
        PlayerSeedError::Parse {
            path: path.to_path_buf(),
            message: format!("at {}: {}", error.path(), error.inner()),
        }
    })
}

#[derive(Debug, Clone)]
struct PlayerRecord {
    name: String,
    grants: GrantSet,
    online: bool,
}

/// Every identity the host knows, with capability grants and presence.
#[derive(Debug, Default)]
pub(crate) struct PlayerBook {
    players: BTreeMap<PlayerId, PlayerRecord>,
    next_id: u64,
}

impl PlayerBook {
    pub(crate) fn from_seed(seed: Vec<PlayerSeed>) -> Self {
        let mut book = Self::default();
        for entry in seed {
            let id = PlayerId(entry.id);
            book.players.insert(
                id,
                PlayerRecord {
                    name: entry.name,
                    grants: entry.grants.into_iter().collect(),
                    online: entry.online,
                },
            );
            book.next_id = book.next_id.max(entry.id + 1);
        }
        book
    }

    /// Marks `name` online, registering a new identity if needed.
    pub(crate) fn connect(&mut self, name: &str) -> PlayerId {
        let id = match self.resolve(name) {
            Some(id) => id,
            None => {
                let id = PlayerId(self.next_id);
                self.next_id += 1;
                self.players.insert(
                    id,
                    PlayerRecord {
                        name: name.to_string(),
                        grants: GrantSet::new(),
                        online: false,
                    },
                );
                id
            }
        };
        if let Some(record) = self.players.get_mut(&id) {
            if !record.online {
                info!(player = %id, name = %record.name, "player_connected");
            }
            record.online = true;
        }
        id
    }

    pub(crate) fn disconnect(&mut self, player: PlayerId) -> bool {
        match self.players.get_mut(&player) {
            Some(record) if record.online => {
                record.online = false;
                info!(player = %player, name = %record.name, "player_disconnected");
                true
            }
            _ => false,
        }
    }

    pub(crate) fn grant(&mut self, player: PlayerId, capability: &str) -> bool {
        self.players
            .get_mut(&player)
            .is_some_and(|record| record.grants.insert(capability))
    }

    pub(crate) fn revoke(&mut self, player: PlayerId, capability: &str) -> bool {
        self.players
            .get_mut(&player)
            .is_some_and(|record| record.grants.remove(capability))
    }

    pub(crate) fn grants(&self, player: PlayerId) -> GrantSet {
        self.players
            .get(&player)
            .map(|record| record.grants.clone())
            .unwrap_or_default()
    }

    pub(crate) fn display_name(&self, player: PlayerId) -> String {
        self.name(player).unwrap_or_else(|| player.to_string())
    }
}

impl PlayerDirectory for PlayerBook {
    fn resolve(&self, name_or_id: &str) -> Option<PlayerId> {
        if let Some((id, _)) = self
            .players
            .iter()
            .find(|(_, record)| record.name.eq_ignore_ascii_case(name_or_id))
        {
            return Some(*id);
        }
        let id = PlayerId(name_or_id.parse().ok()?);
        self.players.contains_key(&id).then_some(id)
    }

    fn name(&self, player: PlayerId) -> Option<String> {
        self.players.get(&player).map(|record| record.name.clone())
    }

    fn online_grants(&self, player: PlayerId) -> Option<GrantSet> {
        self.players
            .get(&player)
            .filter(|record| record.online)
            .map(|record| record.grants.clone())
    }
}

/// Collects notices during a command; the host renders them afterwards.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    notices: Vec<(PlayerId, Notice)>,
}

impl Outbox {
    pub(crate) fn drain(&mut self) -> Vec<(PlayerId, Notice)> {
        std::mem::take(&mut self.notices)
    }
}

impl Notifier for Outbox {
    fn notify(&mut self, recipient: PlayerId, notice: Notice) {
        self.notices.push((recipient, notice));
    }
}

pub(crate) fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::NowOwner { name } => format!("{name} is now the island owner."),
        Notice::YouAreNowOwner => "You are now the owner of your island.".to_string(),
        Notice::RangeUpdated { range } => {
            format!("Island protection range set to {range}.")
        }
        Notice::TransferFailed(reason) => format!("error: {reason}"),
    }
}
