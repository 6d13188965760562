use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostCommand {
    Help,
    Connect { player: String, grants: Vec<String> },
    Disconnect { player: String },
    Grant { player: String, capability: String },
    Revoke { player: String, capability: String },
    Create {
        player: String,
        namespace: String,
        location: Option<String>,
    },
    AddMember { owner: String, member: String },
    Promote { requester: String, target: String },
    Complete { requester: String, partial: String },
    Paste { player: String },
    Islands { world: Option<String> },
    Blocks { world: String },
    Reload,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandParseError {
    pub(crate) reason: String,
    pub(crate) usage: String,
}

type ParseFn = dyn Fn(&[String]) -> Result<HostCommand, CommandParseError>;

pub(crate) struct CommandSpec {
    name: String,
    aliases: Vec<String>,
    help: String,
    arg_schema: String,
    parse: Box<ParseFn>,
}

impl CommandSpec {
    pub(crate) fn parse(&self, args: &[String]) -> Result<HostCommand, CommandParseError> {
        (self.parse)(args)
    }
}

/// Case-insensitive command table; aliases resolve to the same spec.
pub(crate) struct CommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

impl CommandRegistry {
    pub(crate) fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub(crate) fn with_host_builtins() -> Result<Self, String> {
        let mut registry = Self::new();
        registry.register("help", &[], "List commands", "", parse_help)?;
        registry.register(
            "connect",
            &["join"],
            "Bring a player online, creating them if unknown",
            "<player> [capability...]",
            parse_connect,
        )?;
        registry.register(
            "disconnect",
            &["quit"],
            "Take a player offline",
            "<player>",
            parse_disconnect,
        )?;
        registry.register(
            "grant",
            &[],
            "Give a player a capability",
            "<player> <capability>",
            parse_grant,
        )?;
        registry.register(
            "revoke",
            &[],
            "Remove a capability from a player",
            "<player> <capability>",
            parse_revoke,
        )?;
        registry.register(
            "create",
            &[],
            "Create an island and paste its templates",
            "<player> <namespace> [world:x:y:z:yaw:pitch]",
            parse_create,
        )?;
        registry.register(
            "add",
            &["invite"],
            "Add a player to an owner's team",
            "<owner> <member>",
            parse_add_member,
        )?;
        registry.register(
            "promote",
            &["makeleader"],
            "Hand island leadership to a team member",
            "<requester> <target>",
            parse_promote,
        )?;
        registry.register(
            "complete",
            &[],
            "Tab-complete the promote target",
            "<requester> [partial]",
            parse_complete,
        )?;
        registry.register(
            "paste",
            &[],
            "Paste the templates for a player's island again",
            "<player>",
            parse_paste,
        )?;
        registry.register(
            "islands",
            &[],
            "List islands, optionally for one world",
            "[world]",
            parse_islands,
        )?;
        registry.register(
            "blocks",
            &[],
            "Count placed blocks in a world by type",
            "<world>",
            parse_blocks,
        )?;
        registry.register("reload", &[], "Reload every template", "", parse_reload)?;
        registry.register("exit", &[], "Stop the host", "", parse_exit)?;
        Ok(registry)
    }

    pub(crate) fn register<F>(
        &mut self,
        name: impl Into<String>,
        aliases: &[&str],
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: F,
    ) -> Result<(), String>
    where
        F: Fn(&[String]) -> Result<HostCommand, CommandParseError> + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("command name cannot be empty".to_string());
        }
        let keys = std::iter::once(name.as_str())
            .chain(aliases.iter().copied())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();
        if let Some(taken) = keys
            .iter()
            .find(|key| self.lookup_by_lower_name.contains_key(*key))
        {
            return Err(format!("duplicate command registration: {taken}"));
        }

        let index = self.specs.len();
        self.specs.push(CommandSpec {
            name,
            aliases: aliases.iter().map(ToString::to_string).collect(),
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse: Box::new(parse),
        });
        for key in keys {
            self.lookup_by_lower_name.insert(key, index);
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let index = self
            .lookup_by_lower_name
            .get(&input_name.to_ascii_lowercase())?;
        self.specs.get(*index)
    }

    /// Help lines in registration order.
    pub(crate) fn help_lines(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|spec| {
                let mut line = spec.name.clone();
                if !spec.arg_schema.is_empty() {
                    line.push(' ');
                    line.push_str(&spec.arg_schema);
                }
                line.push_str(" - ");
                line.push_str(&spec.help);
                if !spec.aliases.is_empty() {
                    line.push_str(&format!(" (alias: {})", spec.aliases.join(", ")));
                }
                line
            })
            .collect()
    }
}

pub(crate) fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut token_open = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                token_open = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if token_open {
                    tokens.push(std::mem::take(&mut current));
                    token_open = false;
                }
            }
            _ => {
                current.push(ch);
                token_open = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if token_open {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_help(args: &[String]) -> Result<HostCommand, CommandParseError> {
    require_no_args(args, "help")?;
    Ok(HostCommand::Help)
}

fn parse_connect(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let (player, grants) = args.split_first().ok_or_else(|| CommandParseError {
        reason: "missing required argument <player>".to_string(),
        usage: "connect <player> [capability...]".to_string(),
    })?;
    Ok(HostCommand::Connect {
        player: player.clone(),
        grants: grants.to_vec(),
    })
}

fn parse_disconnect(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [player] = exact_args::<1>(args, "disconnect <player>")?;
    Ok(HostCommand::Disconnect { player })
}

fn parse_grant(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [player, capability] = exact_args::<2>(args, "grant <player> <capability>")?;
    Ok(HostCommand::Grant { player, capability })
}

fn parse_revoke(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [player, capability] = exact_args::<2>(args, "revoke <player> <capability>")?;
    Ok(HostCommand::Revoke { player, capability })
}

fn parse_create(args: &[String]) -> Result<HostCommand, CommandParseError> {
    match args {
        [player, namespace] => Ok(HostCommand::Create {
            player: player.clone(),
            namespace: namespace.clone(),
            location: None,
        }),
        [player, namespace, location] => Ok(HostCommand::Create {
            player: player.clone(),
            namespace: namespace.clone(),
            location: Some(location.clone()),
        }),
        _ => Err(CommandParseError {
            reason: "expected <player> <namespace> [location]".to_string(),
            usage: "create <player> <namespace> [location]".to_string(),
        }),
    }
}

fn parse_add_member(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [owner, member] = exact_args::<2>(args, "add <owner> <member>")?;
    Ok(HostCommand::AddMember { owner, member })
}

fn parse_promote(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [requester, target] = exact_args::<2>(args, "promote <requester> <target>")?;
    Ok(HostCommand::Promote { requester, target })
}

fn parse_complete(args: &[String]) -> Result<HostCommand, CommandParseError> {
    match args {
        [requester] => Ok(HostCommand::Complete {
            requester: requester.clone(),
            partial: String::new(),
        }),
        [requester, partial] => Ok(HostCommand::Complete {
            requester: requester.clone(),
            partial: partial.clone(),
        }),
        _ => Err(CommandParseError {
            reason: "expected <requester> [partial]".to_string(),
            usage: "complete <requester> [partial]".to_string(),
        }),
    }
}

fn parse_paste(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [player] = exact_args::<1>(args, "paste <player>")?;
    Ok(HostCommand::Paste { player })
}

fn parse_islands(args: &[String]) -> Result<HostCommand, CommandParseError> {
    match args {
        [] => Ok(HostCommand::Islands { world: None }),
        [world] => Ok(HostCommand::Islands {
            world: Some(world.clone()),
        }),
        _ => Err(CommandParseError {
            reason: "unexpected extra arguments".to_string(),
            usage: "islands [world]".to_string(),
        }),
    }
}

fn parse_blocks(args: &[String]) -> Result<HostCommand, CommandParseError> {
    let [world] = exact_args::<1>(args, "blocks <world>")?;
    Ok(HostCommand::Blocks { world })
}

fn parse_reload(args: &[String]) -> Result<HostCommand, CommandParseError> {
    require_no_args(args, "reload")?;
    Ok(HostCommand::Reload)
}

fn parse_exit(args: &[String]) -> Result<HostCommand, CommandParseError> {
    require_no_args(args, "exit")?;
    Ok(HostCommand::Exit)
}

fn exact_args<const N: usize>(
    args: &[String],
    usage: &str,
) -> Result<[String; N], CommandParseError> {
    <[String; N]>::try_from(args.to_vec()).map_err(|_| CommandParseError {
        reason: format!("expected exactly {N} argument(s), got {}", args.len()),
        usage: usage.to_string(),
    })
}

fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError {
            reason: "unexpected extra arguments".to_string(),
            usage: usage.to_string(),
        })
    }
}
