mod block_world;
mod bootstrap;
mod commands;
mod host;
mod players;
mod shell;

pub(crate) use bootstrap::build_app;
pub(crate) use shell::run;
