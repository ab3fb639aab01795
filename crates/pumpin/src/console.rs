//! Operator console.
//!
//! Reads one command per line. Extensions see every line first, then the
//! `ext` sub-commands, then the built-in commands below.

use extension_system::ExtensionManager;
use session_server::codec::parse_number;
use session_server::commands::{parse_create, parse_edit};
use session_server::ServerContext;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

const HELP: &[&str] = &[
    "Commands:",
    "  stop",
    "  tp <steamID> <x> <y> <z>",
    "  location <steamID>",
    "  clientsideobject <steamID>",
    "  create <steamID> <src> x y z rx ry rz [color <c>] [rename <name>] [scale sx sy sz] [<Component>:<on|off> ...]",
    "  edit   <steamID> <targetName> [delete] [pos x y z] [rot rx ry rz] [scale sx sy sz] [color <c>] [copytex <src>] [rename <name>] [<Component>:<on|off> ...]",
    "  ext <sub> ...   (see 'ext help')",
];

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Console input error: {0}")]
    Input(#[from] std::io::Error),
}

/// Why the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator typed `stop`
    Stop,
    /// Input reached end of file
    Closed,
}

/// What the caller should do after a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Stop,
}

pub struct Console {
    context: Arc<ServerContext>,
    extensions: Arc<ExtensionManager>,
}

impl Console {
    pub fn new(context: Arc<ServerContext>, extensions: Arc<ExtensionManager>) -> Self {
        Self { context, extensions }
    }

    /// Runs the line loop until `stop` or end of input.
    pub async fn run<R>(&self, input: R) -> Result<ConsoleExit, ConsoleError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if self.handle_line(&line).await == LineOutcome::Stop {
                return Ok(ConsoleExit::Stop);
            }
        }
        Ok(ConsoleExit::Closed)
    }

    pub async fn handle_line(&self, raw: &str) -> LineOutcome {
        let line = raw.trim();
        if line.is_empty() {
            return LineOutcome::Continue;
        }
        if self.extensions.forward_console_input(line) {
            return LineOutcome::Continue;
        }
        if self.extensions.handle_console(line) {
            return LineOutcome::Continue;
        }

        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match verb.to_ascii_lowercase().as_str() {
            "help" | "?" => HELP.iter().for_each(|l| info!("{}", l)),
            "stop" => {
                info!("Stopping server ...");
                return LineOutcome::Stop;
            }
            "tp" => self.teleport(line),
            "location" => self.location(rest).await,
            "clientsideobject" => self.objects(rest).await,
            "create" => self.create(line),
            "edit" => self.edit(line),
            _ => warn!("Unknown command. Type 'help' for a list."),
        }
        LineOutcome::Continue
    }

    fn teleport(&self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [_, steam_id, x, y, z] = tokens.as_slice() else {
            warn!("Usage: tp <steamID> <x> <y> <z>");
            return;
        };
        let (Some(x), Some(y), Some(z)) = (parse_number(x), parse_number(y), parse_number(z)) else {
            warn!("Coordinates must be numbers.");
            return;
        };
        if let Err(e) = self.context.teleport(steam_id, x, y, z) {
            warn!("Teleport failed: {}", e);
        }
    }

    async fn location(&self, steam_id: &str) {
        if steam_id.is_empty() {
            warn!("Usage: location <steamID>");
            return;
        }
        match self.context.location(steam_id).await {
            Some((pos, rot)) => info!("{} → Pos({}) Rot({})", steam_id, pos, rot),
            None => info!("No data cached for SteamID={}", steam_id),
        }
    }

    async fn objects(&self, steam_id: &str) {
        if steam_id.is_empty() {
            warn!("Usage: clientsideobject <steamID>");
            return;
        }
        match self.context.objects_snapshot(steam_id).await {
            Some(objects) => info!("Objects for {} → {}", steam_id, objects),
            None => info!("No object snapshot cached for SteamID={}", steam_id),
        }
    }

    fn create(&self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let payload = parse_create(&tokens)
            .map_err(|e| e.to_string())
            .and_then(|(sid, command)| Ok((sid, command.to_json().map_err(|e| e.to_string())?)));
        self.enqueue(payload);
    }

    fn edit(&self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let payload = parse_edit(&tokens)
            .map_err(|e| e.to_string())
            .and_then(|(sid, command)| Ok((sid, command.to_json().map_err(|e| e.to_string())?)));
        self.enqueue(payload);
    }

    fn enqueue(&self, payload: Result<(String, String), String>) {
        match payload {
            Ok((steam_id, json)) => {
                info!("Queued for SteamID={}: {}", steam_id, json);
                self.context.queues.enqueue_command(&steam_id, json);
            }
            Err(message) => warn!("{}", message),
        }
    }
}
