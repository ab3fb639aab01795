//! Per-client FIFO queues.
//!
//! Outbound commands wait here until the client polls `/cmd`; inbound input
//! tokens wait until an extension polls them through the facade. Draining
//! swaps the whole queue out under its shard lock, so a push racing a drain
//! lands either in the drained batch or in the next one, never nowhere.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct QueueMultiplexer {
    commands: DashMap<String, VecDeque<String>>,
    inputs: DashMap<String, VecDeque<String>>,
}

impl QueueMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_command(&self, steam_id: &str, payload: impl Into<String>) {
        self.commands
            .entry(steam_id.to_string())
            .or_default()
            .push_back(payload.into());
    }

    /// Take every queued command for a client, oldest first.
    pub fn drain_commands(&self, steam_id: &str) -> Vec<String> {
        drain(&self.commands, steam_id)
    }

    pub fn pending_commands(&self, steam_id: &str) -> usize {
        self.commands.get(steam_id).map_or(0, |queue| queue.len())
    }

    /// Queue an inbound input token. Empty tokens are dropped.
    pub fn push_input(&self, steam_id: &str, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        self.inputs
            .entry(steam_id.to_string())
            .or_default()
            .push_back(token);
    }

    /// Take every queued input token for a client, oldest first.
    pub fn poll_inputs(&self, steam_id: &str) -> Vec<String> {
        drain(&self.inputs, steam_id)
    }

    /// Drop both queues for a client.
    pub fn remove(&self, steam_id: &str) {
        self.commands.remove(steam_id);
        self.inputs.remove(steam_id);
    }
}

fn drain(map: &DashMap<String, VecDeque<String>>, steam_id: &str) -> Vec<String> {
    map.get_mut(steam_id)
        .map(|mut queue| std::mem::take(&mut *queue).into())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct CommandBatch<'a> {
    commands: &'a [String],
}

/// Encode a poll response: `{"commands":[...]}` with every payload carried
/// as a JSON string.
pub fn encode_command_batch(commands: &[String]) -> String {
    serde_json::to_string(&CommandBatch { commands })
        .unwrap_or_else(|_| String::from("{\"commands\":[]}"))
}
