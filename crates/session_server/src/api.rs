//! Capability facade handed to extensions.

use crate::context::ServerContext;
use pumpin_extension_api::{ClientIdentity, ServerApi};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// [`ServerApi`] backed by the live [`ServerContext`].
#[derive(Debug, Clone)]
pub struct CoreServerApi {
    context: Arc<ServerContext>,
}

impl CoreServerApi {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

impl ServerApi for CoreServerApi {
    fn log(&self, message: &str) {
        info!("[EXT] {}", message);
    }

    fn poll_inputs(&self, steam_id: &str) -> Vec<String> {
        self.context.queues.poll_inputs(steam_id)
    }

    fn is_paused(&self, steam_id: &str) -> bool {
        self.context.sessions.is_paused(steam_id)
    }

    fn is_running(&self, steam_id: &str) -> bool {
        self.context.sessions.is_running(steam_id)
    }

    fn active_clients(&self) -> Vec<ClientIdentity> {
        self.context.sessions.active_clients()
    }

    fn enqueue_command(&self, steam_id: &str, payload: &str) {
        self.context.queues.enqueue_command(steam_id, payload);
    }

    fn suppress_ack_log(&self, label: &str) {
        self.context.sessions.suppress_ack(label);
    }

    fn teleport(&self, steam_id: &str, x: f64, y: f64, z: f64) {
        if let Err(e) = self.context.teleport(steam_id, x, y, z) {
            warn!("Teleport for SteamID={} failed: {}", steam_id, e);
        }
    }

    fn objects_json(&self, steam_id: &str) -> Option<String> {
        self.context.sessions.player(steam_id)?.objects
    }

    fn position(&self, steam_id: &str) -> Option<[f64; 3]> {
        self.context
            .sessions
            .player(steam_id)?
            .position
            .map(|p| p.to_array())
    }

    fn extensions_root(&self) -> PathBuf {
        self.context.extensions_dir().to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ClientEvent;
    use crate::config::ServerConfig;
    use std::time::Instant;

    #[test]
    fn facade_reads_and_writes_through_the_context() {
        let context = Arc::new(ServerContext::new(&ServerConfig::default()));
        let api: Arc<dyn ServerApi> = Arc::new(CoreServerApi::new(context.clone()));
        let id = ClientIdentity::new("127.0.0.1".parse().unwrap(), "9", "Rider");

        context.record_event(
            &id,
            &ClientEvent::parse(r#"{"event":"pos","x":3,"y":2,"z":1,"rx":0,"ry":0,"rz":0}"#),
            Instant::now(),
        );
        context.record_event(&id, &ClientEvent::parse(r#"{"event":"input","key":"E"}"#), Instant::now());

        assert_eq!(api.position("9"), Some([3.0, 2.0, 1.0]));
        assert_eq!(api.poll_inputs("9"), vec!["E"]);
        assert_eq!(api.active_clients(), vec![id]);
        assert_eq!(api.objects_json("9"), None);
        assert_eq!(api.extensions_root(), PathBuf::from("extensions"));

        api.enqueue_command("9", "{\"cmd\":\"noop\"}");
        api.teleport("9", 1.0, 1.0, 1.0);
        assert_eq!(context.queues.pending_commands("9"), 2);

        api.suppress_ack_log("heartbeat");
        assert!(context.sessions.is_ack_suppressed("heartbeat"));
    }
}
