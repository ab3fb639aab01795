//! The shared server context.
//!
//! One [`ServerContext`] is built by the process entry point and handed by
//! `Arc` to the dispatcher, the timeout sweeper, the capability facade and
//! the operator console. It owns every piece of per-client state; nothing
//! lives in statics.

use crate::codec::{ClientEvent, EventKind};
use crate::commands::EditCommand;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::persistence::{PlayerDataStore, PlayerRecord};
use crate::queues::QueueMultiplexer;
use crate::session::{PoseUpdate, SessionStore, Vec3};
use crate::current_timestamp;
use pumpin_extension_api::ClientIdentity;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the caller still has to do after an event was applied in memory.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// The identity was not active before this event
    pub connected: bool,
    /// A player record to write to durable storage
    pub persist: Option<PlayerRecord>,
}

#[derive(Debug)]
pub struct ServerContext {
    pub sessions: SessionStore,
    pub queues: QueueMultiplexer,
    pub player_data: PlayerDataStore,
    extensions_dir: PathBuf,
}

impl ServerContext {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            sessions: SessionStore::new(),
            queues: QueueMultiplexer::new(),
            player_data: PlayerDataStore::new(&config.player_data_dir),
            extensions_dir: config.extensions_dir.clone(),
        }
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    /// Apply one client event to in-memory state.
    ///
    /// Every kind except `disconnect` refreshes the identity's session; a
    /// `disconnect` ends the session and drops all state for the steam ID.
    pub fn record_event(&self, identity: &ClientIdentity, event: &ClientEvent, now: Instant) -> EventOutcome {
        let steam_id = identity.steam_id.as_str();
        let mut outcome = EventOutcome::default();

        match &event.kind {
            EventKind::Axis => {
                let token = format!("AXIS:{}:{}", event.field("axis"), event.field("val"));
                self.queues.push_input(steam_id, token);
            }
            EventKind::Input => self.queues.push_input(steam_id, event.field("key")),
            EventKind::Pos => match parse_pose(event) {
                Some(pose) => self.sessions.update_pose(steam_id, pose),
                None => debug!("Discarded malformed pose from {}", identity),
            },
            EventKind::Ack => {
                let label = event.field("label");
                if !self.sessions.is_ack_suppressed(&label) {
                    info!(
                        "✅ Confirmed {} → '{}' for SteamID={}",
                        event.field("cmd"),
                        label,
                        steam_id
                    );
                }
            }
            EventKind::Objects => {
                if self.sessions.set_objects(steam_id, event.field("data")) {
                    info!("🏃 Running state from {}", identity);
                }
                outcome.persist = Some(self.player_record(identity));
            }
            EventKind::Pause => {
                let state = event.field("state").to_ascii_lowercase();
                let paused = matches!(state.as_str(), "on" | "true" | "1");
                if self.sessions.set_paused(steam_id, paused) {
                    if paused {
                        info!("⏸️ Pause state from {}", identity);
                    } else {
                        info!("▶️ Resume from {}", identity);
                    }
                }
            }
            EventKind::Disconnect => {
                self.sessions.end_session(identity);
                self.sessions.remove_player(steam_id);
                self.queues.remove(steam_id);
                return outcome;
            }
            EventKind::Other(kind) => debug!("Ignoring unknown event '{}' from {}", kind, identity),
        }

        outcome.connected = self.sessions.touch(identity, now);
        outcome
    }

    /// Apply an event received from `peer` and persist whatever it asks for.
    pub async fn handle_event(&self, peer: IpAddr, event: &ClientEvent) -> EventOutcome {
        let identity = ClientIdentity::new(peer, event.steam_id.clone(), event.player_name.clone());
        let outcome = self.record_event(&identity, event, Instant::now());
        if let Some(record) = &outcome.persist {
            if let Err(e) = self.player_data.write(&identity.steam_id, record).await {
                warn!(
                    "Could not write {}: {}",
                    self.player_data.path_for(&identity.steam_id).display(),
                    e
                );
            }
        }
        outcome
    }

    fn player_record(&self, identity: &ClientIdentity) -> PlayerRecord {
        let state = self.sessions.player(&identity.steam_id).unwrap_or_default();
        PlayerRecord {
            player_name: identity.display_name.clone(),
            last_ip: identity.address.to_string(),
            last_pos: state.position.map(|p| p.to_string()),
            last_rot: state.rotation.map(|r| r.to_string()),
            objects: state.objects,
            updated: current_timestamp(),
        }
    }

    /// Evict sessions idle for longer than `timeout`.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<ClientIdentity> {
        self.sessions.evict_stale(now, timeout)
    }

    /// Queue a teleport of the player avatar to `(x, y, z)`.
    pub fn teleport(&self, steam_id: &str, x: f64, y: f64, z: f64) -> Result<(), ServerError> {
        // Clients move the camera themselves once the avatar lands; the
        // offset is only traced.
        if let Some(state) = self.sessions.player(steam_id) {
            if let (Some(pos), Some(cam)) = (state.position, state.camera) {
                let camera = Vec3::new(x + cam.x - pos.x, y + cam.y - pos.y, z + cam.z - pos.z);
                debug!("Camera for SteamID={} follows to ({})", steam_id, camera);
            }
        }

        let command = EditCommand::teleport(x, y, z).to_json()?;
        self.queues.enqueue_command(steam_id, command);
        info!("📍 Teleported SteamID={} to ({:?},{:?},{:?})", steam_id, x, y, z);
        Ok(())
    }

    /// Live position and rotation, falling back to the persisted record.
    pub async fn location(&self, steam_id: &str) -> Option<(String, String)> {
        let live = self.sessions.player(steam_id);
        if let Some((pos, rot)) = live.as_ref().and_then(|s| s.position.zip(s.rotation)) {
            return Some((pos.to_string(), rot.to_string()));
        }
        let stored = self.stored_fields(steam_id).await?;
        Some((stored.get("lastPos")?.clone(), stored.get("lastRot")?.clone()))
    }

    /// Live object snapshot, falling back to the persisted record.
    pub async fn objects_snapshot(&self, steam_id: &str) -> Option<String> {
        if let Some(objects) = self.sessions.player(steam_id).and_then(|s| s.objects) {
            return Some(objects);
        }
        self.stored_fields(steam_id).await?.remove("objects")
    }

    async fn stored_fields(&self, steam_id: &str) -> Option<std::collections::HashMap<String, String>> {
        match self.player_data.read(steam_id).await {
            Ok(fields) => fields,
            Err(e) => {
                debug!("Could not read player data for SteamID={}: {}", steam_id, e);
                None
            }
        }
    }
}

/// All six pose fields must parse; camera fields are read only when `camx`
/// is present and must then all parse too.
fn parse_pose(event: &ClientEvent) -> Option<PoseUpdate> {
    let triple = |a: &str, b: &str, c: &str| -> Option<Vec3> {
        Some(Vec3::new(event.number(a)?, event.number(b)?, event.number(c)?))
    };
    let position = triple("x", "y", "z")?;
    let rotation = triple("rx", "ry", "rz")?;
    let camera = if event.field("camx").is_empty() {
        None
    } else {
        Some(triple("camx", "camy", "camz")?)
    };
    Some(PoseUpdate {
        position,
        rotation,
        camera,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RUNNING_MARKER;
    use std::sync::{Arc, Mutex};

    fn context(root: &Path) -> ServerContext {
        ServerContext::new(&ServerConfig {
            player_data_dir: root.join("player-data"),
            extensions_dir: root.join("extensions"),
            ..ServerConfig::default()
        })
    }

    fn identity() -> ClientIdentity {
        ClientIdentity::new("10.0.0.2".parse().unwrap(), "765", "Rider")
    }

    fn event(body: &str) -> ClientEvent {
        ClientEvent::parse(body)
    }

    #[test]
    fn pos_objects_disconnect_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        let now = Instant::now();

        let first = ctx.record_event(
            &id,
            &event(r#"{"event":"pos","x":1,"y":2,"z":3,"rx":0,"ry":90,"rz":0}"#),
            now,
        );
        assert!(first.connected);

        let objects = format!(r#"{{"event":"objects","data":[{{{RUNNING_MARKER}}}]}}"#);
        let outcome = ctx.record_event(&id, &event(&objects), now);
        assert!(!outcome.connected);
        assert!(ctx.sessions.is_running("765"));
        let record = outcome.persist.unwrap();
        assert_eq!(record.last_pos.as_deref(), Some("1.0,2.0,3.0"));
        assert_eq!(record.last_ip, "10.0.0.2");

        ctx.record_event(&id, &event(&objects), now);
        ctx.record_event(&id, &event(r#"{"event":"pause","state":"ON"}"#), now);
        assert!(ctx.sessions.is_paused("765"));
        ctx.queues.enqueue_command("765", "{}");

        let gone = ctx.record_event(&id, &event(r#"{"event":"disconnect"}"#), now);
        assert!(!gone.connected);
        assert!(ctx.sessions.player("765").is_none());
        assert!(!ctx.sessions.is_running("765"));
        assert!(!ctx.sessions.is_paused("765"));
        assert!(ctx.sessions.active_clients().is_empty());
        assert!(ctx.queues.drain_commands("765").is_empty());
    }

    #[test]
    fn malformed_pose_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        let now = Instant::now();
        ctx.record_event(&id, &event(r#"{"event":"pos","x":1,"y":1,"z":1,"rx":0,"ry":0,"rz":0}"#), now);
        ctx.record_event(&id, &event(r#"{"event":"pos","x":5,"y":5,"z":5,"rx":0,"ry":"bad","rz":0}"#), now);
        ctx.record_event(
            &id,
            &event(r#"{"event":"pos","x":7,"y":7,"z":7,"rx":0,"ry":0,"rz":0,"camx":1}"#),
            now,
        );
        assert_eq!(ctx.sessions.player("765").unwrap().position, Some(Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn inputs_are_queued_for_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        let now = Instant::now();
        ctx.record_event(&id, &event(r#"{"event":"axis","axis":"Vertical","val":-1}"#), now);
        ctx.record_event(&id, &event(r#"{"event":"input","key":"Space"}"#), now);
        ctx.record_event(&id, &event(r#"{"event":"input"}"#), now);
        assert_eq!(ctx.queues.poll_inputs("765"), vec!["AXIS:Vertical:-1", "Space"]);
    }

    #[test]
    fn teleport_targets_position_with_zero_velocity() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        ctx.record_event(
            &id,
            &event(r#"{"event":"pos","x":0,"y":0,"z":0,"rx":0,"ry":0,"rz":0,"camx":1,"camy":0,"camz":1}"#),
            Instant::now(),
        );

        ctx.teleport("765", 10.0, 0.0, 5.0).unwrap();
        let queued = ctx.queues.drain_commands("765");
        assert_eq!(
            queued,
            vec![r#"{"cmd":"edit","target":"Player_Human","x":10.0,"y":0.0,"z":5.0,"vx":0.0,"vy":0.0,"vz":0.0}"#]
        );
    }

    #[tokio::test]
    async fn location_falls_back_to_persisted_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        ctx.record_event(&id, &event(r#"{"event":"pos","x":4,"y":5,"z":6,"rx":0,"ry":0,"rz":0}"#), Instant::now());
        ctx.handle_event(id.address, &event(r#"{"event":"objects","steamID":"765","playerName":"Rider","data":[]}"#))
            .await;
        ctx.record_event(&id, &event(r#"{"event":"disconnect"}"#), Instant::now());

        assert_eq!(
            ctx.location("765").await,
            Some(("4.0,5.0,6.0".to_string(), "0.0,0.0,0.0".to_string()))
        );
        assert_eq!(ctx.objects_snapshot("765").await.as_deref(), Some("[]"));
        assert_eq!(ctx.location("nobody").await, None);
    }

    #[tokio::test]
    async fn escaped_newlines_in_names_stay_inside_their_field() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let peer = "10.0.0.2".parse().unwrap();
        ctx.handle_event(
            peer,
            &event(r#"{"event":"objects","steamID":"765","playerName":"Evil\nlastPos=9,9,9\nlastRot=1,1,1","data":[]}"#),
        )
        .await;
        ctx.handle_event(peer, &event(r#"{"event":"disconnect","steamID":"765"}"#)).await;

        assert_eq!(ctx.location("765").await, None);
        let stored = ctx.player_data.read("765").await.unwrap().unwrap();
        assert_eq!(stored["playerName"], "Evil\nlastPos=9,9,9\nlastRot=1,1,1");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn suppressed_ack_labels_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let id = identity();
        ctx.sessions.suppress_ack("Sign");

        let output = Captured::default();
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            ctx.record_event(&id, &event(r#"{"event":"ack","cmd":"create","label":"Sign"}"#), Instant::now());
            ctx.record_event(&id, &event(r#"{"event":"ack","cmd":"edit","label":"Crate_2"}"#), Instant::now());
        });

        let logged = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("Confirmed edit → 'Crate_2' for SteamID=765"));
        assert!(!logged.contains("'Sign'"));
        assert!(ctx.sessions.is_connected(&id));
    }
}
