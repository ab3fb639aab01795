//! Session store.
//!
//! Two maps live here, deliberately keyed differently:
//!
//! * **Sessions** are keyed by the full [`ClientIdentity`]. Presence in this
//!   map is the only signal of "connected" and drives connect/disconnect
//!   logging.
//! * **Player state** is keyed by steam ID alone, so gameplay data survives a
//!   reconnect from a different address or under a different name.
//!
//! Every operation touches a single key. The maps are sharded, so no global
//! lock is ever taken.

use dashmap::{DashMap, DashSet};
use pumpin_extension_api::ClientIdentity;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Substring of an object snapshot that shows the player avatar is live.
pub const RUNNING_MARKER: &str = "\"name\":\"Player_Human\"";

/// A position, rotation or camera offset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?},{:?},{:?}", self.x, self.y, self.z)
    }
}

/// Gameplay state for one steam ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub position: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub camera: Option<Vec3>,
    /// Opaque scene description last reported by the client
    pub objects: Option<String>,
    pub running: bool,
    pub paused: bool,
}

/// Bookkeeping for one connected identity.
#[derive(Debug, Clone, Copy)]
pub struct SessionRecord {
    pub last_seen: Instant,
}

/// A validated pose update. Built only when every numeric field parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseUpdate {
    pub position: Vec3,
    pub rotation: Vec3,
    pub camera: Option<Vec3>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ClientIdentity, SessionRecord>,
    players: DashMap<String, PlayerState>,
    suppressed_acks: DashSet<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh an identity's last-seen time. Returns `true` and logs a
    /// connect line when the identity was not already active.
    pub fn touch(&self, identity: &ClientIdentity, now: Instant) -> bool {
        match self.sessions.entry(identity.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get_mut().last_seen = now;
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(SessionRecord { last_seen: now });
                info!("🔌 Connect from {}", identity);
                true
            }
        }
    }

    /// Remove an identity's session. Logs the disconnect only if the session
    /// was still active, so a session that already timed out is not reported
    /// twice.
    pub fn end_session(&self, identity: &ClientIdentity) -> bool {
        let removed = self.sessions.remove(identity).is_some();
        if removed {
            info!("👋 Disconnect from {}", identity);
        }
        removed
    }

    pub fn remove_player(&self, steam_id: &str) -> Option<PlayerState> {
        self.players.remove(steam_id).map(|(_, state)| state)
    }

    pub fn update_pose(&self, steam_id: &str, pose: PoseUpdate) {
        let mut state = self.players.entry(steam_id.to_string()).or_default();
        state.position = Some(pose.position);
        state.rotation = Some(pose.rotation);
        if pose.camera.is_some() {
            state.camera = pose.camera;
        }
    }

    /// Store an object snapshot. Returns `true` if this snapshot flipped the
    /// running flag on.
    pub fn set_objects(&self, steam_id: &str, snapshot: String) -> bool {
        let mut state = self.players.entry(steam_id.to_string()).or_default();
        let started = !state.running && snapshot.contains(RUNNING_MARKER);
        if started {
            state.running = true;
        }
        state.objects = Some(snapshot);
        started
    }

    /// Set the paused flag. Returns `true` only on an actual transition.
    pub fn set_paused(&self, steam_id: &str, paused: bool) -> bool {
        let mut state = self.players.entry(steam_id.to_string()).or_default();
        let changed = state.paused != paused;
        state.paused = paused;
        changed
    }

    /// Evict every session not seen within `timeout`. Each eviction logs one
    /// timeout line and clears the running flag; the rest of the player's
    /// state is kept.
    pub fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<ClientIdentity> {
        let stale: Vec<ClientIdentity> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for identity in stale {
            // Re-check under the shard lock: a request may have refreshed it.
            let removed = self
                .sessions
                .remove_if(&identity, |_, record| {
                    now.saturating_duration_since(record.last_seen) > timeout
                })
                .is_some();
            if !removed {
                continue;
            }
            info!("⌛ Disconnect (timeout) from {}", identity);
            if let Some(mut state) = self.players.get_mut(&identity.steam_id) {
                state.running = false;
            }
            evicted.push(identity);
        }
        evicted
    }

    pub fn player(&self, steam_id: &str) -> Option<PlayerState> {
        self.players.get(steam_id).map(|state| state.clone())
    }

    pub fn is_connected(&self, identity: &ClientIdentity) -> bool {
        self.sessions.contains_key(identity)
    }

    pub fn active_clients(&self) -> Vec<ClientIdentity> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_paused(&self, steam_id: &str) -> bool {
        self.players.get(steam_id).is_some_and(|state| state.paused)
    }

    pub fn is_running(&self, steam_id: &str) -> bool {
        self.players.get(steam_id).is_some_and(|state| state.running)
    }

    pub fn suppress_ack(&self, label: &str) {
        self.suppressed_acks.insert(label.to_string());
    }

    pub fn is_ack_suppressed(&self, label: &str) -> bool {
        self.suppressed_acks.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(sid: &str) -> ClientIdentity {
        ClientIdentity::new("127.0.0.1".parse().unwrap(), sid, "Rider")
    }

    #[test]
    fn touch_reports_new_sessions_once() {
        let store = SessionStore::new();
        let now = Instant::now();
        assert!(store.touch(&identity("1"), now));
        assert!(!store.touch(&identity("1"), now));

        let moved = ClientIdentity::new("10.0.0.9".parse().unwrap(), "1", "Rider");
        assert!(store.touch(&moved, now));
        assert_eq!(store.active_clients().len(), 2);
    }

    #[test]
    fn stale_sessions_are_evicted_once_and_keep_their_pose() {
        let store = SessionStore::new();
        let start = Instant::now();
        let id = identity("42");
        store.touch(&id, start);
        store.update_pose(
            "42",
            PoseUpdate {
                position: Vec3::new(1.0, 2.0, 3.0),
                rotation: Vec3::new(0.0, 90.0, 0.0),
                camera: None,
            },
        );
        store.set_objects("42", format!("{{{RUNNING_MARKER}}}"));
        store.set_paused("42", true);

        let timeout = Duration::from_secs(10);
        assert!(store.evict_stale(start + Duration::from_secs(5), timeout).is_empty());

        let evicted = store.evict_stale(start + Duration::from_secs(11), timeout);
        assert_eq!(evicted, vec![id.clone()]);
        assert!(store.evict_stale(start + Duration::from_secs(20), timeout).is_empty());
        assert!(!store.is_connected(&id));

        let state = store.player("42").unwrap();
        assert_eq!(state.position, Some(Vec3::new(1.0, 2.0, 3.0)));
        assert!(state.objects.is_some());
        assert!(state.paused);
        assert!(!state.running);

        // The timeout already reported this session.
        assert!(!store.end_session(&id));
    }

    #[test]
    fn running_flag_is_set_once() {
        let store = SessionStore::new();
        assert!(!store.set_objects("7", "[]".into()));
        assert!(store.set_objects("7", format!("[{{{RUNNING_MARKER}}}]")));
        assert!(!store.set_objects("7", format!("[{{{RUNNING_MARKER}}}]")));
        assert!(store.is_running("7"));
    }

    #[test]
    fn camera_is_only_overwritten_when_present() {
        let store = SessionStore::new();
        let pose = |camera| PoseUpdate {
            position: Vec3::default(),
            rotation: Vec3::default(),
            camera,
        };
        store.update_pose("c", pose(Some(Vec3::new(1.0, 0.0, 1.0))));
        store.update_pose("c", pose(None));
        assert_eq!(store.player("c").unwrap().camera, Some(Vec3::new(1.0, 0.0, 1.0)));
    }

    #[test]
    fn pause_reports_transitions_only() {
        let store = SessionStore::new();
        assert!(store.set_paused("p", true));
        assert!(!store.set_paused("p", true));
        assert!(store.set_paused("p", false));
        assert!(!store.is_paused("p"));
    }

    #[test]
    fn vec3_display_keeps_decimal_point() {
        assert_eq!(Vec3::new(1.0, -2.5, 0.0).to_string(), "1.0,-2.5,0.0");
    }
}
