use pumpin_extension_api::{export_extensions, Extension, ExtensionError, ServerApi};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Sample Extension 1: Greeter
// ============================================================================

/// Welcomes connected players and keeps a visit log in its data directory.
///
/// Console: `greet` logs every connected client; `greet <steamID> <text>`
/// spawns a floating sign with `<text>` above that player.
pub struct GreeterExtension {
    api: Option<Arc<dyn ServerApi>>,
    visits: Option<PathBuf>,
    greeted: u32,
}

impl GreeterExtension {
    pub fn new() -> Self {
        Self {
            api: None,
            visits: None,
            greeted: 0,
        }
    }

    fn greet_all(&mut self, api: &dyn ServerApi) {
        let clients = api.active_clients();
        if clients.is_empty() {
            api.log("👋 Nobody to greet yet");
            return;
        }
        for client in clients {
            self.greeted += 1;
            api.log(&format!("👋 Welcome, {} ({})", client.display_name, client.steam_id));
        }
        if let Some(visits) = &self.visits {
            let line = format!("{} greeted={}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), self.greeted);
            let appended = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(visits)
                .and_then(|mut file| std::io::Write::write_all(&mut file, line.as_bytes()));
            if let Err(e) = appended {
                api.log(&format!("⚠️ Could not record visit in {}: {}", visits.display(), e));
            }
        }
    }

    fn sign_command(api: &dyn ServerApi, steam_id: &str, text: &str) -> Option<String> {
        let [x, y, z] = api.position(steam_id)?;
        Some(
            serde_json::json!({
                "cmd": "create",
                "src": "Sign",
                "x": x,
                "y": y + 2.5,
                "z": z,
                "rx": 0.0,
                "ry": 0.0,
                "rz": 0.0,
                "rename": text,
            })
            .to_string(),
        )
    }
}

impl Default for GreeterExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for GreeterExtension {
    fn on_enable(&mut self, api: Arc<dyn ServerApi>, data_dir: &Path) -> Result<(), ExtensionError> {
        api.log("👋 GreeterExtension: Ready to welcome players!");
        self.visits = Some(data_dir.join("visits.log"));
        self.api = Some(api);
        Ok(())
    }

    fn on_disable(&mut self) -> Result<(), ExtensionError> {
        if let Some(api) = self.api.take() {
            api.log(&format!("👋 GreeterExtension: Greeted {} player(s). Goodbye!", self.greeted));
        }
        Ok(())
    }

    fn on_console_input(&mut self, line: &str) -> Result<bool, ExtensionError> {
        let mut tokens = line.split_whitespace();
        if !tokens.next().is_some_and(|verb| verb.eq_ignore_ascii_case("greet")) {
            return Ok(false);
        }
        let api = self
            .api
            .clone()
            .ok_or_else(|| ExtensionError::Hook("greeter used before enable".into()))?;

        match tokens.next() {
            None => self.greet_all(api.as_ref()),
            Some(steam_id) => {
                let text = tokens.collect::<Vec<_>>().join("_");
                let text = if text.is_empty() { "Welcome".to_string() } else { text };
                match Self::sign_command(api.as_ref(), steam_id, &text) {
                    Some(command) => api.enqueue_command(steam_id, &command),
                    None => api.log(&format!("No position known for SteamID={steam_id}")),
                }
            }
        }
        Ok(true)
    }
}

// ============================================================================
// Sample Extension 2: Input echo
// ============================================================================

/// Drains a player's queued inputs on demand and mirrors pause state.
///
/// Console: `inputs <steamID>`.
pub struct InputEchoExtension {
    api: Option<Arc<dyn ServerApi>>,
    warnings_seen: u64,
}

impl InputEchoExtension {
    pub fn new() -> Self {
        Self {
            api: None,
            warnings_seen: 0,
        }
    }
}

impl Default for InputEchoExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for InputEchoExtension {
    fn on_enable(&mut self, api: Arc<dyn ServerApi>, _data_dir: &Path) -> Result<(), ExtensionError> {
        // Sign spawns are acknowledged on every poll; keep them out of the log.
        api.suppress_ack_log("Sign");
        self.api = Some(api);
        Ok(())
    }

    fn on_disable(&mut self) -> Result<(), ExtensionError> {
        if let Some(api) = self.api.take() {
            api.log(&format!("🎮 InputEchoExtension: {} warning(s) seen this session", self.warnings_seen));
        }
        Ok(())
    }

    fn on_console_input(&mut self, line: &str) -> Result<bool, ExtensionError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [verb, steam_id] = tokens.as_slice() else {
            return Ok(false);
        };
        if !verb.eq_ignore_ascii_case("inputs") {
            return Ok(false);
        }
        let Some(api) = &self.api else {
            return Ok(false);
        };

        let inputs = api.poll_inputs(steam_id);
        let state = match (api.is_running(steam_id), api.is_paused(steam_id)) {
            (_, true) => "paused",
            (true, false) => "running",
            (false, false) => "idle",
        };
        api.log(&format!(
            "🎮 SteamID={} [{}] inputs: {}",
            steam_id,
            state,
            if inputs.is_empty() { "(none)".to_string() } else { inputs.join(", ") }
        ));
        Ok(true)
    }

    fn on_log(&mut self, message: &str) -> Result<(), ExtensionError> {
        if message.contains(" WARN ") {
            self.warnings_seen += 1;
        }
        Ok(())
    }
}

export_extensions!(GreeterExtension, InputEchoExtension);

#[cfg(test)]
mod tests {
    use super::*;
    use pumpin_extension_api::ClientIdentity;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        logs: Mutex<Vec<String>>,
        commands: Mutex<Vec<(String, String)>>,
        suppressed: Mutex<Vec<String>>,
    }

    impl ServerApi for RecordingApi {
        fn log(&self, message: &str) {
            self.logs.lock().unwrap().push(message.to_string());
        }
        fn poll_inputs(&self, _steam_id: &str) -> Vec<String> {
            vec!["Jump".into(), "AXIS:Horizontal:1".into()]
        }
        fn is_paused(&self, _steam_id: &str) -> bool {
            false
        }
        fn is_running(&self, _steam_id: &str) -> bool {
            true
        }
        fn active_clients(&self) -> Vec<ClientIdentity> {
            vec![ClientIdentity::new("127.0.0.1".parse().unwrap(), "765", "Rider")]
        }
        fn enqueue_command(&self, steam_id: &str, payload: &str) {
            self.commands
                .lock()
                .unwrap()
                .push((steam_id.to_string(), payload.to_string()));
        }
        fn suppress_ack_log(&self, label: &str) {
            self.suppressed.lock().unwrap().push(label.to_string());
        }
        fn teleport(&self, _steam_id: &str, _x: f64, _y: f64, _z: f64) {}
        fn objects_json(&self, _steam_id: &str) -> Option<String> {
            None
        }
        fn position(&self, steam_id: &str) -> Option<[f64; 3]> {
            (steam_id == "765").then_some([1.0, 0.0, 2.0])
        }
        fn extensions_root(&self) -> PathBuf {
            PathBuf::from("extensions")
        }
    }

    #[test]
    fn greeter_spawns_signs_and_greets() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(RecordingApi::default());
        let mut greeter = GreeterExtension::new();
        greeter.on_enable(api.clone(), dir.path()).unwrap();

        assert!(!greeter.on_console_input("inputs 765").unwrap());
        assert!(greeter.on_console_input("greet").unwrap());
        assert!(greeter.on_console_input("greet 765 hello there").unwrap());
        assert!(greeter.on_console_input("greet 999").unwrap());

        let commands = api.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        let command: serde_json::Value = serde_json::from_str(&commands[0].1).unwrap();
        assert_eq!(command["rename"], "hello_there");
        assert_eq!(command["y"], 2.5);

        let logs = api.logs.lock().unwrap();
        assert!(logs.iter().any(|l| l.contains("Welcome, Rider (765)")));
        assert!(logs.iter().any(|l| l.contains("No position known for SteamID=999")));
        assert!(dir.path().join("visits.log").is_file());
    }

    #[test]
    fn unwritable_visit_log_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(RecordingApi::default());
        let mut greeter = GreeterExtension::new();
        greeter.on_enable(api.clone(), &dir.path().join("missing")).unwrap();

        assert!(greeter.on_console_input("greet").unwrap());

        let logs = api.logs.lock().unwrap();
        assert!(logs.iter().any(|l| l.contains("Welcome, Rider (765)")));
        assert!(logs.last().unwrap().starts_with("⚠️ Could not record visit in "));
    }

    #[test]
    fn input_echo_drains_inputs() {
        let api = Arc::new(RecordingApi::default());
        let mut echo = InputEchoExtension::new();
        echo.on_enable(api.clone(), Path::new(".")).unwrap();

        assert_eq!(*api.suppressed.lock().unwrap(), vec!["Sign"]);
        assert!(echo.on_console_input("inputs 765").unwrap());
        assert!(!echo.on_console_input("inputs").unwrap());
        assert_eq!(
            api.logs.lock().unwrap().last().unwrap(),
            "🎮 SteamID=765 [running] inputs: Jump, AXIS:Horizontal:1"
        );
    }

    #[test]
    fn discovery_exports_both_providers() {
        assert_eq!(pumpin_extension_api_version(), pumpin_extension_api::EXTENSION_API_VERSION);
        let providers = unsafe { Box::from_raw(pumpin_discover_extensions()) };
        let identities: Vec<&str> = providers.providers.iter().map(|p| p.identity.as_str()).collect();
        assert_eq!(identities, vec!["GreeterExtension", "InputEchoExtension"]);
    }
}
