//! `ext` operator sub-commands.

use crate::manager::ExtensionManager;
use tracing::info;

const USAGE: &str = "Commands: ext list | load <file> | unload <id> | reload <id>";

impl ExtensionManager {
    /// Handle an `ext ...` console line. Returns `true` for every line whose
    /// first word is `ext`, whether or not the sub-command succeeded.
    pub fn handle_console(&self, line: &str) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first() {
            Some(first) if first.eq_ignore_ascii_case("ext") => {}
            _ => return false,
        }

        let Some(sub) = tokens.get(1).map(|s| s.to_ascii_lowercase()) else {
            info!("[EXT] {}", USAGE);
            return true;
        };
        let arg = tokens.get(2).copied();

        match (sub.as_str(), arg) {
            ("help", _) => info!("[EXT] {}", USAGE),
            ("list", _) => {
                let loaded = self.list();
                if loaded.is_empty() {
                    info!("[EXT] No extensions loaded.");
                }
                for (identity, package) in loaded {
                    info!("[EXT] {}  ({})", identity, package);
                }
            }
            ("load", Some(file)) => {
                let _ = self.load(&self.extensions_root().join(file));
            }
            ("unload", Some(key)) => {
                let _ = self.unload(key);
            }
            ("reload", Some(key)) => {
                let _ = self.reload(key);
            }
            ("load", None) => info!("[EXT] load <file>"),
            ("unload", None) => info!("[EXT] unload <id>"),
            ("reload", None) => info!("[EXT] reload <id>"),
            _ => info!("[EXT] Unknown sub-command. Try: ext help"),
        }
        true
    }
}
