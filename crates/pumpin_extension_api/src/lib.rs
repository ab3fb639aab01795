//! # Pumpin Extension API
//!
//! The contract between the session server and dynamically loaded extension
//! packages. An extension package is a native library that exports a small
//! C-compatible discovery surface (see [`export_extensions!`]) and hands the
//! host one or more [`Extension`] implementations.
//!
//! Extensions never own server state. Everything they read or mutate goes
//! through the [`ServerApi`] capability facade they receive in
//! [`Extension::on_enable`].
//!
//! ## Lifecycle
//!
//! 1. The host opens the package and checks [`EXTENSION_API_VERSION`]
//! 2. Every discovered provider is keyed by its identity string
//! 3. `on_enable` runs with the facade and a per-extension data directory
//! 4. Console lines and log lines are broadcast to `on_console_input` / `on_log`
//! 5. `on_disable` runs before the package is released
//!
//! ## Writing an extension
//!
//! ```rust,ignore
//! use pumpin_extension_api::*;
//! use std::{path::Path, sync::Arc};
//!
//! pub struct Watchdog { api: Option<Arc<dyn ServerApi>> }
//!
//! impl Watchdog {
//!     pub fn new() -> Self { Self { api: None } }
//! }
//!
//! impl Extension for Watchdog {
//!     fn on_enable(&mut self, api: Arc<dyn ServerApi>, _dir: &Path) -> Result<(), ExtensionError> {
//!         api.log("watchdog online");
//!         self.api = Some(api);
//!         Ok(())
//!     }
//!
//!     fn on_disable(&mut self) -> Result<(), ExtensionError> {
//!         self.api = None;
//!         Ok(())
//!     }
//! }
//!
//! export_extensions!(Watchdog);
//! ```

use std::fmt;
use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version of the host/extension ABI. Bumped whenever [`Extension`],
/// [`ServerApi`] or [`ExtensionProviders`] change shape.
pub const EXTENSION_API_VERSION: u32 = 1;

/// Symbol a package exports to report the API version it was built against.
pub const API_VERSION_SYMBOL: &[u8] = b"pumpin_extension_api_version";

/// Symbol a package exports to hand over its extension providers.
pub const DISCOVER_SYMBOL: &[u8] = b"pumpin_discover_extensions";

// ============================================================================
// Client identity
// ============================================================================

/// Composite key used for connect/disconnect bookkeeping.
///
/// Two identities are equal only if address, steam ID and display name all
/// match, so the same steam ID reconnecting from a different address counts
/// as a separate logical session. Gameplay state is keyed by steam ID alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub address: IpAddr,
    pub steam_id: String,
    pub display_name: String,
}

impl ClientIdentity {
    pub fn new(address: IpAddr, steam_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address,
            steam_id: steam_id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | Name=\"{}\", SteamID={}",
            self.address, self.display_name, self.steam_id
        )
    }
}

// ============================================================================
// Capability facade
// ============================================================================

/// The only interface extensions may use to touch server state.
///
/// Implementations must be cheap to call from any thread; every method is a
/// single-key read or an append to a per-client queue.
pub trait ServerApi: Send + Sync {
    /// Emit a log line attributed to extensions.
    fn log(&self, message: &str);

    /// Drain and return the queued input tokens for a client.
    fn poll_inputs(&self, steam_id: &str) -> Vec<String>;

    fn is_paused(&self, steam_id: &str) -> bool;

    fn is_running(&self, steam_id: &str) -> bool;

    /// Snapshot of the currently connected client identities.
    fn active_clients(&self) -> Vec<ClientIdentity>;

    /// Append an opaque command payload to a client's outbound queue.
    fn enqueue_command(&self, steam_id: &str, payload: &str);

    /// Stop logging `ack` events that carry this label.
    fn suppress_ack_log(&self, label: &str);

    /// Move the client's player to the given world position with its
    /// velocity zeroed.
    fn teleport(&self, steam_id: &str, x: f64, y: f64, z: f64);

    /// Last object snapshot reported by the client, if any.
    fn objects_json(&self, steam_id: &str) -> Option<String>;

    /// Last reported position, if any.
    fn position(&self, steam_id: &str) -> Option<[f64; 3]>;

    /// Root directory under which every extension gets its data directory.
    fn extensions_root(&self) -> PathBuf;
}

// ============================================================================
// Extension trait
// ============================================================================

/// A loadable unit of server logic.
///
/// Every hook returns a `Result`; the host logs failures and carries on, it
/// never lets one extension's failure affect another.
pub trait Extension: Send {
    /// Called once after discovery, before the extension is registered.
    /// An error here aborts registration of this extension only.
    fn on_enable(&mut self, api: Arc<dyn ServerApi>, data_dir: &Path) -> Result<(), ExtensionError>;

    /// Called once before the package is released.
    fn on_disable(&mut self) -> Result<(), ExtensionError>;

    /// Offered every operator console line. Return `Ok(true)` to consume it.
    fn on_console_input(&mut self, _line: &str) -> Result<bool, ExtensionError> {
        Ok(false)
    }

    /// Receives every rendered server log line.
    fn on_log(&mut self, _message: &str) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// One provider discovered inside a package.
pub struct DiscoveredExtension {
    /// Identity string, derived from the implementing type's name.
    pub identity: String,
    pub instance: Box<dyn Extension>,
}

impl DiscoveredExtension {
    pub fn new<E: Extension + 'static>(instance: E) -> Self {
        Self {
            identity: identity_of::<E>(),
            instance: Box::new(PanicGuard::new(instance)),
        }
    }
}

impl fmt::Debug for DiscoveredExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredExtension")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Everything a package hands the host through [`DISCOVER_SYMBOL`].
#[derive(Debug, Default)]
pub struct ExtensionProviders {
    pub providers: Vec<DiscoveredExtension>,
}

/// Derive an identity string from a type: its last path segment, generics
/// stripped (`my_pkg::hooks::Watchdog<u8>` -> `Watchdog`).
pub fn identity_of<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

// ============================================================================
// Panic protection
// ============================================================================

/// Wraps an extension so that a panic inside any hook surfaces as an
/// [`ExtensionError::Hook`] instead of unwinding across the package boundary.
pub struct PanicGuard<E> {
    inner: E,
}

impl<E> PanicGuard<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    fn panic_to_error(hook: &str, panic_info: Box<dyn std::any::Any + Send>) -> ExtensionError {
        let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ExtensionError::Hook(format!("{hook} panicked: {message}"))
    }
}

impl<E: Extension> Extension for PanicGuard<E> {
    fn on_enable(&mut self, api: Arc<dyn ServerApi>, data_dir: &Path) -> Result<(), ExtensionError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.on_enable(api, data_dir)))
            .map_err(|p| Self::panic_to_error("on_enable", p))?
    }

    fn on_disable(&mut self) -> Result<(), ExtensionError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.on_disable()))
            .map_err(|p| Self::panic_to_error("on_disable", p))?
    }

    fn on_console_input(&mut self, line: &str) -> Result<bool, ExtensionError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.on_console_input(line)))
            .map_err(|p| Self::panic_to_error("on_console_input", p))?
    }

    fn on_log(&mut self, message: &str) -> Result<(), ExtensionError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.on_log(message)))
            .map_err(|p| Self::panic_to_error("on_log", p))?
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures across the extension lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The package reference does not resolve to a loadable file
    #[error("package not found: {0}")]
    PackageNotFound(String),
    /// The package loaded but exposes no extension implementation
    #[error("{0} contains no extension implementation")]
    NoProviders(String),
    /// An extension with the same identity is already enabled
    #[error("{0} already loaded - unload first")]
    DuplicateIdentity(String),
    /// The native library could not be opened or lacks required symbols
    #[error("failed to load package: {0}")]
    Load(String),
    /// The package was built against a different API version
    #[error("incompatible extension API: host {host}, package {package}")]
    IncompatibleApi { host: u32, package: u32 },
    /// An extension hook reported failure or panicked
    #[error("extension hook failed: {0}")]
    Hook(String),
    /// Releasing the loading context failed
    #[error("failed to release package: {0}")]
    Release(String),
    /// No enabled extension matches the given key
    #[error("'{0}' not loaded")]
    NotLoaded(String),
}

// ============================================================================
// Export macro
// ============================================================================

/// Export one or more extension types from a `cdylib` package.
///
/// Each type must provide an inherent `new() -> Self`. This generates:
/// - `pumpin_extension_api_version()` - the [`EXTENSION_API_VERSION`] the package was built with
/// - `pumpin_discover_extensions()` - a heap-allocated [`ExtensionProviders`]
///   holding one panic-guarded instance per listed type, or null if
///   construction panicked
#[macro_export]
macro_rules! export_extensions {
    ($($ext_type:ty),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn pumpin_extension_api_version() -> u32 {
            $crate::EXTENSION_API_VERSION
        }

        /// # Safety
        ///
        /// The returned pointer must be reclaimed with `Box::from_raw` by the
        /// host, exactly once.
        #[no_mangle]
        pub unsafe extern "C" fn pumpin_discover_extensions() -> *mut $crate::ExtensionProviders {
            match ::std::panic::catch_unwind(|| {
                let mut providers = ::std::vec::Vec::new();
                $(
                    providers.push($crate::DiscoveredExtension::new(<$ext_type>::new()));
                )+
                ::std::boxed::Box::into_raw(::std::boxed::Box::new($crate::ExtensionProviders {
                    providers,
                }))
            }) {
                Ok(ptr) => ptr,
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    mod nested {
        pub struct Watchdog;
        pub struct Wrapper<T>(pub T);
    }

    struct Panicky;

    impl Extension for Panicky {
        fn on_enable(&mut self, _api: Arc<dyn ServerApi>, _dir: &Path) -> Result<(), ExtensionError> {
            Ok(())
        }

        fn on_disable(&mut self) -> Result<(), ExtensionError> {
            panic!("boom");
        }

        fn on_console_input(&mut self, line: &str) -> Result<bool, ExtensionError> {
            Ok(line == "mine")
        }
    }

    #[test]
    fn identity_uses_last_path_segment() {
        assert_eq!(identity_of::<nested::Watchdog>(), "Watchdog");
        assert_eq!(identity_of::<nested::Wrapper<nested::Watchdog>>(), "Wrapper");
    }

    #[test]
    fn discovered_extension_takes_type_identity() {
        let discovered = DiscoveredExtension::new(Panicky);
        assert_eq!(discovered.identity, "Panicky");
    }

    #[test]
    fn panic_guard_converts_panics_to_hook_errors() {
        let mut guarded = PanicGuard::new(Panicky);
        let err = guarded.on_disable().unwrap_err();
        assert!(matches!(err, ExtensionError::Hook(ref m) if m.contains("boom")));
        assert!(guarded.on_console_input("mine").unwrap());
        assert!(!guarded.on_console_input("other").unwrap());
        assert!(guarded.on_log("line").is_ok());
    }

    #[test]
    fn identity_display_matches_log_format() {
        let id = ClientIdentity::new("10.0.0.2".parse().unwrap(), "765", "Rider");
        assert_eq!(id.to_string(), "10.0.0.2 | Name=\"Rider\", SteamID=765");
    }
}
