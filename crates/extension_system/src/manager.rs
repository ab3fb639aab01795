//! The extension registry.

use crate::loader::{LoadingContext, OpenedPackage, PackageLoader};
use dashmap::DashMap;
use parking_lot::Mutex;
use pumpin_extension_api::{DiscoveredExtension, Extension, ExtensionError, ServerApi};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running extension code. Log lines emitted
/// while a guard is alive are not forwarded back to extensions.
struct HookGuard;

impl HookGuard {
    fn enter() -> Option<Self> {
        IN_HOOK.with(|flag| (!flag.replace(true)).then_some(HookGuard))
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

/// Whether the current thread is inside an extension hook or a broadcast.
pub fn in_extension_hook() -> bool {
    IN_HOOK.with(Cell::get)
}

fn in_hook<T>(f: impl FnOnce() -> T) -> T {
    let _guard = HookGuard::enter();
    f()
}

/// One enabled extension.
pub struct ExtensionRecord {
    identity: String,
    package: PathBuf,
    context: Mutex<Option<Arc<dyn LoadingContext>>>,
    instance: Mutex<Option<Box<dyn Extension>>>,
}

impl ExtensionRecord {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn package(&self) -> &Path {
        &self.package
    }

    /// File name of the backing package.
    pub fn package_name(&self) -> String {
        package_name(&self.package)
    }

    /// Run `f` against the live instance. The instance lock is released
    /// before this returns.
    fn with_instance<T>(&self, f: impl FnOnce(&mut dyn Extension) -> T) -> Option<T> {
        let mut instance = self.instance.lock();
        instance.as_mut().map(|ext| f(ext.as_mut()))
    }
}

fn package_name(package: &Path) -> String {
    package
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| package.display().to_string())
}

fn release_context(context: &Arc<dyn LoadingContext>, package: &str) {
    match context.release() {
        Ok(()) => debug!("[EXT] Released {}", package),
        Err(e) => warn!("[EXT] Could not release {}: {}", package, e),
    }
}

/// Loads, unloads and reloads extensions, and broadcasts console and log
/// lines to them.
///
/// Records are keyed by identity; at most one record per identity exists at
/// any time. Lifecycle operations are serialized with each other, while
/// broadcasts run concurrently against a snapshot of the registry.
pub struct ExtensionManager {
    records: DashMap<String, Arc<ExtensionRecord>>,
    lifecycle: Mutex<()>,
    loader: Arc<dyn PackageLoader>,
    api: Arc<dyn ServerApi>,
    extensions_root: PathBuf,
}

impl ExtensionManager {
    pub fn new(loader: Arc<dyn PackageLoader>, api: Arc<dyn ServerApi>, extensions_root: impl Into<PathBuf>) -> Self {
        Self {
            records: DashMap::new(),
            lifecycle: Mutex::new(()),
            loader,
            api,
            extensions_root: extensions_root.into(),
        }
    }

    pub fn extensions_root(&self) -> &Path {
        &self.extensions_root
    }

    /// Load every package found in the extensions directory. Returns the
    /// number of enabled extensions afterwards.
    pub fn load_all(&self) -> usize {
        if let Err(e) = std::fs::create_dir_all(&self.extensions_root) {
            warn!("[EXT] Could not create {}: {}", self.extensions_root.display(), e);
        }

        let mut packages: Vec<PathBuf> = match std::fs::read_dir(&self.extensions_root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| self.loader.is_package(path))
                .collect(),
            Err(e) => {
                warn!("[EXT] Could not scan {}: {}", self.extensions_root.display(), e);
                Vec::new()
            }
        };
        packages.sort();

        if packages.is_empty() {
            info!("[EXT] No extensions found.");
            return 0;
        }
        for package in &packages {
            let _ = self.load(package);
        }
        info!("[EXT] Total enabled: {}", self.len());
        self.len()
    }

    /// Load a package and enable every provider it exposes.
    ///
    /// A provider whose identity is already registered is skipped; one whose
    /// enable hook fails is dropped without affecting its siblings.
    ///
    /// # Arguments
    ///
    /// * `package` - Path to the package file
    ///
    /// # Returns
    ///
    /// The identities that were enabled. If the package cannot be opened its
    /// open error is returned. If no provider was enabled the loading context
    /// is released and the last provider failure is returned, or
    /// [`ExtensionError::NoProviders`] when the package exposed none.
    pub fn load(&self, package: &Path) -> Result<Vec<String>, ExtensionError> {
        let _lifecycle = self.lifecycle.lock();
        self.load_locked(package)
    }

    fn load_locked(&self, package: &Path) -> Result<Vec<String>, ExtensionError> {
        let name = package_name(package);
        let OpenedPackage { context, providers } = match self.loader.open(package) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("[EXT] Error loading {}: {}", name, e);
                return Err(e);
            }
        };

        if providers.is_empty() {
            let err = ExtensionError::NoProviders(name.clone());
            warn!("[EXT] {}", err);
            release_context(&context, &name);
            return Err(err);
        }

        let mut enabled = Vec::new();
        let mut last_error = None;
        for DiscoveredExtension { identity, mut instance } in providers {
            if self.records.contains_key(&identity) {
                let err = ExtensionError::DuplicateIdentity(identity);
                warn!("[EXT] {}", err);
                last_error = Some(err);
                continue;
            }

            let data_dir = self.extensions_root.join(&identity);
            if let Err(e) = std::fs::create_dir_all(&data_dir) {
                warn!("[EXT] Could not create data directory {}: {}", data_dir.display(), e);
            }

            if let Err(e) = in_hook(|| instance.on_enable(self.api.clone(), &data_dir)) {
                error!("[EXT] Failed to enable {}: {}", identity, e);
                last_error = Some(e);
                continue;
            }

            let record = Arc::new(ExtensionRecord {
                identity: identity.clone(),
                package: package.to_path_buf(),
                context: Mutex::new(Some(context.clone())),
                instance: Mutex::new(Some(instance)),
            });
            self.records.insert(identity.clone(), record);
            info!("[EXT] Enabled {} ({})", identity, name);
            enabled.push(identity);
        }

        if enabled.is_empty() {
            release_context(&context, &name);
            return Err(last_error.unwrap_or(ExtensionError::NoProviders(name)));
        }
        Ok(enabled)
    }

    /// Resolve a key as an identity first, then as a package file name
    /// (case-insensitive).
    fn resolve(&self, key: &str) -> Option<Arc<ExtensionRecord>> {
        if let Some(record) = self.records.get(key) {
            return Some(record.value().clone());
        }
        self.records
            .iter()
            .find(|entry| entry.package_name().eq_ignore_ascii_case(key))
            .map(|entry| entry.value().clone())
    }

    /// Disable and remove one extension. Hook and release failures are
    /// logged and swallowed; once the record is found it is always removed.
    ///
    /// # Arguments
    ///
    /// * `key` - An identity, or a package file name (case-insensitive)
    ///
    /// # Returns
    ///
    /// The identity that was unloaded, or [`ExtensionError::NotLoaded`].
    pub fn unload(&self, key: &str) -> Result<String, ExtensionError> {
        let _lifecycle = self.lifecycle.lock();
        self.unload_locked(key, "unload")
    }

    fn unload_locked(&self, key: &str, verb: &str) -> Result<String, ExtensionError> {
        let Some((identity, record)) = self
            .resolve(key)
            .and_then(|found| self.records.remove(found.identity()))
        else {
            let err = ExtensionError::NotLoaded(key.to_string());
            warn!("[EXT] {}: {}", verb, err);
            return Err(err);
        };

        let instance = record.instance.lock().take();
        if let Some(mut instance) = instance {
            if let Err(e) = in_hook(|| instance.on_disable()) {
                warn!("[EXT] {} did not disable cleanly: {}", identity, e);
            }
        }

        let context = record.context.lock().take();
        if let Some(context) = context {
            // Sibling extensions from the same package still hold it.
            if Arc::strong_count(&context) == 1 {
                release_context(&context, &record.package_name());
            }
        }

        info!("[EXT] Unloaded {}", identity);
        Ok(identity)
    }

    /// Unload the extension behind `key`, then load its package again. The
    /// package may now provide a different set of extensions.
    ///
    /// # Arguments
    ///
    /// * `key` - An identity, or a package file name (case-insensitive)
    ///
    /// # Returns
    ///
    /// The identities enabled by the fresh load, [`ExtensionError::NotLoaded`]
    /// for an unknown key, or the load error.
    pub fn reload(&self, key: &str) -> Result<Vec<String>, ExtensionError> {
        let _lifecycle = self.lifecycle.lock();
        let Some(record) = self.resolve(key) else {
            let err = ExtensionError::NotLoaded(key.to_string());
            warn!("[EXT] reload: {}", err);
            return Err(err);
        };
        let package = record.package().to_path_buf();
        drop(record);

        self.unload_locked(key, "reload")?;
        self.load_locked(&package)
    }

    /// Unload everything. Used at shutdown.
    pub fn disable_all(&self) {
        let _lifecycle = self.lifecycle.lock();
        let identities: Vec<String> = self.records.iter().map(|entry| entry.key().clone()).collect();
        for identity in identities {
            let _ = self.unload_locked(&identity, "unload");
        }
        info!("[EXT] All extensions disabled");
    }

    fn snapshot(&self) -> Vec<Arc<ExtensionRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    /// Offer a console line to every extension. Returns `true` if any of
    /// them consumed it.
    pub fn forward_console_input(&self, line: &str) -> bool {
        let Some(_guard) = HookGuard::enter() else {
            return false;
        };

        let mut consumed = false;
        for record in self.snapshot() {
            match record.with_instance(|ext| ext.on_console_input(line)) {
                Some(Ok(true)) => consumed = true,
                Some(Ok(false)) | None => {}
                Some(Err(e)) => warn!("[EXT] {} failed on console input: {}", record.identity, e),
            }
        }
        consumed
    }

    /// Hand a rendered log line to every extension. Lines produced while an
    /// extension hook is running on this thread are dropped.
    pub fn forward_log(&self, line: &str) {
        let Some(_guard) = HookGuard::enter() else {
            return;
        };

        for record in self.snapshot() {
            if let Some(Err(e)) = record.with_instance(|ext| ext.on_log(line)) {
                warn!("[EXT] {} failed on log line: {}", record.identity, e);
            }
        }
    }

    /// `(identity, package file name)` for every enabled extension.
    pub fn list(&self) -> Vec<(String, String)> {
        self.snapshot()
            .iter()
            .map(|record| (record.identity.clone(), record.package_name()))
            .collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.records.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pumpin_extension_api::ClientIdentity;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct NoopApi;

    impl ServerApi for NoopApi {
        fn log(&self, message: &str) {
            info!("[EXT] {}", message);
        }
        fn poll_inputs(&self, _steam_id: &str) -> Vec<String> {
            Vec::new()
        }
        fn is_paused(&self, _steam_id: &str) -> bool {
            false
        }
        fn is_running(&self, _steam_id: &str) -> bool {
            false
        }
        fn active_clients(&self) -> Vec<ClientIdentity> {
            Vec::new()
        }
        fn enqueue_command(&self, _steam_id: &str, _payload: &str) {}
        fn suppress_ack_log(&self, _label: &str) {}
        fn teleport(&self, _steam_id: &str, _x: f64, _y: f64, _z: f64) {}
        fn objects_json(&self, _steam_id: &str) -> Option<String> {
            None
        }
        fn position(&self, _steam_id: &str) -> Option<[f64; 3]> {
            None
        }
        fn extensions_root(&self) -> PathBuf {
            PathBuf::from("extensions")
        }
    }

    /// Counts hook invocations shared by every test extension.
    #[derive(Default)]
    pub struct Calls {
        pub enabled: AtomicUsize,
        pub disabled: AtomicUsize,
        pub released: AtomicUsize,
        pub logs: Mutex<Vec<String>>,
    }

    macro_rules! test_extension {
        ($name:ident, consumes = $consumes:expr, fail_enable = $fail:expr) => {
            pub struct $name(pub Arc<Calls>);

            impl Extension for $name {
                fn on_enable(&mut self, api: Arc<dyn ServerApi>, _dir: &Path) -> Result<(), ExtensionError> {
                    if $fail {
                        return Err(ExtensionError::Hook("refused".into()));
                    }
                    api.log(concat!(stringify!($name), " enabled"));
                    self.0.enabled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }

                fn on_disable(&mut self) -> Result<(), ExtensionError> {
                    self.0.disabled.fetch_add(1, Ordering::SeqCst);
                    Err(ExtensionError::Hook("disable always complains".into()))
                }

                fn on_console_input(&mut self, line: &str) -> Result<bool, ExtensionError> {
                    match $consumes {
                        Some(word) => Ok(line == word),
                        None => Err(ExtensionError::Hook("console hook broke".into())),
                    }
                }

                fn on_log(&mut self, message: &str) -> Result<(), ExtensionError> {
                    self.0.logs.lock().push(message.to_string());
                    Ok(())
                }
            }
        };
    }

    test_extension!(Alpha, consumes = Some("alpha"), fail_enable = false);
    test_extension!(Beta, consumes = None::<&str>, fail_enable = false);
    test_extension!(Broken, consumes = Some("broken"), fail_enable = true);

    type Factory = Box<dyn Fn(&Arc<Calls>) -> Vec<DiscoveredExtension> + Send + Sync>;

    struct CountingContext(Arc<Calls>);

    impl LoadingContext for CountingContext {
        fn release(&self) -> Result<(), ExtensionError> {
            self.0.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Packages are looked up by file name; every open builds fresh instances.
    pub struct MemoryLoader {
        calls: Arc<Calls>,
        packages: HashMap<String, Factory>,
    }

    impl PackageLoader for MemoryLoader {
        fn open(&self, package: &Path) -> Result<OpenedPackage, ExtensionError> {
            let factory = self
                .packages
                .get(&package_name(package))
                .ok_or_else(|| ExtensionError::PackageNotFound(package.display().to_string()))?;
            Ok(OpenedPackage {
                context: Arc::new(CountingContext(self.calls.clone())),
                providers: factory(&self.calls),
            })
        }

        fn is_package(&self, path: &Path) -> bool {
            self.packages.contains_key(&package_name(path))
        }
    }

    pub fn manager(root: &Path) -> (ExtensionManager, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let mut packages: HashMap<String, Factory> = HashMap::new();
        packages.insert(
            "alpha.so".into(),
            Box::new(|c| vec![DiscoveredExtension::new(Alpha(c.clone()))]),
        );
        packages.insert(
            "alpha-copy.so".into(),
            Box::new(|c| vec![DiscoveredExtension::new(Alpha(c.clone()))]),
        );
        packages.insert(
            "pair.so".into(),
            Box::new(|c| {
                vec![
                    DiscoveredExtension::new(Alpha(c.clone())),
                    DiscoveredExtension::new(Beta(c.clone())),
                ]
            }),
        );
        packages.insert(
            "mixed.so".into(),
            Box::new(|c| {
                vec![
                    DiscoveredExtension::new(Broken(c.clone())),
                    DiscoveredExtension::new(Beta(c.clone())),
                ]
            }),
        );
        packages.insert("empty.so".into(), Box::new(|_| Vec::new()));

        let loader = MemoryLoader {
            calls: calls.clone(),
            packages,
        };
        let manager = ExtensionManager::new(Arc::new(loader), Arc::new(NoopApi), root);
        (manager, calls)
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());

        assert_eq!(manager.load(&dir.path().join("alpha.so")).unwrap(), vec!["Alpha"]);
        let err = manager.load(&dir.path().join("alpha-copy.so")).unwrap_err();
        assert!(matches!(err, ExtensionError::DuplicateIdentity(ref id) if id == "Alpha"));

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.list(), vec![("Alpha".to_string(), "alpha.so".to_string())]);
        assert_eq!(calls.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(calls.released.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("Alpha").is_dir());
    }

    #[test]
    fn unload_by_package_name_matches_unload_by_identity() {
        let dir = tempfile::tempdir().unwrap();

        let (by_name, calls) = manager(dir.path());
        by_name.load(&dir.path().join("alpha.so")).unwrap();
        assert_eq!(by_name.unload("ALPHA.SO").unwrap(), "Alpha");
        assert!(by_name.is_empty());
        assert_eq!(calls.disabled.load(Ordering::SeqCst), 1);
        assert_eq!(calls.released.load(Ordering::SeqCst), 1);

        let (by_id, _) = manager(dir.path());
        by_id.load(&dir.path().join("alpha.so")).unwrap();
        assert_eq!(by_id.unload("Alpha").unwrap(), "Alpha");
        assert!(by_id.is_empty());

        assert!(matches!(by_id.unload("Alpha"), Err(ExtensionError::NotLoaded(_))));
    }

    #[test]
    fn enable_failure_only_drops_that_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());

        assert_eq!(manager.load(&dir.path().join("mixed.so")).unwrap(), vec!["Beta"]);
        assert!(!manager.contains("Broken"));
        assert_eq!(calls.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shared_package_is_released_after_its_last_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());

        manager.load(&dir.path().join("pair.so")).unwrap();
        manager.unload("Alpha").unwrap();
        assert_eq!(calls.released.load(Ordering::SeqCst), 0);
        manager.unload("Beta").unwrap();
        assert_eq!(calls.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_and_missing_packages_fail() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());

        assert!(matches!(
            manager.load(&dir.path().join("empty.so")),
            Err(ExtensionError::NoProviders(_))
        ));
        assert_eq!(calls.released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.load(&dir.path().join("nothing.so")),
            Err(ExtensionError::PackageNotFound(_))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn reload_reopens_the_package() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());

        manager.load(&dir.path().join("alpha.so")).unwrap();
        assert_eq!(manager.reload("alpha.so").unwrap(), vec!["Alpha"]);
        assert_eq!(calls.enabled.load(Ordering::SeqCst), 2);
        assert_eq!(calls.disabled.load(Ordering::SeqCst), 1);
        assert_eq!(calls.released.load(Ordering::SeqCst), 1);
        assert!(matches!(manager.reload("ghost"), Err(ExtensionError::NotLoaded(_))));
    }

    #[test]
    fn console_broadcast_survives_failing_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        manager.load(&dir.path().join("pair.so")).unwrap();

        assert!(manager.forward_console_input("alpha"));
        assert!(!manager.forward_console_input("beta"));
    }

    #[test]
    fn log_lines_reach_every_extension_once() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());
        manager.load(&dir.path().join("pair.so")).unwrap();

        manager.forward_log("[2026-01-01 00:00:00] INFO hello");
        assert_eq!(calls.logs.lock().len(), 2);

        let _guard = HookGuard::enter();
        manager.forward_log("from inside a hook");
        assert_eq!(calls.logs.lock().len(), 2);
    }

    #[test]
    fn disable_all_empties_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(dir.path());
        manager.load(&dir.path().join("pair.so")).unwrap();
        manager.load(&dir.path().join("alpha-copy.so")).unwrap_err();

        manager.disable_all();
        assert!(manager.is_empty());
        assert_eq!(calls.disabled.load(Ordering::SeqCst), 2);
        assert_eq!(calls.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_all_scans_the_extensions_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        assert_eq!(manager.load_all(), 0);

        std::fs::write(dir.path().join("alpha.so"), b"").unwrap();
        std::fs::write(dir.path().join("mixed.so"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(manager.load_all(), 2);
    }
}
