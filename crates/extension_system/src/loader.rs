//! Package loading.
//!
//! A package is one loadable unit that yields zero or more extension
//! providers. Loading is split behind [`PackageLoader`] so the registry can
//! be driven by something other than real native libraries.

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use pumpin_extension_api::{
    DiscoveredExtension, ExtensionError, ExtensionProviders, API_VERSION_SYMBOL, DISCOVER_SYMBOL,
    EXTENSION_API_VERSION,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// File extensions treated as native extension packages.
pub const NATIVE_PACKAGE_EXTENSIONS: &[&str] = &["so", "dll", "dylib"];

/// Resources backing one opened package. Shared by every extension the
/// package provided and released once, after the last of them is unloaded.
pub trait LoadingContext: Send + Sync {
    fn release(&self) -> Result<(), ExtensionError>;
}

/// A freshly opened package.
pub struct OpenedPackage {
    pub context: Arc<dyn LoadingContext>,
    pub providers: Vec<DiscoveredExtension>,
}

pub trait PackageLoader: Send + Sync {
    /// Open `package` in a new loading context and discover its providers.
    fn open(&self, package: &Path) -> Result<OpenedPackage, ExtensionError>;

    /// Whether a directory entry looks like a package this loader handles.
    fn is_package(&self, path: &Path) -> bool;
}

/// Loads packages as native dynamic libraries.
///
/// Unloading is advisory: the library handle is closed, but the platform may
/// keep the image mapped, and any state the package parked in statics
/// survives until the process exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl PackageLoader for NativeLoader {
    fn open(&self, package: &Path) -> Result<OpenedPackage, ExtensionError> {
        if !package.is_file() {
            return Err(ExtensionError::PackageNotFound(package.display().to_string()));
        }

        debug!("Opening native package: {}", package.display());
        let library = unsafe {
            Library::new(package).map_err(|e| ExtensionError::Load(format!("Failed to load library: {e}")))?
        };

        let package_version = unsafe {
            let version: Symbol<unsafe extern "C" fn() -> u32> = library.get(API_VERSION_SYMBOL).map_err(|e| {
                ExtensionError::Load(format!("Failed to find pumpin_extension_api_version function: {e}"))
            })?;
            version()
        };
        if package_version != EXTENSION_API_VERSION {
            return Err(ExtensionError::IncompatibleApi {
                host: EXTENSION_API_VERSION,
                package: package_version,
            });
        }

        let providers_ptr = unsafe {
            let discover: Symbol<unsafe extern "C" fn() -> *mut ExtensionProviders> =
                library.get(DISCOVER_SYMBOL).map_err(|e| {
                    ExtensionError::Load(format!("Failed to find pumpin_discover_extensions function: {e}"))
                })?;
            discover()
        };
        if providers_ptr.is_null() {
            return Err(ExtensionError::Load(
                "pumpin_discover_extensions returned null pointer".to_string(),
            ));
        }
        let providers = unsafe { Box::from_raw(providers_ptr) }.providers;

        Ok(OpenedPackage {
            context: Arc::new(NativeContext {
                library: Mutex::new(Some(library)),
            }),
            providers,
        })
    }

    fn is_package(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    NATIVE_PACKAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
    }
}

struct NativeContext {
    library: Mutex<Option<Library>>,
}

impl LoadingContext for NativeContext {
    fn release(&self) -> Result<(), ExtensionError> {
        match self.library.lock().take() {
            Some(library) => library
                .close()
                .map_err(|e| ExtensionError::Release(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_package_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeLoader.open(&dir.path().join("absent.so")).err().unwrap();
        assert!(matches!(err, ExtensionError::PackageNotFound(_)));
    }

    #[test]
    fn garbage_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"not a library").unwrap();
        let err = NativeLoader.open(&path).err().unwrap();
        assert!(matches!(err, ExtensionError::Load(_)));
    }

    #[test]
    fn package_detection_uses_native_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.so", "b.DLL", "c.dylib", "d.jar", "e"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("f.so")).unwrap();

        let mut found: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| NativeLoader.is_package(path))
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        found.sort();
        assert_eq!(found, vec!["a.so", "b.DLL", "c.dylib"]);
    }
}
