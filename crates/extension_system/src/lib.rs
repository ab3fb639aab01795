//! Extension registry for the pumpin server.
//!
//! Loads extension packages, keeps at most one enabled instance per
//! identity, and brokers console and log traffic to them. Packages are
//! opened through a [`PackageLoader`]; [`NativeLoader`] handles native
//! dynamic libraries built with `pumpin_extension_api::export_extensions!`.
//!
//! Every hook failure is logged and contained. Nothing an extension does can
//! abort a lifecycle operation for its siblings.

pub use loader::{LoadingContext, NativeLoader, OpenedPackage, PackageLoader, NATIVE_PACKAGE_EXTENSIONS};
pub use log_layer::{ExtensionLogLayer, LogForwarder};
pub use manager::{in_extension_hook, ExtensionManager, ExtensionRecord};

mod console;
pub mod loader;
pub mod log_layer;
pub mod manager;
