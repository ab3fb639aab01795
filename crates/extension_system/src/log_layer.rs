//! Forwarding of rendered log lines to extensions.

use crate::manager::{in_extension_hook, ExtensionManager};
use parking_lot::RwLock;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Weak};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Late-bound handle to the registry that should receive log lines.
///
/// Logging is initialized before the registry exists, so the layer starts
/// detached and is attached once the registry is built.
#[derive(Clone, Default)]
pub struct LogForwarder {
    target: Arc<RwLock<Weak<ExtensionManager>>>,
}

impl LogForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, manager: &Arc<ExtensionManager>) {
        *self.target.write() = Arc::downgrade(manager);
    }

    fn manager(&self) -> Option<Arc<ExtensionManager>> {
        self.target.read().upgrade()
    }
}

/// A `tracing` layer rendering each event as
/// `[YYYY-MM-DD HH:MM:SS] LEVEL message` and handing it to every enabled
/// extension on the emitting thread.
pub struct ExtensionLogLayer {
    forwarder: LogForwarder,
}

impl ExtensionLogLayer {
    pub fn new(forwarder: LogForwarder) -> Self {
        Self { forwarder }
    }
}

impl<S: Subscriber> Layer<S> for ExtensionLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if in_extension_hook() {
            return;
        }
        let Some(manager) = self.forwarder.manager() else {
            return;
        };
        if manager.is_empty() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "[{}] {} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().level(),
            visitor.line
        );
        manager.forward_log(&line);
    }
}

#[derive(Default)]
struct MessageVisitor {
    line: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.line, "{:?}", value);
        } else {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.line.push_str(value);
        } else {
            let _ = write!(self.line, " {}={}", field.name(), value);
        }
    }
}
