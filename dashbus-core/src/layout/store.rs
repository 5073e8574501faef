//! The current layout, replaced atomically.

use std::sync::Arc;

use serde_json::Value;

use super::compiler::{compile, compile_str, Compilation, CompileReport};
use super::model::Layout;
use crate::bus::BusSession;
use crate::reactive::{Signal, Subscription};
use crate::schema::SchemaRegistry;

/// Holds the committed layout.
///
/// A load only replaces the layout when compilation produced no errors; a
/// rejected document leaves the previous layout in place.
#[derive(Debug, Clone, Default)]
pub struct LayoutStore {
    current: Signal<Arc<Layout>>,
}

impl LayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `document` and commit it if it is usable.
    pub fn load(&self, document: &Value, registry: &SchemaRegistry, session: &BusSession) -> CompileReport {
        self.commit(compile(document, registry, session))
    }

    /// Like [`load`](Self::load), for JSON text.
    pub fn load_str(&self, text: &str, registry: &SchemaRegistry, session: &BusSession) -> CompileReport {
        self.commit(compile_str(text, registry, session))
    }

    pub fn current(&self) -> Arc<Layout> {
        self.current.get()
    }

    /// Observe the committed layout.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<Layout>) + Send + Sync + 'static,
    {
        self.current.subscribe(callback)
    }

    fn commit(&self, compilation: Compilation) -> CompileReport {
        let Compilation { layout, report } = compilation;
        match layout {
            Some(layout) if report.is_ok() => {
                tracing::info!(
                    tabs = layout.len(),
                    elements = layout.element_count(),
                    warnings = report.warnings.len(),
                    "layout loaded"
                );
                self.current.set(Arc::new(layout));
            }
            _ => tracing::warn!(errors = ?report.errors, "layout rejected"),
        }
        report
    }
}
