//! The top-level owner.
//!
//! A [`Dashboard`] is constructed once at startup and owns the widget
//! registry, the bus session and the current layout. Nothing in the crate
//! is global; hosts that need two dashboards build two.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::bus::{BusSession, Connector, WebSocketConnector};
use crate::config::{DashboardConfig, Endpoint};
use crate::error::{log_result, Result};
use crate::layout::{CompileReport, Layout, LayoutStore};
use crate::schema::{SchemaRegistry, WidgetSchema};

pub struct Dashboard {
    registry: Arc<SchemaRegistry>,
    session: BusSession,
    layouts: LayoutStore,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    /// Build a dashboard from validated configuration, registering the
    /// configured widget definitions.
    pub fn new(config: DashboardConfig) -> Result<Self> {
        log_result(config.validate())?;
        let registry = Arc::new(SchemaRegistry::new());
        for definition in &config.widgets {
            log_result(registry.register_json(definition))?;
        }
        Ok(Self {
            registry,
            session: BusSession::new(config.session),
            layouts: LayoutStore::new(),
            driver: Mutex::new(None),
        })
    }

    /// Start talking to the bus through `connector`. Replaces a previously
    /// started driver.
    pub fn start(&self, connector: impl Connector) {
        let handle = self.session.start(connector);
        if let Some(previous) = self.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Start talking to the configured endpoint over WebSocket.
    pub fn connect(&self) {
        self.start(WebSocketConnector::from_config(self.session.config()));
    }

    pub fn set_endpoint(&self, endpoint: Endpoint) {
        self.session.set_endpoint(endpoint);
    }

    pub fn register_widget(&self, schema: WidgetSchema) -> Result<()> {
        self.registry.register(schema)
    }

    /// Compile `document` and make it current if it has no errors.
    pub fn load_layout(&self, document: &Value) -> CompileReport {
        self.layouts.load(document, &self.registry, &self.session)
    }

    pub fn load_layout_str(&self, text: &str) -> CompileReport {
        self.layouts.load_str(text, &self.registry, &self.session)
    }

    pub fn layout(&self) -> Arc<Layout> {
        self.layouts.current()
    }

    pub fn layouts(&self) -> &LayoutStore {
        &self.layouts
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn session(&self) -> &BusSession {
        &self.session
    }

    /// Stop the driver and wait for it to close the transport.
    pub async fn shutdown(&self) {
        self.session.shutdown();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "bus driver ended abnormally");
            }
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardConfig;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn registers_configured_widgets() {
        let config = DashboardConfig::from_json_str(
            r#"{"widgets": [{"id": "gyro", "name": "Gyro", "properties": {"angle": {"type": "double", "default": 0}}, "layout": {"minWidth": 2}}]}"#,
        )
        .unwrap();
        let dashboard = Dashboard::new(config).unwrap();
        assert!(dashboard.registry().contains("gyro"));

        let report = dashboard.load_layout(&json!({"tabs": [{"elements": [{"type": "gyro", "layout": {"width": 0}}]}]}));
        assert!(report.is_ok());
        assert_eq!(dashboard.layout().element_count(), 1);
    }

    #[test]
    fn duplicate_widget_definitions_fail_construction() {
        let definition = json!({"id": "gyro", "properties": {}});
        let config = DashboardConfig {
            widgets: vec![definition.clone(), definition],
            ..DashboardConfig::default()
        };
        assert!(matches!(Dashboard::new(config), Err(Error::DuplicateSchema(_))));
    }
}
