//! Dashbus Core
//!
//! This crate provides the topic synchronization core of the dashbus
//! telemetry dashboard. It implements:
//!
//! - Reactive values that widgets observe
//! - Remote cells kept in sync with a NetworkTables 4 style pub/sub bus
//! - A bus session that survives disconnects and replays its bindings
//! - A layout compiler that turns untrusted JSON layouts into typed cell trees
//!
//! Rendering, plugin loading from disk and saving layouts are left to the
//! host application.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: `Signal`, the local observable value
//! - `topic`: the eight value kinds and their Rust types
//! - `bus`: remote cells, the bus session and its transports
//! - `schema`: widget schemas and their registry
//! - `layout`: the layout compiler and the current-layout store
//! - `dashboard`: the top-level owner wiring the above together
//!
//! # Example
//!
//! ```rust,ignore
//! use dashbus_core::{Dashboard, DashboardConfig, WidgetSchema};
//! use serde_json::json;
//!
//! let dashboard = Dashboard::new(DashboardConfig::default())?;
//! dashboard.register_widget(
//!     WidgetSchema::builder("gyro", "Gyro")
//!         .property("angle", 0.0)
//!         .min_size(2, 2)
//!         .build()?,
//! )?;
//!
//! let report = dashboard.load_layout(&json!({
//!     "tabs": [{
//!         "name": "Drive",
//!         "elements": [{
//!             "type": "gyro",
//!             "layout": {"x": 1, "y": 1, "width": 2, "height": 2},
//!             "meta": {"gyro": {"angle": {"topic": "/drive/heading"}}}
//!         }]
//!     }]
//! }));
//! assert!(report.is_ok());
//!
//! // Connects to the configured endpoint and keeps retrying in the background.
//! dashboard.connect();
//! ```

pub mod bus;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod layout;
pub mod logging;
pub mod reactive;
pub mod schema;
pub mod topic;

pub use bus::{
    BusSession, ConnectionState, Connector, LoopbackEndpoint, PropertyCell, RemoteCell,
    RetryPolicy, WebSocketConnector,
};
pub use config::{DashboardConfig, Endpoint, SessionConfig};
pub use dashboard::Dashboard;
pub use error::{Error, Result};
pub use layout::{compile, compile_str, Compilation, CompileReport, Layout, LayoutStore};
pub use reactive::{Signal, Subscription};
pub use schema::{PropertyDefinition, SchemaRegistry, WidgetSchema};
pub use topic::{TopicInfo, TopicKind, TopicType, TopicValue};
