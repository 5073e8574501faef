//! Widget schema registry.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::WidgetSchema;
use crate::error::{Error, Result};

/// All widget types known to the dashboard, by type id.
///
/// Registration may happen from any thread while layouts compile; lookups
/// hand out shared, immutable schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<WidgetSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Fails if its id is taken; registered schemas are
    /// never replaced.
    pub fn register(&self, schema: WidgetSchema) -> Result<()> {
        match self.schemas.entry(schema.id().to_string()) {
            Entry::Occupied(entry) => Err(Error::DuplicateSchema(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::debug!(id = %schema.id(), properties = schema.properties().len(), "registered widget schema");
                entry.insert(Arc::new(schema));
                Ok(())
            }
        }
    }

    /// Parse and register a plugin widget definition.
    pub fn register_json(&self, definition: &Value) -> Result<()> {
        self.register(WidgetSchema::from_json(definition)?)
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<WidgetSchema>> {
        self.schemas.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    /// Registered type ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schemas.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
