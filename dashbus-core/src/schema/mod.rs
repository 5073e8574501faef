//! Widget schemas.
//!
//! A [`WidgetSchema`] declares what a widget type needs: an ordered set of
//! typed properties with defaults, and optionally a minimum size on the
//! layout grid. Schemas are registered once in a [`SchemaRegistry`] and never
//! change afterwards; the layout compiler reads them to decide which cells an
//! element gets and of which kind.
//!
//! Widget types come from plugins the host loads at runtime, so schemas can
//! be built in code with [`WidgetSchema::builder`] or parsed from the plugin
//! definition format with [`WidgetSchema::from_json`]:
//!
//! ```json
//! {
//!   "id": "gyro",
//!   "name": "Gyro",
//!   "properties": {
//!     "angle": { "type": "double", "default": 0, "displayName": "Angle" }
//!   },
//!   "layout": { "minWidth": 2, "minHeight": 2 }
//! }
//! ```

mod registry;
mod validate;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::topic::{TopicKind, TopicValue};

pub use registry::SchemaRegistry;
pub use validate::value_for_kind;

/// One declared widget property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub kind: TopicKind,
    pub default: TopicValue,
    pub description: Option<String>,
    pub display_name: Option<String>,
}

impl PropertyDefinition {
    /// A property whose kind is the kind of `default`.
    pub fn new(default: impl Into<TopicValue>) -> Self {
        let default = default.into();
        Self {
            kind: default.kind(),
            default,
            description: None,
            display_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// The declaration of one widget type.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSchema {
    id: String,
    name: String,
    properties: IndexMap<String, PropertyDefinition>,
    min_width: Option<i64>,
    min_height: Option<i64>,
}

impl WidgetSchema {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WidgetSchemaBuilder {
        WidgetSchemaBuilder {
            schema: WidgetSchema {
                id: id.into(),
                name: name.into(),
                properties: IndexMap::new(),
                min_width: None,
                min_height: None,
            },
        }
    }

    /// Parse a plugin widget definition.
    ///
    /// Property types use the schema spelling (`"integer"`,
    /// `"doublearray"`, ...); bus spellings (`"int"`, `"double[]"`) are
    /// accepted too. Every default must validate against its declared type.
    pub fn from_json(value: &Value) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let invalid = |reason: String| Error::InvalidSchema {
            id: id.clone(),
            reason,
        };

        let def = WidgetDef::deserialize(value).map_err(|e| invalid(e.to_string()))?;
        let mut builder = WidgetSchema::builder(def.id.clone(), def.name.unwrap_or(def.id));

        for (name, prop) in def.properties {
            let kind = parse_kind(&prop.type_name)
                .ok_or_else(|| invalid(format!("property {name:?} has unknown type {:?}", prop.type_name)))?;
            let default = value_for_kind(kind, &prop.default).ok_or_else(|| {
                invalid(format!("default of property {name:?} is not a valid {kind}"))
            })?;
            builder = builder.property_with(
                name,
                PropertyDefinition {
                    kind,
                    default,
                    description: prop.description,
                    display_name: prop.display_name,
                },
            );
        }

        if let Some(layout) = def.layout {
            builder.schema.min_width = layout.min_width;
            builder.schema.min_height = layout.min_height;
        }
        builder.build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared properties, in declaration order.
    pub fn properties(&self) -> &IndexMap<String, PropertyDefinition> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    /// Smallest width the widget may occupy; at least 1.
    pub fn min_width(&self) -> i64 {
        self.min_width.unwrap_or(1).max(1)
    }

    /// Smallest height the widget may occupy; at least 1.
    pub fn min_height(&self) -> i64 {
        self.min_height.unwrap_or(1).max(1)
    }
}

/// Builds a [`WidgetSchema`] in code.
#[derive(Debug, Clone)]
pub struct WidgetSchemaBuilder {
    schema: WidgetSchema,
}

impl WidgetSchemaBuilder {
    /// Declare a property whose kind is the kind of `default`.
    pub fn property(self, name: impl Into<String>, default: impl Into<TopicValue>) -> Self {
        self.property_with(name, PropertyDefinition::new(default))
    }

    pub fn property_with(mut self, name: impl Into<String>, definition: PropertyDefinition) -> Self {
        self.schema.properties.insert(name.into(), definition);
        self
    }

    pub fn min_size(mut self, width: i64, height: i64) -> Self {
        self.schema.min_width = Some(width);
        self.schema.min_height = Some(height);
        self
    }

    pub fn build(self) -> Result<WidgetSchema> {
        let schema = self.schema;
        let invalid = |reason: &str| Error::InvalidSchema {
            id: schema.id.clone(),
            reason: reason.to_string(),
        };
        if schema.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if let Some((name, _)) = schema
            .properties
            .iter()
            .find(|(_, def)| def.default.kind() != def.kind)
        {
            return Err(invalid(&format!("default of property {name:?} does not match its type")));
        }
        Ok(schema)
    }
}

fn parse_kind(name: &str) -> Option<TopicKind> {
    TopicKind::deserialize(Value::String(name.to_string()))
        .ok()
        .or_else(|| TopicKind::from_type_name(name))
}

#[derive(Deserialize)]
struct WidgetDef {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: IndexMap<String, PropertyDef>,
    #[serde(default)]
    layout: Option<LayoutDef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDef {
    #[serde(rename = "type")]
    type_name: String,
    default: Value,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutDef {
    #[serde(default)]
    min_width: Option<i64>,
    #[serde(default)]
    min_height: Option<i64>,
}
