//! Layout compiler.
//!
//! Turns an untrusted JSON layout document into a [`Layout`]. The only
//! fatal defect is a document without a `tabs` array; everything below that
//! level is repaired or skipped and reported as a warning:
//!
//! | Defect | Outcome |
//! |---|---|
//! | non-object tab or element | skipped |
//! | tab without a string name | named `New Tab N` |
//! | tab without an element array | kept, empty |
//! | element without a registered type | skipped |
//! | element without a string name | named after its type |
//! | bad `data` | empty data source list |
//! | missing, malformed or undersized geometry | clamped to the floor |
//! | bad property override | schema default |
//!
//! Compilation creates cells through the [`BusSession`], so property cells
//! with a `topic` are bound as soon as they exist.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use super::model::{Element, ElementId, ElementLayout, ElementMeta, Layout, Tab, TabId};
use crate::bus::BusSession;
use crate::schema::{value_for_kind, PropertyDefinition, SchemaRegistry, WidgetSchema};
use crate::topic::{TopicKind, TopicValue};

/// Diagnostics from one compilation. `errors` is non-empty only when the
/// document was structurally unusable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CompileReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of [`compile`]: the layout, if the document was usable, and the
/// diagnostics either way.
#[derive(Debug)]
pub struct Compilation {
    pub layout: Option<Layout>,
    pub report: CompileReport,
}

/// Compile a layout document.
pub fn compile(document: &Value, registry: &SchemaRegistry, session: &BusSession) -> Compilation {
    let mut compiler = Compiler {
        registry,
        session,
        report: CompileReport::default(),
        placeholders: 0,
    };
    let layout = compiler.layout(document);
    Compilation {
        layout,
        report: compiler.report,
    }
}

/// Compile a layout document given as JSON text. Text that is not JSON is a
/// structural error.
pub fn compile_str(text: &str, registry: &SchemaRegistry, session: &BusSession) -> Compilation {
    match serde_json::from_str::<Value>(text) {
        Ok(document) => compile(&document, registry, session),
        Err(err) => Compilation {
            layout: None,
            report: CompileReport {
                errors: vec![format!("document is not valid JSON: {err}")],
                warnings: Vec::new(),
            },
        },
    }
}

struct Compiler<'a> {
    registry: &'a SchemaRegistry,
    session: &'a BusSession,
    report: CompileReport,
    placeholders: usize,
}

impl Compiler<'_> {
    fn warn(&mut self, message: String) {
        tracing::debug!(%message, "layout warning");
        self.report.warnings.push(message);
    }

    fn layout(&mut self, document: &Value) -> Option<Layout> {
        let Some(tabs) = document.get("tabs") else {
            self.report.errors.push(r#"document has no "tabs" property"#.to_string());
            return None;
        };
        let Some(tabs) = tabs.as_array() else {
            self.report.errors.push(r#""tabs" is not an array"#.to_string());
            return None;
        };

        let mut layout = Layout::default();
        for tab in tabs {
            let Some(tab) = tab.as_object() else {
                self.warn("tab list has a non-object entry, skipping".to_string());
                continue;
            };
            let tab = self.tab(tab);
            layout.tabs.insert(TabId::generate(), tab);
        }
        Some(layout)
    }

    fn tab(&mut self, tab: &Map<String, Value>) -> Tab {
        let name = match tab.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                let name = format!("New Tab {}", self.placeholders);
                self.placeholders += 1;
                name
            }
        };

        let mut elements = IndexMap::new();
        match tab.get("elements").and_then(Value::as_array) {
            Some(entries) => {
                for entry in entries {
                    let Some(entry) = entry.as_object() else {
                        self.warn(format!("[{name}] element list has a non-object entry, skipping"));
                        continue;
                    };
                    if let Some(element) = self.element(&name, entry) {
                        elements.insert(ElementId::generate(), element);
                    }
                }
            }
            None => self.warn(format!("[{name}] element list is missing or not an array")),
        }

        Tab {
            name: self.session.create_cell(name, None),
            elements,
        }
    }

    fn element(&mut self, tab: &str, element: &Map<String, Value>) -> Option<Element> {
        let Some(widget_type) = element.get("type").and_then(Value::as_str) else {
            self.warn(format!("[{tab}] element has no string type, skipping"));
            return None;
        };
        let Some(schema) = self.registry.lookup(widget_type) else {
            self.warn(format!("[{tab}] unknown widget type {widget_type:?}, skipping"));
            return None;
        };
        let name = element
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(widget_type)
            .to_string();
        let context = format!("[{tab}] [{name}]");

        let data = self.data(&context, element.get("data"));
        let layout = self.geometry(&context, element.get("layout"), &schema);
        let meta = self.properties(&context, &schema, element.get("meta"));

        Some(Element {
            name: self.session.create_cell(name, None),
            widget_type: self.session.create_cell(widget_type.to_string(), None),
            data: self.session.create_cell(data, None),
            layout,
            meta,
        })
    }

    fn data(&mut self, context: &str, data: Option<&Value>) -> Vec<String> {
        match data {
            None => Vec::new(),
            Some(Value::String(source)) => vec![source.clone()],
            Some(value) => match value_for_kind(TopicKind::StringArray, value) {
                Some(TopicValue::StringArray(sources)) => sources,
                _ => {
                    self.warn(format!("{context} data sources are neither a string nor a string array"));
                    Vec::new()
                }
            },
        }
    }

    fn geometry(&mut self, context: &str, layout: Option<&Value>, schema: &WidgetSchema) -> ElementLayout {
        let floors = [1, 1, schema.min_width(), schema.min_height()];
        let mut values = floors;

        match layout.and_then(Value::as_object) {
            None => self.warn(format!("{context} layout is missing or malformed, using minimum geometry")),
            Some(layout) => {
                let mut clamped = Vec::new();
                for (i, field) in ["x", "y", "width", "height"].into_iter().enumerate() {
                    let Some(raw) = layout.get(field).and_then(Value::as_f64) else {
                        continue;
                    };
                    let rounded = raw.round();
                    if rounded < floors[i] as f64 {
                        clamped.push(field);
                    } else {
                        values[i] = rounded as i64;
                    }
                }
                if !clamped.is_empty() {
                    self.warn(format!(
                        "{context} layout {} below minimum, clamped",
                        clamped.join(", ")
                    ));
                }
            }
        }

        let [x, y, width, height] = values;
        ElementLayout {
            x: self.session.create_cell(x, None),
            y: self.session.create_cell(y, None),
            width: self.session.create_cell(width, None),
            height: self.session.create_cell(height, None),
        }
    }

    fn properties(&mut self, context: &str, schema: &WidgetSchema, meta: Option<&Value>) -> ElementMeta {
        let overrides = match meta {
            None => None,
            Some(Value::Object(meta)) => Some(meta),
            Some(_) => {
                self.warn(format!("{context} meta is not an object, ignoring"));
                None
            }
        };

        let mut widget_types = vec![schema.id().to_string()];
        if let Some(overrides) = overrides {
            widget_types.extend(overrides.keys().filter(|k| k.as_str() != schema.id()).cloned());
        }

        let mut cells = ElementMeta::new();
        for widget_type in widget_types {
            let Some(widget) = self.registry.lookup(&widget_type) else {
                continue;
            };
            let widget_overrides = match overrides.and_then(|o| o.get(&widget_type)) {
                None => None,
                Some(Value::Object(entries)) => Some(entries),
                Some(_) => {
                    self.warn(format!("{context} meta for {widget_type:?} is not an object, ignoring"));
                    None
                }
            };

            let mut properties = IndexMap::new();
            for (property, definition) in widget.properties() {
                let entry = widget_overrides.and_then(|o| o.get(property));
                let label = format!("{context} {widget_type}.{property}");
                let (default, topic) = self.property_source(&label, definition, entry);
                let cell = self.session.create_property_cell(default, topic.as_deref());
                properties.insert(property.clone(), cell);
            }
            cells.insert(widget_type, properties);
        }
        cells
    }

    /// Resolve the initial value and topic of one property.
    fn property_source(
        &mut self,
        label: &str,
        definition: &PropertyDefinition,
        entry: Option<&Value>,
    ) -> (TopicValue, Option<String>) {
        let entry = match entry {
            None => return (definition.default.clone(), None),
            Some(Value::Object(entry)) => entry,
            Some(_) => {
                self.warn(format!("{label} is not an object, using schema default"));
                return (definition.default.clone(), None);
            }
        };

        let topic = match entry.get("topic") {
            None | Some(Value::Null) => None,
            Some(Value::String(topic)) if topic.is_empty() => None,
            Some(Value::String(topic)) => Some(topic.clone()),
            Some(_) => {
                self.warn(format!("{label} topic is not a string, ignoring"));
                None
            }
        };

        let default = match entry.get("default") {
            None => definition.default.clone(),
            Some(value) => value_for_kind(definition.kind, value).unwrap_or_else(|| {
                self.warn(format!(
                    "{label} default is not a valid {}, using schema default",
                    definition.kind
                ));
                definition.default.clone()
            }),
        };

        (default, topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use serde_json::json;

    fn fixture() -> (SchemaRegistry, BusSession) {
        let registry = SchemaRegistry::new();
        registry
            .register(
                WidgetSchema::builder("gyro", "Gyro")
                    .property("angle", 0.0)
                    .property("ticks", vec![0i64])
                    .min_size(2, 2)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(WidgetSchema::builder("label", "Label").property("text", "").build().unwrap())
            .unwrap();
        (registry, BusSession::new(SessionConfig::default()))
    }

    fn only_element(layout: &Layout) -> &Element {
        layout.tabs.values().next().unwrap().elements.values().next().unwrap()
    }

    #[test]
    fn placeholder_names_count_only_unnamed_tabs() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"elements": []}, {"name": "Drive", "elements": []}, {}, 3]});
        let result = compile(&doc, &registry, &session);
        let layout = result.layout.unwrap();

        let names: Vec<_> = layout.tabs.values().map(|t| t.name.read()).collect();
        assert_eq!(names, ["New Tab 0", "Drive", "New Tab 1"]);
        assert_eq!(result.report.warnings.len(), 2, "{:?}", result.report.warnings);
    }

    #[test]
    fn element_name_falls_back_to_type() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"name": "T", "elements": [
            {"type": "label", "layout": {"x": 1, "y": 1, "width": 1, "height": 1}}
        ]}]});
        let result = compile(&doc, &registry, &session);
        let element = only_element(result.layout.as_ref().unwrap());
        assert_eq!(element.name.read(), "label");
        assert_eq!(element.widget_type.read(), "label");
        assert!(result.report.warnings.is_empty(), "{:?}", result.report.warnings);
    }

    #[test]
    fn data_sources_accept_string_or_list() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"elements": [
            {"type": "label", "data": "/a", "layout": {}},
            {"type": "label", "data": ["/a", "/b"], "layout": {}},
            {"type": "label", "data": [1], "layout": {}},
            {"type": "label", "layout": {}}
        ]}]});
        let result = compile(&doc, &registry, &session);
        let layout = result.layout.unwrap();
        let data: Vec<_> = layout.tabs[0].elements.values().map(|e| e.data.read()).collect();
        assert_eq!(data[0], ["/a"]);
        assert_eq!(data[1], ["/a", "/b"]);
        assert!(data[2].is_empty());
        assert!(data[3].is_empty());
        assert_eq!(result.report.warnings.len(), 1);
    }

    #[test]
    fn geometry_rounds_and_clamps() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"elements": [
            {"type": "gyro", "layout": {"x": 3.6, "y": -2, "width": 1, "height": "tall"}}
        ]}]});
        let result = compile(&doc, &registry, &session);
        let element = only_element(result.layout.as_ref().unwrap());
        let l = &element.layout;
        assert_eq!((l.x.read(), l.y.read(), l.width.read(), l.height.read()), (4, 1, 2, 2));
        assert_eq!(result.report.warnings.len(), 1);
        assert!(result.report.warnings[0].contains("y, width"));
    }

    #[test]
    fn property_overrides_are_validated() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"elements": [{
            "type": "gyro",
            "layout": {},
            "meta": {
                "gyro": {
                    "angle": {"topic": "/gyro/angle", "default": 90},
                    "ticks": {"default": [1, 2.5]}
                },
                "label": {"text": {"default": "heading", "topic": 4}},
                "unknown": {"whatever": {}}
            }
        }]}]});
        let result = compile(&doc, &registry, &session);
        let element = only_element(result.layout.as_ref().unwrap());

        let angle = element.property("gyro", "angle").unwrap();
        assert_eq!(angle.kind(), TopicKind::Double);
        assert_eq!(angle.value(), TopicValue::Double(90.0));
        assert_eq!(angle.bound_key().as_deref(), Some("/gyro/angle"));

        let ticks = element.property("gyro", "ticks").unwrap();
        assert_eq!(ticks.value(), TopicValue::IntegerArray(vec![0]));

        let text = element.property("label", "text").unwrap();
        assert_eq!(text.value(), TopicValue::from("heading"));
        assert_eq!(text.bound_key(), None);

        assert!(!element.meta.contains_key("unknown"));
        // bad ticks default, non-string topic
        assert_eq!(result.report.warnings.len(), 2, "{:?}", result.report.warnings);
        assert_eq!(session.binding_count(), 1);
    }

    #[test]
    fn non_object_meta_is_reported() {
        let (registry, session) = fixture();
        let doc = json!({"tabs": [{"elements": [
            {"type": "label", "layout": {}, "meta": []},
            {"type": "label", "layout": {}, "meta": {"label": {"text": "oops"}}}
        ]}]});
        let result = compile(&doc, &registry, &session);
        let layout = result.layout.unwrap();
        for element in layout.tabs[0].elements.values() {
            assert_eq!(element.property("label", "text").unwrap().value(), TopicValue::from(""));
        }
        assert_eq!(result.report.warnings.len(), 2);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let (registry, session) = fixture();
        let result = compile_str("{tabs:", &registry, &session);
        assert!(result.layout.is_none());
        assert_eq!(result.report.errors.len(), 1);
    }
}
