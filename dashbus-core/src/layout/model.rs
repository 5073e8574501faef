//! The compiled layout tree.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::bus::{PropertyCell, RemoteCell};
use crate::topic::TopicValue;

macro_rules! layout_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(Uuid);

        impl $name {
            pub(crate) fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

layout_id! {
    /// Process-generated tab id; unrelated to anything in the document.
    TabId
}

layout_id! {
    /// Process-generated element id; unrelated to anything in the document.
    ElementId
}

/// Grid placement of an element. Every field is at least 1.
#[derive(Debug, Clone)]
pub struct ElementLayout {
    pub x: RemoteCell<i64>,
    pub y: RemoteCell<i64>,
    pub width: RemoteCell<i64>,
    pub height: RemoteCell<i64>,
}

/// Property cells of one element: widget type id, then property name.
pub type ElementMeta = IndexMap<String, IndexMap<String, PropertyCell>>;

#[derive(Debug, Clone)]
pub struct Element {
    pub name: RemoteCell<String>,
    pub widget_type: RemoteCell<String>,
    /// Data source keys the widget reads from.
    pub data: RemoteCell<Vec<String>>,
    pub layout: ElementLayout,
    pub meta: ElementMeta,
}

impl Element {
    /// The cell for `property` of widget type `widget`.
    pub fn property(&self, widget: &str, property: &str) -> Option<&PropertyCell> {
        self.meta.get(widget)?.get(property)
    }
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub name: RemoteCell<String>,
    pub elements: IndexMap<ElementId, Element>,
}

/// A compiled dashboard layout: tabs in document order.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub tabs: IndexMap<TabId, Tab>,
}

impl Layout {
    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.get(&id)
    }

    /// Find an element in any tab.
    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.tabs.values().find_map(|tab| tab.elements.get(&id))
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.tabs.values().map(|tab| tab.elements.len()).sum()
    }

    /// Current values of the whole tree, without ids.
    ///
    /// Two layouts compiled from the same document have equal snapshots.
    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            tabs: self.tabs.values().map(Tab::snapshot).collect(),
        }
    }
}

impl Tab {
    fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            name: self.name.read(),
            elements: self.elements.values().map(Element::snapshot).collect(),
        }
    }
}

impl Element {
    fn snapshot(&self) -> ElementSnapshot {
        let meta = self
            .meta
            .iter()
            .map(|(widget, properties)| {
                let properties = properties
                    .iter()
                    .map(|(name, cell)| {
                        let snapshot = PropertySnapshot {
                            value: cell.value(),
                            topic: cell.bound_key(),
                        };
                        (name.clone(), snapshot)
                    })
                    .collect();
                (widget.clone(), properties)
            })
            .collect();

        ElementSnapshot {
            name: self.name.read(),
            widget_type: self.widget_type.read(),
            data: self.data.read(),
            x: self.layout.x.read(),
            y: self.layout.y.read(),
            width: self.layout.width.read(),
            height: self.layout.height.read(),
            meta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSnapshot {
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabSnapshot {
    pub name: String,
    pub elements: Vec<ElementSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub widget_type: String,
    pub data: Vec<String>,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub meta: IndexMap<String, IndexMap<String, PropertySnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySnapshot {
    pub value: TopicValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}
