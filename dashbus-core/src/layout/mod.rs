//! Layouts: compiling documents into cell trees and holding the current one.

mod compiler;
mod model;
mod store;

pub use compiler::{compile, compile_str, Compilation, CompileReport};
pub use model::{
    Element, ElementId, ElementLayout, ElementMeta, ElementSnapshot, Layout, LayoutSnapshot,
    PropertySnapshot, Tab, TabId, TabSnapshot,
};
pub use store::LayoutStore;
