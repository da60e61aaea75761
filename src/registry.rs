//! Class-name to wrapper mapping.
//!
//! The browser reports a `className` for every remote object. Known DOM classes resolve to
//! an [`ElementKind`], which is a closed set of wrapper tags; construction switches on
//! the tag instead of using dynamic dispatch. The table is built once at start-up and is
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::frame::Frame;
use crate::handle::{ElementHandle, JsHandle, TypedHandle};

static GLOBAL: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::builtin()));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Document,
    Element,
    Html,
    Anchor,
    Body,
    Button,
    Div,
    Form,
    IFrame,
    Image,
    Input,
    Label,
    Option,
    Select,
    Span,
    Table,
    TextArea,
}

impl ElementKind {
    /// Wrapper name used in diagnostics (`ContextMismatch`, `HandleDisposed`).
    pub fn type_name(self) -> &'static str {
        match self {
            ElementKind::Document => "Document",
            ElementKind::Element => "Element",
            ElementKind::Html => "HtmlElement",
            ElementKind::Anchor => "HtmlAnchorElement",
            ElementKind::Body => "HtmlBodyElement",
            ElementKind::Button => "HtmlButtonElement",
            ElementKind::Div => "HtmlDivElement",
            ElementKind::Form => "HtmlFormElement",
            ElementKind::IFrame => "HtmlIFrameElement",
            ElementKind::Image => "HtmlImageElement",
            ElementKind::Input => "HtmlInputElement",
            ElementKind::Label => "HtmlLabelElement",
            ElementKind::Option => "HtmlOptionElement",
            ElementKind::Select => "HtmlSelectElement",
            ElementKind::Span => "HtmlSpanElement",
            ElementKind::Table => "HtmlTableElement",
            ElementKind::TextArea => "HtmlTextAreaElement",
        }
    }

    /// Form controls expose `value`/`disabled` on the remote side.
    pub fn is_form_control(self) -> bool {
        matches!(
            self,
            ElementKind::Button
                | ElementKind::Input
                | ElementKind::Option
                | ElementKind::Select
                | ElementKind::TextArea
        )
    }

    pub(crate) fn construct(self, handle: JsHandle, frame: &Arc<Frame>) -> TypedHandle {
        TypedHandle::Element(ElementHandle::new(handle, frame, self))
    }
}

#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    classes: HashMap<&'static str, ElementKind>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Registry preloaded with the DOM classes shipped by the runtime.
    pub fn builtin() -> Self {
        Self::builder()
            .register("HTMLDocument", ElementKind::Document)
            .register("Document", ElementKind::Document)
            .register("XMLDocument", ElementKind::Document)
            .register("Element", ElementKind::Element)
            .register("SVGElement", ElementKind::Element)
            .register("HTMLElement", ElementKind::Html)
            .register("HTMLAnchorElement", ElementKind::Anchor)
            .register("HTMLBodyElement", ElementKind::Body)
            .register("HTMLButtonElement", ElementKind::Button)
            .register("HTMLDivElement", ElementKind::Div)
            .register("HTMLFormElement", ElementKind::Form)
            .register("HTMLIFrameElement", ElementKind::IFrame)
            .register("HTMLImageElement", ElementKind::Image)
            .register("HTMLInputElement", ElementKind::Input)
            .register("HTMLLabelElement", ElementKind::Label)
            .register("HTMLOptionElement", ElementKind::Option)
            .register("HTMLSelectElement", ElementKind::Select)
            .register("HTMLSpanElement", ElementKind::Span)
            .register("HTMLTableElement", ElementKind::Table)
            .register("HTMLTextAreaElement", ElementKind::TextArea)
            .build()
    }

    pub fn global() -> Arc<TypeRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn lookup(&self, class_name: &str) -> Option<ElementKind> {
        self.classes.get(class_name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    classes: HashMap<&'static str, ElementKind>,
}

impl TypeRegistryBuilder {
    /// Later registrations for the same class name replace earlier ones.
    pub fn register(mut self, class_name: &'static str, kind: ElementKind) -> Self {
        self.classes.insert(class_name, kind);
        self
    }

    pub fn extend_from(mut self, registry: &TypeRegistry) -> Self {
        for (name, kind) in &registry.classes {
            self.classes.entry(*name).or_insert(*kind);
        }
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            classes: self.classes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_maps_document_and_controls() {
        let registry = TypeRegistry::builtin();
        assert_eq!(registry.lookup("HTMLDocument"), Some(ElementKind::Document));
        assert_eq!(registry.lookup("HTMLInputElement"), Some(ElementKind::Input));
        assert!(registry.lookup("Window").is_none());
        assert!(ElementKind::Select.is_form_control());
        assert!(!ElementKind::Div.is_form_control());
    }

    #[test]
    fn builder_overrides_and_extends() {
        let registry = TypeRegistry::builder()
            .register("HTMLDivElement", ElementKind::Element)
            .extend_from(&TypeRegistry::builtin())
            .build();
        assert_eq!(registry.lookup("HTMLDivElement"), Some(ElementKind::Element));
        assert_eq!(registry.lookup("HTMLFormElement"), Some(ElementKind::Form));
        assert_eq!(ElementKind::Form.type_name(), "HtmlFormElement");
    }
}
