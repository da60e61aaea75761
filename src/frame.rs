//! Frames.
//!
//! A [`Frame`] is one node of the page's frame tree. Parents own their children; children
//! only point back at their parent. Each frame owns a main and a secondary [`World`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cdp_adapter::protocol::FramePayload;
use cdp_adapter::FrameId;
use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::handle::{ElementHandle, JsHandle, RemoteHandle};
use crate::value::{JsArg, JsValue};
use crate::wait_task::{WaitForOptions, WaitForSelectorOptions};
use crate::world::{World, WorldKind};

pub struct Frame {
    id: RwLock<FrameId>,
    parent: Option<Weak<Frame>>,
    children: RwLock<Vec<Arc<Frame>>>,
    name: RwLock<String>,
    url: RwLock<String>,
    loader_id: RwLock<String>,
    lifecycle: RwLock<HashSet<String>>,
    detached: AtomicBool,
    main_world: Arc<World>,
    secondary_world: Arc<World>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &*self.id.read())
            .field("url", &*self.url.read())
            .field("children", &self.children.read().len())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl Frame {
    /// Creates a frame and links it under `parent`.
    pub(crate) fn new(
        id: FrameId,
        parent: Option<&Arc<Frame>>,
        config: Arc<RuntimeConfig>,
    ) -> Arc<Frame> {
        let frame = Arc::new_cyclic(|weak: &Weak<Frame>| Frame {
            id: RwLock::new(id),
            parent: parent.map(Arc::downgrade),
            children: RwLock::new(Vec::new()),
            name: RwLock::new(String::new()),
            url: RwLock::new(String::new()),
            loader_id: RwLock::new(String::new()),
            lifecycle: RwLock::new(HashSet::new()),
            detached: AtomicBool::new(false),
            main_world: Arc::new(World::new(weak.clone(), WorldKind::Main, Arc::clone(&config))),
            secondary_world: Arc::new(World::new(
                weak.clone(),
                WorldKind::Secondary,
                Arc::clone(&config),
            )),
        });
        if let Some(parent) = parent {
            parent.children.write().push(Arc::clone(&frame));
        }
        frame
    }

    pub fn id(&self) -> FrameId {
        self.id.read().clone()
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    pub fn loader_id(&self) -> String {
        self.loader_id.read().clone()
    }

    pub fn parent_frame(&self) -> Option<Arc<Frame>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn child_frames(&self) -> Vec<Arc<Frame>> {
        self.children.read().clone()
    }

    pub fn is_main_frame(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn main_world(&self) -> &Arc<World> {
        &self.main_world
    }

    pub fn secondary_world(&self) -> &Arc<World> {
        &self.secondary_world
    }

    pub fn world(&self, kind: WorldKind) -> &Arc<World> {
        match kind {
            WorldKind::Main => &self.main_world,
            WorldKind::Secondary => &self.secondary_world,
        }
    }

    pub fn has_lifecycle_event(&self, name: &str) -> bool {
        self.lifecycle.read().contains(name)
    }

    pub fn lifecycle_events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.lifecycle.read().iter().cloned().collect();
        events.sort();
        events
    }

    pub(crate) fn set_id(&self, id: FrameId) {
        *self.id.write() = id;
    }

    pub(crate) fn navigated(&self, payload: &FramePayload) {
        *self.name.write() = payload.name.clone().unwrap_or_default();
        let mut url = payload.url.clone();
        if let Some(fragment) = &payload.url_fragment {
            url.push_str(fragment);
        }
        *self.url.write() = url;
        if !payload.loader_id.is_empty() {
            *self.loader_id.write() = payload.loader_id.clone();
        }
    }

    pub(crate) fn navigated_within_document(&self, url: &str) {
        *self.url.write() = url.to_string();
    }

    /// `init` starts a new document and forgets the previous document's events.
    pub(crate) fn on_lifecycle_event(&self, loader_id: &str, name: &str) {
        let mut lifecycle = self.lifecycle.write();
        if name == "init" {
            *self.loader_id.write() = loader_id.to_string();
            lifecycle.clear();
        }
        lifecycle.insert(name.to_string());
    }

    pub(crate) fn on_loading_stopped(&self) {
        let mut lifecycle = self.lifecycle.write();
        lifecycle.insert("DOMContentLoaded".to_string());
        lifecycle.insert("load".to_string());
    }

    /// Detaches this frame only; the manager walks the subtree.
    pub(crate) fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.main_world.detach();
        self.secondary_world.detach();
        if let Some(parent) = self.parent_frame() {
            parent
                .children
                .write()
                .retain(|child| !std::ptr::eq(Arc::as_ptr(child), self));
        }
    }

    pub async fn evaluate_expression_value(&self, expression: &str) -> Result<JsValue> {
        self.main_world.evaluate_expression_value(expression).await
    }

    pub async fn evaluate_expression_handle<T: RemoteHandle>(
        &self,
        expression: &str,
    ) -> Result<Option<T>> {
        self.main_world.evaluate_expression_handle::<T>(expression).await
    }

    pub async fn evaluate_function_value(&self, function: &str, args: Vec<JsArg>) -> Result<JsValue> {
        self.main_world.evaluate_function_value(function, args).await
    }

    pub async fn evaluate_function_handle<T: RemoteHandle>(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<Option<T>> {
        self.main_world
            .evaluate_function_handle::<T>(function, args)
            .await
    }

    pub async fn document(&self) -> Result<ElementHandle> {
        self.main_world.document().await
    }

    pub async fn query_selector(&self, selector: &str) -> Result<Option<ElementHandle>> {
        self.main_world.query_selector(selector).await
    }

    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.main_world.query_selector_all(selector).await
    }

    pub async fn xpath(&self, expression: &str) -> Result<Vec<ElementHandle>> {
        self.main_world.xpath(expression).await
    }

    /// Waits in the secondary world so page scripts cannot interfere, then hands the node
    /// over to the main world.
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<ElementHandle>> {
        let found = self
            .secondary_world
            .wait_for_selector(selector, options)
            .await?;
        self.adopt_into_main_world(found).await
    }

    pub async fn wait_for_xpath(
        &self,
        expression: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<ElementHandle>> {
        let found = self
            .secondary_world
            .wait_for_xpath(expression, options)
            .await?;
        self.adopt_into_main_world(found).await
    }

    pub async fn wait_for_function(
        &self,
        function: &str,
        options: WaitForOptions,
        args: Vec<JsArg>,
    ) -> Result<JsHandle> {
        self.main_world
            .wait_for_function(function, options, args)
            .await
    }

    pub async fn wait_for_expression(
        &self,
        expression: &str,
        options: WaitForOptions,
    ) -> Result<JsHandle> {
        self.main_world
            .wait_for_expression(expression, options)
            .await
    }

    async fn adopt_into_main_world(&self, found: Option<ElementHandle>) -> Result<Option<ElementHandle>> {
        match found {
            Some(element) => Ok(Some(self.main_world.transfer_handle(element).await?)),
            None => Ok(None),
        }
    }
}
