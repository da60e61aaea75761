//! Worlds.
//!
//! A [`World`] is the per-frame, per-isolation-level slot holding the realm currently bound
//! to that frame. Every frame has a main world (the page's own scripts) and a secondary
//! world (an isolated realm reserved for runtime-internal evaluation). Worlds rebind on
//! every navigation and are detached for good when their frame goes away.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{DomError, Result};
use crate::execution::ExecutionContext;
use crate::frame::Frame;
use crate::handle::{ElementHandle, JsHandle, RemoteHandle};
use crate::value::{JsArg, JsValue};
use crate::wait_task::{
    PredicateMode, WaitForOptions, WaitForSelectorOptions, WaitTask, WaitTaskOptions,
    SELECTOR_PREDICATE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldKind {
    Main,
    Secondary,
}

#[derive(Clone)]
enum ContextSlot {
    Pending,
    Bound(ExecutionContext),
    Detached,
}

pub struct World {
    frame: Weak<Frame>,
    kind: WorldKind,
    config: Arc<RuntimeConfig>,
    slot: watch::Sender<ContextSlot>,
    document: Mutex<Option<ElementHandle>>,
    wait_tasks: DashMap<u64, Arc<WaitTask>>,
    next_task_id: AtomicU64,
    detached: AtomicBool,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("kind", &self.kind)
            .field("bound", &self.has_context())
            .field("wait_tasks", &self.wait_tasks.len())
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl World {
    pub(crate) fn new(frame: Weak<Frame>, kind: WorldKind, config: Arc<RuntimeConfig>) -> Self {
        let (slot, _) = watch::channel(ContextSlot::Pending);
        Self {
            frame,
            kind,
            config,
            slot,
            document: Mutex::new(None),
            wait_tasks: DashMap::new(),
            next_task_id: AtomicU64::new(1),
            detached: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> WorldKind {
        self.kind
    }

    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.frame.upgrade()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn has_context(&self) -> bool {
        matches!(*self.slot.borrow(), ContextSlot::Bound(_))
    }

    /// The bound realm, without waiting.
    pub fn current_context(&self) -> Option<ExecutionContext> {
        match &*self.slot.borrow() {
            ContextSlot::Bound(context) => Some(context.clone()),
            _ => None,
        }
    }

    pub fn is_bound_to(&self, context: &ExecutionContext) -> bool {
        match &*self.slot.borrow() {
            ContextSlot::Bound(bound) => bound.ptr_eq(context),
            _ => false,
        }
    }

    pub fn pending_wait_tasks(&self) -> usize {
        self.wait_tasks.len()
    }

    /// Resolves once a realm is bound. Fails right away once the world is detached.
    pub async fn execution_context(&self) -> Result<ExecutionContext> {
        self.wait_for_context(None).await
    }

    /// Like [`execution_context`](Self::execution_context) but skips `stale`.
    pub(crate) async fn next_execution_context(
        &self,
        stale: &ExecutionContext,
    ) -> Result<ExecutionContext> {
        self.wait_for_context(Some(stale)).await
    }

    async fn wait_for_context(&self, stale: Option<&ExecutionContext>) -> Result<ExecutionContext> {
        let mut slot = self.slot.subscribe();
        loop {
            if self.is_detached() {
                return Err(self.detached_error());
            }
            let current = slot.borrow_and_update().clone();
            match current {
                ContextSlot::Bound(context)
                    if !stale.is_some_and(|stale| stale.ptr_eq(&context)) =>
                {
                    return Ok(context)
                }
                ContextSlot::Detached => return Err(self.detached_error()),
                _ => {}
            }
            if slot.changed().await.is_err() {
                return Err(self.detached_error());
            }
        }
    }

    /// Binds `context`, or clears the binding with `None`.
    ///
    /// Binding wakes every caller waiting for a realm and reruns the live wait tasks.
    pub(crate) fn set_context(&self, context: Option<ExecutionContext>) {
        if self.is_detached() {
            return;
        }
        self.document.lock().take();
        match context {
            Some(context) => {
                debug!(
                    target: "dom-runtime",
                    world = ?self.kind,
                    context = %context.id(),
                    "world bound to execution context"
                );
                self.slot.send_replace(ContextSlot::Bound(context));
                for task in self.live_tasks() {
                    task.rerun();
                }
            }
            None => {
                self.slot.send_replace(ContextSlot::Pending);
            }
        }
    }

    /// Clears the binding when it is `context`. Returns whether anything changed.
    pub(crate) fn clear_context_if(&self, context: &ExecutionContext) -> bool {
        if !self.is_bound_to(context) {
            return false;
        }
        self.set_context(None);
        true
    }

    /// Marks the world detached and fails every outstanding wait.
    pub(crate) fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.document.lock().take();
        self.slot.send_replace(ContextSlot::Detached);
        let tasks = self.live_tasks();
        self.wait_tasks.clear();
        for task in tasks {
            task.terminate(self.detached_error());
        }
    }

    pub(crate) fn detached_error(&self) -> DomError {
        DomError::WorldDetached {
            url: self.frame().map(|frame| frame.url()).unwrap_or_default(),
        }
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_task(&self, id: u64, task: Arc<WaitTask>) {
        self.wait_tasks.insert(id, task);
    }

    pub(crate) fn unregister_task(&self, id: u64) {
        self.wait_tasks.remove(&id);
    }

    fn live_tasks(&self) -> Vec<Arc<WaitTask>> {
        self.wait_tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The realm's `document`, cached until the realm changes.
    pub async fn document(&self) -> Result<ElementHandle> {
        let context = self.execution_context().await?;
        if let Some(cached) = self.cached_document(&context) {
            return Ok(cached);
        }
        let document = context
            .evaluate_expression_handle::<ElementHandle>("document")
            .await?
            .ok_or_else(|| DomError::validation("document is not available in this realm"))?;
        let existing = {
            let mut cached = self.document.lock();
            match cached.as_ref() {
                Some(current) if current.context().ptr_eq(&context) => Some(current.clone()),
                _ => {
                    if self.is_bound_to(&context) {
                        *cached = Some(document.clone());
                    }
                    None
                }
            }
        };
        if let Some(existing) = existing {
            document.dispose().await;
            return Ok(existing);
        }
        Ok(document)
    }

    fn cached_document(&self, context: &ExecutionContext) -> Option<ElementHandle> {
        self.document
            .lock()
            .as_ref()
            .filter(|document| document.context().ptr_eq(context))
            .cloned()
    }

    pub async fn evaluate_expression_value(&self, expression: &str) -> Result<JsValue> {
        self.execution_context()
            .await?
            .evaluate_expression_value(expression)
            .await
    }

    pub async fn evaluate_expression_handle<T: RemoteHandle>(
        &self,
        expression: &str,
    ) -> Result<Option<T>> {
        self.execution_context()
            .await?
            .evaluate_expression_handle::<T>(expression)
            .await
    }

    pub async fn evaluate_function_value(&self, function: &str, args: Vec<JsArg>) -> Result<JsValue> {
        self.execution_context()
            .await?
            .evaluate_function_value(function, args)
            .await
    }

    pub async fn evaluate_function_handle<T: RemoteHandle>(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<Option<T>> {
        self.execution_context()
            .await?
            .evaluate_function_handle::<T>(function, args)
            .await
    }

    pub async fn query_selector(&self, selector: &str) -> Result<Option<ElementHandle>> {
        self.document().await?.query_selector(selector).await
    }

    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.document().await?.query_selector_all(selector).await
    }

    pub async fn xpath(&self, expression: &str) -> Result<Vec<ElementHandle>> {
        self.document().await?.xpath(expression).await
    }

    pub async fn wait_for_selector(
        self: &Arc<Self>,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<ElementHandle>> {
        self.wait_for_node(selector, false, options).await
    }

    pub async fn wait_for_xpath(
        self: &Arc<Self>,
        expression: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<ElementHandle>> {
        self.wait_for_node(expression, true, options).await
    }

    pub async fn wait_for_function(
        self: &Arc<Self>,
        function: &str,
        options: WaitForOptions,
        args: Vec<JsArg>,
    ) -> Result<JsHandle> {
        let task = WaitTask::spawn(
            self,
            WaitTaskOptions {
                predicate: function.to_string(),
                mode: PredicateMode::Function,
                title: "function".to_string(),
                polling: options.polling,
                timeout: self.resolve_timeout(options.timeout),
                args,
            },
        )?;
        task.wait().await
    }

    pub async fn wait_for_expression(
        self: &Arc<Self>,
        expression: &str,
        options: WaitForOptions,
    ) -> Result<JsHandle> {
        let task = WaitTask::spawn(
            self,
            WaitTaskOptions {
                predicate: expression.to_string(),
                mode: PredicateMode::Expression,
                title: "expression".to_string(),
                polling: options.polling,
                timeout: self.resolve_timeout(options.timeout),
                args: Vec::new(),
            },
        )?;
        task.wait().await
    }

    async fn wait_for_node(
        self: &Arc<Self>,
        query: &str,
        is_xpath: bool,
        options: WaitForSelectorOptions,
    ) -> Result<Option<ElementHandle>> {
        let label = if is_xpath { "XPath" } else { "selector" };
        let suffix = if options.hidden { " to be hidden" } else { "" };
        let task = WaitTask::spawn(
            self,
            WaitTaskOptions {
                predicate: SELECTOR_PREDICATE.to_string(),
                mode: PredicateMode::Function,
                title: format!("{label} `{query}`{suffix}"),
                polling: options.polling(),
                timeout: self.resolve_timeout(options.timeout),
                args: vec![
                    query.into(),
                    is_xpath.into(),
                    options.visible.into(),
                    options.hidden.into(),
                ],
            },
        )?;
        let handle = task.wait().await?;
        let context = handle.context().clone();
        Ok(context.cast::<ElementHandle>(handle).await)
    }

    /// Resolves `element` from another world into this world's realm.
    pub async fn adopt_handle(&self, element: &ElementHandle) -> Result<ElementHandle> {
        let context = self.execution_context().await?;
        context.adopt_element(element).await
    }

    /// Moves `element` into this world and disposes the original.
    pub async fn transfer_handle(&self, element: ElementHandle) -> Result<ElementHandle> {
        let context = self.execution_context().await?;
        if element.context().ptr_eq(&context) {
            return Ok(element);
        }
        let adopted = context.adopt_element(&element).await;
        element.dispose().await;
        adopted
    }

    fn resolve_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or_else(|| self.config.default_timeout())
    }
}
