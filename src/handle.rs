//! Remote handles.
//!
//! A handle is a local reference to a value living in one realm. Object-valued handles pin
//! memory in the browser until they are disposed; primitive-valued handles carry their value
//! inline. Disposal is idempotent and never fails from the caller's point of view.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use cdp_adapter::protocol::GetPropertiesResponse;
use cdp_adapter::{RemoteObject, RemoteObjectId};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{DomError, Result};
use crate::execution::ExecutionContext;
use crate::frame::Frame;
use crate::metrics;
use crate::registry::ElementKind;
use crate::value::{JsArg, JsValue};

/// Which wrapper family a caller asks an evaluation to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Js,
    Element,
}

/// A freshly created handle, tagged with the wrapper the registry picked for it.
#[derive(Clone, Debug)]
pub enum TypedHandle {
    Js(JsHandle),
    Element(ElementHandle),
}

impl TypedHandle {
    pub fn into_js(self) -> JsHandle {
        match self {
            TypedHandle::Js(handle) => handle,
            TypedHandle::Element(element) => element.handle,
        }
    }
}

#[async_trait]
pub trait RemoteHandle: Clone + Send + Sync + 'static {
    const KIND: HandleKind;

    fn js_handle(&self) -> &JsHandle;

    /// Wrapper name used in error messages.
    fn type_name(&self) -> &'static str;

    /// Narrows a typed handle to `Self`, handing it back when it is another wrapper.
    fn from_typed(handle: TypedHandle) -> std::result::Result<Self, TypedHandle>;

    async fn dispose(&self) {
        self.js_handle().dispose().await;
    }
}

struct HandleInner {
    context: ExecutionContext,
    remote: RemoteObject,
    disposed: AtomicBool,
}

/// Generic handle to any remote value.
#[derive(Clone)]
pub struct JsHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for JsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsHandle")
            .field("context", &self.inner.context.id())
            .field("object_id", &self.inner.remote.object_id)
            .field("class_name", &self.inner.remote.class_name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl JsHandle {
    pub(crate) fn new(context: ExecutionContext, remote: RemoteObject) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                context,
                remote,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    pub fn remote(&self) -> &RemoteObject {
        &self.inner.remote
    }

    pub fn object_id(&self) -> Option<&RemoteObjectId> {
        self.inner.remote.object_id.as_ref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.inner.remote.class_name.as_deref()
    }

    pub fn is_primitive(&self) -> bool {
        self.inner.remote.is_primitive()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Local truthiness. Object references are always truthy.
    pub fn is_truthy(&self) -> bool {
        if self.inner.remote.object_id.is_some() {
            return true;
        }
        JsValue::from_remote(&self.inner.remote).is_truthy()
    }

    /// Releases the remote object. Only the first call talks to the browser; release
    /// failures are logged and counted.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(object_id) = self.inner.remote.object_id.clone() else {
            return;
        };
        let session = self.inner.context.session();
        match session
            .send("Runtime.releaseObject", json!({ "objectId": object_id }))
            .await
        {
            Ok(_) => metrics::record_handle_released(),
            Err(err) => {
                metrics::record_release_failure();
                warn!(
                    target: "dom-runtime",
                    object_id = %object_id,
                    error = %err,
                    "failed to release remote object"
                );
            }
        }
    }

    /// Schedules [`dispose`](Self::dispose) on the current runtime. Used from `Drop`.
    pub fn release_in_background(&self) {
        if self.is_disposed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = self.clone();
                runtime.spawn(async move { handle.dispose().await });
            }
            Err(_) => {
                debug!(
                    target: "dom-runtime",
                    object_id = ?self.inner.remote.object_id,
                    "no runtime available to release remote object"
                );
            }
        }
    }

    /// Value of the handle, fetched by value when it is an object reference.
    pub async fn json_value(&self) -> Result<JsValue> {
        self.ensure_alive()?;
        if self.is_primitive() {
            return Ok(JsValue::from_remote(&self.inner.remote));
        }
        self.inner
            .context
            .evaluate_function_value("object => object", vec![self.into()])
            .await
    }

    pub async fn get_property(&self, name: &str) -> Result<JsHandle> {
        self.ensure_alive()?;
        self.inner
            .context
            .evaluate_function_handle::<JsHandle>(
                "(object, name) => object[name]",
                vec![self.into(), name.into()],
            )
            .await?
            .ok_or_else(|| DomError::validation(format!("property `{name}` is not available")))
    }

    /// Enumerable own properties keyed by name. Primitive handles have none.
    pub async fn get_properties(&self) -> Result<Vec<(String, JsHandle)>> {
        let descriptors = self.own_properties().await?;
        Ok(descriptors
            .into_iter()
            .filter_map(|(name, remote)| {
                remote.map(|remote| (name, JsHandle::new(self.inner.context.clone(), remote)))
            })
            .collect())
    }

    /// Items of an array-like object in index order, wrapped through the registry.
    ///
    /// Entries without a value, or whose value no `T` can represent, come back as `None`.
    pub async fn array_items<T: RemoteHandle>(&self) -> Result<Vec<Option<T>>> {
        let mut indexed: Vec<(usize, Option<RemoteObject>)> = self
            .own_properties()
            .await?
            .into_iter()
            .filter_map(|(name, remote)| name.parse::<usize>().ok().map(|index| (index, remote)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let mut items = Vec::with_capacity(indexed.len());
        for (_, remote) in indexed {
            let item = match remote {
                Some(remote) => {
                    let handle = JsHandle::new(self.inner.context.clone(), remote);
                    self.inner.context.cast::<T>(handle).await
                }
                None => None,
            };
            items.push(item);
        }
        Ok(items)
    }

    async fn own_properties(&self) -> Result<Vec<(String, Option<RemoteObject>)>> {
        self.ensure_alive()?;
        let Some(object_id) = self.inner.remote.object_id.clone() else {
            return Ok(Vec::new());
        };
        let response: GetPropertiesResponse = self
            .inner
            .context
            .session()
            .call(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true }),
            )
            .await?;
        Ok(response
            .result
            .into_iter()
            .filter(|descriptor| descriptor.enumerable)
            .map(|descriptor| (descriptor.name, descriptor.value))
            .collect())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DomError::HandleDisposed {
                type_name: RemoteHandle::type_name(self),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteHandle for JsHandle {
    const KIND: HandleKind = HandleKind::Js;

    fn js_handle(&self) -> &JsHandle {
        self
    }

    fn type_name(&self) -> &'static str {
        "JsHandle"
    }

    fn from_typed(handle: TypedHandle) -> std::result::Result<Self, TypedHandle> {
        Ok(handle.into_js())
    }
}

const QUERY_SELECTOR: &str = "(element, selector) => element.querySelector(selector)";
const QUERY_SELECTOR_ALL: &str =
    "(element, selector) => Array.from(element.querySelectorAll(selector))";
const XPATH: &str = r#"(element, expression) => {
  const document = element.ownerDocument || element;
  const iterator = document.evaluate(expression, element, null, XPathResult.ORDERED_NODE_ITERATOR_TYPE, null);
  const nodes = [];
  let node;
  while ((node = iterator.iterateNext())) {
    nodes.push(node);
  }
  return nodes;
}"#;
const GET_ATTRIBUTE: &str = "(element, name) => element.getAttribute(name)";

/// Handle to a DOM node, owned by the frame whose realm produced it.
#[derive(Clone)]
pub struct ElementHandle {
    handle: JsHandle,
    frame: Weak<Frame>,
    kind: ElementKind,
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementHandle")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish()
    }
}

impl ElementHandle {
    pub(crate) fn new(handle: JsHandle, frame: &Arc<Frame>, kind: ElementKind) -> Self {
        Self {
            handle,
            frame: Arc::downgrade(frame),
            kind,
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.frame.upgrade()
    }

    pub fn context(&self) -> &ExecutionContext {
        self.handle.context()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }

    pub async fn dispose(&self) {
        self.handle.dispose().await;
    }

    pub async fn query_selector(&self, selector: &str) -> Result<Option<ElementHandle>> {
        self.evaluate_function_handle::<ElementHandle>(QUERY_SELECTOR, vec![selector.into()])
            .await
    }

    pub async fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.collect_nodes(QUERY_SELECTOR_ALL, selector).await
    }

    pub async fn xpath(&self, expression: &str) -> Result<Vec<ElementHandle>> {
        self.collect_nodes(XPATH, expression).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .evaluate_function_value(GET_ATTRIBUTE, vec![name.into()])
            .await?;
        Ok(match value {
            JsValue::String(text) => Some(text),
            _ => None,
        })
    }

    /// Calls `function` with this element as the first argument.
    pub async fn evaluate_function_value(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<JsValue> {
        self.handle
            .context()
            .evaluate_function_value(function, self.with_self(args))
            .await
    }

    pub async fn evaluate_function_handle<T: RemoteHandle>(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<Option<T>> {
        self.handle
            .context()
            .evaluate_function_handle::<T>(function, self.with_self(args))
            .await
    }

    fn with_self(&self, args: Vec<JsArg>) -> Vec<JsArg> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(JsArg::from(self));
        all.extend(args);
        all
    }

    async fn collect_nodes(&self, function: &str, query: &str) -> Result<Vec<ElementHandle>> {
        let Some(array) = self
            .evaluate_function_handle::<JsHandle>(function, vec![query.into()])
            .await?
        else {
            return Ok(Vec::new());
        };
        let items = array.array_items::<ElementHandle>().await;
        array.dispose().await;
        Ok(items?.into_iter().flatten().collect())
    }
}

#[async_trait]
impl RemoteHandle for ElementHandle {
    const KIND: HandleKind = HandleKind::Element;

    fn js_handle(&self) -> &JsHandle {
        &self.handle
    }

    fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    fn from_typed(handle: TypedHandle) -> std::result::Result<Self, TypedHandle> {
        match handle {
            TypedHandle::Element(element) => Ok(element),
            other => Err(other),
        }
    }
}

/// Owns a handle for a scope and releases it when the scope ends.
///
/// [`release`](Self::release) disposes in place; dropping an armed guard (early return,
/// panic, cancelled future) schedules the release on the current runtime instead.
pub struct HandleGuard<H: RemoteHandle> {
    handle: H,
    armed: bool,
}

impl<H: RemoteHandle> HandleGuard<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    pub async fn release(mut self) {
        self.armed = false;
        self.handle.dispose().await;
    }

    /// Hands the handle back without releasing it.
    pub fn into_inner(mut self) -> H {
        self.armed = false;
        self.handle.clone()
    }
}

impl<H: RemoteHandle> Deref for HandleGuard<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H: RemoteHandle> Drop for HandleGuard<H> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.js_handle().release_in_background();
        }
    }
}

/// Runs `scope` with `handle` and releases the handle afterwards on every exit path.
pub async fn with_handle<H, F, Fut, R>(handle: H, scope: F) -> R
where
    H: RemoteHandle,
    F: FnOnce(H) -> Fut,
    Fut: Future<Output = R>,
{
    let guard = HandleGuard::new(handle.clone());
    let result = scope(handle).await;
    guard.release().await;
    result
}
