//! Execution contexts.
//!
//! An [`ExecutionContext`] is one JavaScript realm: the default realm of a frame, an
//! isolated world created for tooling, or a realm with no frame at all (workers). It
//! evaluates expressions and functions, marshals arguments and wraps results into typed
//! handles.

use std::fmt;
use std::sync::{Arc, Weak};

use cdp_adapter::protocol::{
    DescribeNodeResponse, EvaluateResponse, ExceptionDetails, QueryObjectsResponse,
    ResolveNodeResponse,
};
use cdp_adapter::{CallArgument, CdpSession, ExecutionContextId, RemoteObject};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::error::{unreturnable_reason, DomError, Result};
use crate::frame::Frame;
use crate::handle::{ElementHandle, HandleKind, JsHandle, RemoteHandle, TypedHandle};
use crate::metrics;
use crate::registry::{ElementKind, TypeRegistry};
use crate::value::{JsArg, JsValue};
use crate::world::World;

static SOURCE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*//[@#] sourceURL=\s*(\S*?)\s*$").expect("valid regex"));

/// Where a realm sits in the frame tree.
#[derive(Clone, Default)]
pub struct ContextOwner {
    pub frame: Option<Weak<Frame>>,
    pub world: Option<Weak<World>>,
}

struct ContextInner {
    id: ExecutionContextId,
    session: CdpSession,
    owner: ContextOwner,
    registry: Arc<TypeRegistry>,
    config: Arc<RuntimeConfig>,
    origin: String,
    name: String,
}

/// Cheap to clone; clones refer to the same realm.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("name", &self.inner.name)
            .finish()
    }
}

enum Completion {
    Object(RemoteObject),
    Unreturnable(String),
}

impl ExecutionContext {
    pub(crate) fn new(
        id: ExecutionContextId,
        session: CdpSession,
        owner: ContextOwner,
        registry: Arc<TypeRegistry>,
        config: Arc<RuntimeConfig>,
        origin: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                session,
                owner,
                registry,
                config,
                origin: origin.into(),
                name: name.into(),
            }),
        }
    }

    pub fn id(&self) -> ExecutionContextId {
        self.inner.id
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.inner.owner.frame.as_ref().and_then(Weak::upgrade)
    }

    pub fn world(&self) -> Option<Arc<World>> {
        self.inner.owner.world.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn session(&self) -> &CdpSession {
        &self.inner.session
    }

    /// Identity comparison; two clones of one realm are equal.
    pub fn ptr_eq(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn evaluate_expression_value(&self, expression: &str) -> Result<JsValue> {
        match self.evaluate_expression(expression, true).await? {
            Completion::Object(remote) => Ok(JsValue::from_remote(&remote)),
            Completion::Unreturnable(reason) => Ok(JsValue::Unreturnable(reason)),
        }
    }

    /// Evaluates `expression` and wraps the result as `T`. `None` when the result cannot be
    /// represented as `T`; the remote object is released in that case.
    pub async fn evaluate_expression_handle<T: RemoteHandle>(
        &self,
        expression: &str,
    ) -> Result<Option<T>> {
        match self.evaluate_expression(expression, false).await? {
            Completion::Object(remote) => Ok(self.create_handle::<T>(remote).await),
            Completion::Unreturnable(_) => Ok(None),
        }
    }

    pub async fn evaluate_function_value(&self, function: &str, args: Vec<JsArg>) -> Result<JsValue> {
        match self.call_function(function, &args, true).await? {
            Completion::Object(remote) => Ok(JsValue::from_remote(&remote)),
            Completion::Unreturnable(reason) => Ok(JsValue::Unreturnable(reason)),
        }
    }

    pub async fn evaluate_function_handle<T: RemoteHandle>(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<Option<T>> {
        match self.call_function(function, &args, false).await? {
            Completion::Object(remote) => Ok(self.create_handle::<T>(remote).await),
            Completion::Unreturnable(_) => Ok(None),
        }
    }

    /// By-value call decoded into `R`. Values JSON cannot hold decode as `null`.
    pub async fn evaluate_function_as<R: DeserializeOwned>(
        &self,
        function: &str,
        args: Vec<JsArg>,
    ) -> Result<R> {
        let value = self.evaluate_function_value(function, args).await?;
        Ok(serde_json::from_value(value.into_json())?)
    }

    /// Runs `Runtime.queryObjects` for every live object sharing `prototype`.
    pub async fn query_objects(&self, prototype: Option<&JsHandle>) -> Result<JsHandle> {
        let prototype =
            prototype.ok_or_else(|| DomError::validation("Prototype handle must not be null"))?;
        if prototype.is_disposed() {
            return Err(DomError::validation("Prototype handle is disposed"));
        }
        let Some(object_id) = prototype.object_id() else {
            return Err(DomError::validation(
                "Prototype handle must not be referencing a primitive value",
            ));
        };
        let response: QueryObjectsResponse = self
            .inner
            .session
            .call(
                "Runtime.queryObjects",
                json!({ "prototypeObjectId": object_id }),
            )
            .await?;
        Ok(JsHandle::new(self.clone(), response.objects))
    }

    /// Resolves the node behind `element` (owned by another realm) inside this realm.
    pub async fn adopt_element(&self, element: &ElementHandle) -> Result<ElementHandle> {
        if element.context().ptr_eq(self) {
            return Err(DomError::CrossWorldAdopt(
                "handle already belongs to this execution context".into(),
            ));
        }
        if self.world().is_none() {
            return Err(DomError::CrossWorldAdopt(
                "execution context is not attached to a world".into(),
            ));
        }
        let Some(object_id) = element.js_handle().object_id() else {
            return Err(DomError::CrossWorldAdopt(
                "handle does not reference a node".into(),
            ));
        };
        if element.is_disposed() {
            return Err(DomError::HandleDisposed {
                type_name: element.type_name(),
            });
        }
        let described: DescribeNodeResponse = self
            .inner
            .session
            .call("DOM.describeNode", json!({ "objectId": object_id }))
            .await?;
        let resolved: ResolveNodeResponse = self
            .inner
            .session
            .call(
                "DOM.resolveNode",
                json!({
                    "backendNodeId": described.node.backend_node_id,
                    "executionContextId": self.inner.id,
                }),
            )
            .await?;
        self.create_handle::<ElementHandle>(resolved.object)
            .await
            .ok_or_else(|| DomError::CrossWorldAdopt("adopted node could not be wrapped".into()))
    }

    pub(crate) async fn create_handle<T: RemoteHandle>(&self, remote: RemoteObject) -> Option<T> {
        self.cast::<T>(JsHandle::new(self.clone(), remote)).await
    }

    /// Rewraps `handle` as `T`, releasing it when `T` cannot represent it.
    pub(crate) async fn cast<T: RemoteHandle>(&self, handle: JsHandle) -> Option<T> {
        let typed = match T::KIND {
            HandleKind::Js => Some(TypedHandle::Js(handle.clone())),
            HandleKind::Element => self.element_for(&handle),
        };
        let rejected = match typed {
            Some(typed) => match T::from_typed(typed) {
                Ok(wrapped) => return Some(wrapped),
                Err(other) => other.into_js(),
            },
            None => handle,
        };
        debug!(
            target: "dom-runtime",
            context = %self.inner.id,
            class_name = ?rejected.class_name(),
            wanted = ?T::KIND,
            "discarding remote object with no matching wrapper"
        );
        if !rejected.is_primitive() {
            metrics::record_handle_discarded();
        }
        rejected.dispose().await;
        None
    }

    fn element_for(&self, handle: &JsHandle) -> Option<TypedHandle> {
        let frame = self.frame()?;
        if let Some(kind) = handle
            .class_name()
            .and_then(|class| self.inner.registry.lookup(class))
        {
            return Some(kind.construct(handle.clone(), &frame));
        }
        if handle.remote().is_node() {
            return Some(ElementKind::Element.construct(handle.clone(), &frame));
        }
        None
    }

    async fn evaluate_expression(&self, expression: &str, by_value: bool) -> Result<Completion> {
        let params = json!({
            "expression": self.with_source_url(expression),
            "contextId": self.inner.id,
            "returnByValue": by_value,
            "awaitPromise": true,
            "userGesture": true,
        });
        self.submit("Runtime.evaluate", params).await
    }

    async fn call_function(
        &self,
        function: &str,
        args: &[JsArg],
        by_value: bool,
    ) -> Result<Completion> {
        let arguments = args
            .iter()
            .map(|arg| self.convert_argument(arg))
            .collect::<Result<Vec<_>>>()?;
        let params = json!({
            "functionDeclaration": self.with_source_url(function),
            "executionContextId": self.inner.id,
            "arguments": arguments,
            "returnByValue": by_value,
            "awaitPromise": true,
            "userGesture": true,
        });
        self.submit("Runtime.callFunctionOn", params).await
    }

    async fn submit(&self, method: &str, params: Value) -> Result<Completion> {
        let raw = match self.inner.session.send(method, params).await {
            Ok(raw) => raw,
            Err(err) => {
                if let Some(reason) = unreturnable_reason(&err) {
                    return Ok(Completion::Unreturnable(reason.to_string()));
                }
                return Err(err.into());
            }
        };
        let response: EvaluateResponse = serde_json::from_value(raw)?;
        if let Some(details) = response.exception_details {
            return Err(evaluation_error(&details));
        }
        Ok(Completion::Object(response.result))
    }

    fn convert_argument(&self, arg: &JsArg) -> Result<CallArgument> {
        Ok(match arg {
            JsArg::Null => CallArgument::value(Value::Null),
            JsArg::Number(number) => match JsArg::unserializable_number(*number) {
                Some(literal) => CallArgument::unserializable(literal),
                None => CallArgument::value(json!(number)),
            },
            JsArg::BigInt(big) => CallArgument::unserializable(format!("{big}n")),
            JsArg::Json(value) => CallArgument::value(value.clone()),
            JsArg::Handle { handle, type_name } => {
                if !handle.context().ptr_eq(self) {
                    return Err(DomError::ContextMismatch {
                        type_name: *type_name,
                    });
                }
                if handle.is_disposed() {
                    return Err(DomError::HandleDisposed {
                        type_name: *type_name,
                    });
                }
                let remote = handle.remote();
                if let Some(object_id) = &remote.object_id {
                    CallArgument::object(object_id.clone())
                } else if let Some(literal) = &remote.unserializable_value {
                    CallArgument::unserializable(literal.clone())
                } else if let Some(value) = &remote.value {
                    CallArgument::value(value.clone())
                } else if remote.is_null() {
                    CallArgument::value(Value::Null)
                } else {
                    CallArgument::default()
                }
            }
        })
    }

    fn with_source_url(&self, source: &str) -> String {
        if SOURCE_URL.is_match(source) {
            source.to_string()
        } else {
            format!(
                "{source}\n//# sourceURL={}\n",
                self.inner.config.evaluation_source_url
            )
        }
    }
}

fn evaluation_error(details: &ExceptionDetails) -> DomError {
    let message = details
        .exception
        .as_ref()
        .and_then(|exception| {
            exception
                .description
                .as_deref()
                .and_then(|description| description.lines().next())
                .map(str::to_string)
                .or_else(|| exception.value.as_ref().map(render_thrown_value))
        })
        .unwrap_or_else(|| details.text.clone());
    let stack = details
        .stack_trace
        .as_ref()
        .map(|trace| {
            trace
                .call_frames
                .iter()
                .map(|frame| {
                    let function = if frame.function_name.is_empty() {
                        "<anonymous>"
                    } else {
                        frame.function_name.as_str()
                    };
                    format!(
                        "    at {function} ({}:{}:{})",
                        frame.url,
                        frame.line_number + 1,
                        frame.column_number + 1
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    DomError::EvaluationFailed { message, stack }
}

fn render_thrown_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
