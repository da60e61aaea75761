#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, CdpSession, CdpTransport, CommandTarget, TransportEvent};
use serde_json::{json, Value};
use soulbrowser_dom::config::DEFAULT_UTILITY_WORLD;
use soulbrowser_dom::{FrameManager, RuntimeConfig};
use tokio::sync::{mpsc, Mutex};

pub enum Reply {
    Now(Result<Value, AdapterError>),
    After(Duration, Result<Value, AdapterError>),
    Never,
}

type Responder = Box<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// Scripted browser: records every command, answers through a per-test responder and
/// feeds injected events to the event loop.
pub struct MockBrowser {
    started: AtomicBool,
    rx: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    commands: parking_lot::Mutex<Vec<(String, Value)>>,
    responder: parking_lot::Mutex<Responder>,
}

impl MockBrowser {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            started: AtomicBool::new(false),
            rx: Mutex::new(rx),
            tx: parking_lot::Mutex::new(Some(tx)),
            commands: parking_lot::Mutex::new(Vec::new()),
            responder: parking_lot::Mutex::new(Box::new(default_reply)),
        })
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        *self.responder.lock() = Box::new(responder);
    }

    pub fn push_event(&self, event: TransportEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            tx.send(event).expect("event loop receiver alive");
        }
    }

    /// Ends the event stream.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().clone()
    }

    pub fn commands_named(&self, method: &str) -> Vec<Value> {
        self.commands
            .lock()
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl CdpTransport for MockBrowser {
    async fn start(&self) -> Result<(), AdapterError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.rx.lock().await.recv().await
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.commands
            .lock()
            .push((method.to_string(), params.clone()));
        let reply = {
            let responder = self.responder.lock();
            (*responder)(method, &params)
        };
        match reply {
            Reply::Now(result) => result,
            Reply::After(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            Reply::Never => std::future::pending().await,
        }
    }
}

/// Echoes the first call argument back and acknowledges everything else.
pub fn default_reply(method: &str, params: &Value) -> Reply {
    match method {
        "Runtime.callFunctionOn" => Reply::Now(Ok(json!({ "result": echo_first_argument(params) }))),
        "Runtime.evaluate" => Reply::Now(Ok(json!({ "result": { "type": "undefined" } }))),
        _ => Reply::Now(Ok(json!({}))),
    }
}

pub fn echo_first_argument(params: &Value) -> Value {
    let argument = &params["arguments"][0];
    if let Some(object_id) = argument.get("objectId") {
        return json!({ "type": "object", "objectId": object_id });
    }
    if let Some(literal) = argument.get("unserializableValue").and_then(Value::as_str) {
        let kind = if literal.ends_with('n') { "bigint" } else { "number" };
        return json!({ "type": kind, "unserializableValue": literal });
    }
    match argument.get("value") {
        Some(value) => remote_value(value.clone()),
        None => json!({ "type": "undefined" }),
    }
}

/// `RemoteObject` describing a by-value result.
pub fn remote_value(value: Value) -> Value {
    match &value {
        Value::Null => json!({ "type": "object", "subtype": "null", "value": null }),
        Value::Bool(_) => json!({ "type": "boolean", "value": value }),
        Value::Number(_) => json!({ "type": "number", "value": value }),
        Value::String(_) => json!({ "type": "string", "value": value }),
        Value::Array(_) => json!({ "type": "object", "subtype": "array", "value": value }),
        Value::Object(_) => json!({ "type": "object", "value": value }),
    }
}

pub fn node(object_id: &str, class_name: &str) -> Value {
    json!({
        "type": "object",
        "subtype": "node",
        "className": class_name,
        "description": class_name,
        "objectId": object_id,
    })
}

pub fn object(object_id: &str, class_name: &str) -> Value {
    json!({
        "type": "object",
        "className": class_name,
        "description": class_name,
        "objectId": object_id,
    })
}

pub fn result(remote: Value) -> Reply {
    Reply::Now(Ok(json!({ "result": remote })))
}

pub fn setup() -> (Arc<MockBrowser>, Arc<FrameManager>) {
    setup_with(RuntimeConfig::default())
}

pub fn setup_with(config: RuntimeConfig) -> (Arc<MockBrowser>, Arc<FrameManager>) {
    init_logging();
    let browser = MockBrowser::new();
    let transport: Arc<dyn CdpTransport> = browser.clone();
    let session = CdpSession::new(transport, CommandTarget::Browser);
    (browser, FrameManager::new(session, config))
}

pub fn init_logging() {
    let _ = soulbrowser_dom::telemetry::init_logging("debug", false);
}

pub const MAIN_URL: &str = "https://example.test/";

/// Main frame `main` with default realm 1 and utility realm 2.
pub async fn boot_main_frame(manager: &FrameManager) {
    manager
        .handle_event(frame_navigated("main", None, MAIN_URL))
        .await;
    manager
        .handle_event(context_created(1, "main", true, "", "default"))
        .await;
    manager
        .handle_event(context_created(2, "main", false, DEFAULT_UTILITY_WORLD, "isolated"))
        .await;
}

/// Child frame `id` under `parent` with a default realm.
pub async fn attach_child(manager: &FrameManager, id: &str, parent: &str, context_id: i64) {
    manager.handle_event(frame_attached(id, parent)).await;
    manager
        .handle_event(frame_navigated(id, Some(parent), MAIN_URL))
        .await;
    manager
        .handle_event(context_created(context_id, id, true, "", "default"))
        .await;
}

pub fn frame_navigated(id: &str, parent: Option<&str>, url: &str) -> TransportEvent {
    let mut frame = json!({ "id": id, "loaderId": format!("loader-{id}"), "url": url });
    if let Some(parent) = parent {
        frame["parentId"] = json!(parent);
    }
    TransportEvent::new("Page.frameNavigated", json!({ "frame": frame }))
}

pub fn frame_attached(id: &str, parent: &str) -> TransportEvent {
    TransportEvent::new(
        "Page.frameAttached",
        json!({ "frameId": id, "parentFrameId": parent }),
    )
}

pub fn frame_detached(id: &str, reason: Option<&str>) -> TransportEvent {
    let mut params = json!({ "frameId": id });
    if let Some(reason) = reason {
        params["reason"] = json!(reason);
    }
    TransportEvent::new("Page.frameDetached", params)
}

pub fn navigated_within_document(id: &str, url: &str) -> TransportEvent {
    TransportEvent::new(
        "Page.navigatedWithinDocument",
        json!({ "frameId": id, "url": url }),
    )
}

pub fn lifecycle_event(id: &str, loader: &str, name: &str) -> TransportEvent {
    TransportEvent::new(
        "Page.lifecycleEvent",
        json!({ "frameId": id, "loaderId": loader, "name": name, "timestamp": 1.0 }),
    )
}

pub fn frame_stopped_loading(id: &str) -> TransportEvent {
    TransportEvent::new("Page.frameStoppedLoading", json!({ "frameId": id }))
}

pub fn context_created(
    id: i64,
    frame_id: &str,
    is_default: bool,
    name: &str,
    kind: &str,
) -> TransportEvent {
    TransportEvent::new(
        "Runtime.executionContextCreated",
        json!({
            "context": {
                "id": id,
                "origin": MAIN_URL,
                "name": name,
                "auxData": { "frameId": frame_id, "isDefault": is_default, "type": kind }
            }
        }),
    )
}

pub fn context_destroyed(id: i64) -> TransportEvent {
    TransportEvent::new(
        "Runtime.executionContextDestroyed",
        json!({ "executionContextId": id }),
    )
}

pub fn contexts_cleared() -> TransportEvent {
    TransportEvent::new("Runtime.executionContextsCleared", json!({}))
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
