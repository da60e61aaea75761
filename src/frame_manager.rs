//! Frame tree and realm registry for one page session.
//!
//! The manager is the single consumer of the session's browser events. It keeps the frame
//! map and the realm map in sync with them, binds realms to worlds, and republishes the
//! changes as [`FrameEvent`]s.

use std::sync::Arc;

use cdp_adapter::metrics as cdp_metrics;
use cdp_adapter::protocol::{
    ExecutionContextCreatedParams, ExecutionContextDescription, ExecutionContextDestroyedParams,
    FrameAttachedParams, FrameDetachedParams, FrameNavigatedParams, FramePayload,
    FrameStoppedLoadingParams, FrameTree, GetFrameTreeResponse, LifecycleEventParams,
    NavigatedWithinDocumentParams,
};
use cdp_adapter::{CdpSession, ExecutionContextId, FrameId, TransportEvent};
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::events::FrameEvent;
use crate::execution::{ContextOwner, ExecutionContext};
use crate::frame::Frame;
use crate::metrics;
use crate::registry::TypeRegistry;

pub struct FrameManager {
    session: CdpSession,
    config: Arc<RuntimeConfig>,
    registry: Arc<TypeRegistry>,
    frames: DashMap<FrameId, Arc<Frame>>,
    contexts: DashMap<ExecutionContextId, ExecutionContext>,
    main_frame: RwLock<Option<Arc<Frame>>>,
    isolated_worlds: DashSet<String>,
    events: broadcast::Sender<FrameEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FrameManager {
    pub fn new(session: CdpSession, config: RuntimeConfig) -> Arc<Self> {
        Self::with_registry(session, config, TypeRegistry::global())
    }

    pub fn with_registry(
        session: CdpSession,
        config: RuntimeConfig,
        registry: Arc<TypeRegistry>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Arc::new(Self {
            session,
            config: Arc::new(config),
            registry,
            frames: DashMap::new(),
            contexts: DashMap::new(),
            main_frame: RwLock::new(None),
            isolated_worlds: DashSet::new(),
            events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn session(&self) -> &CdpSession {
        &self.session
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.events.subscribe()
    }

    pub fn main_frame(&self) -> Option<Arc<Frame>> {
        self.main_frame.read().clone()
    }

    pub fn frame(&self, id: &FrameId) -> Option<Arc<Frame>> {
        self.frames.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn execution_context(&self, id: ExecutionContextId) -> Option<ExecutionContext> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    pub fn execution_context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Enables the domains the manager consumes, loads the current frame tree and installs
    /// the utility world.
    pub async fn initialize(&self) -> Result<()> {
        self.session.send("Page.enable", json!({})).await?;
        let tree: GetFrameTreeResponse = self.session.call("Page.getFrameTree", json!({})).await?;
        self.load_frame_tree(&tree.frame_tree, None);
        self.session
            .send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        self.session.send("Runtime.enable", json!({})).await?;
        let utility = self.config.utility_world_name.clone();
        self.ensure_isolated_world(&utility).await?;
        info!(
            target: "dom-runtime",
            frames = self.frames.len(),
            "frame manager initialized"
        );
        Ok(())
    }

    fn load_frame_tree(&self, tree: &FrameTree, parent: Option<&FrameId>) {
        if let Some(parent) = parent {
            self.on_frame_attached(tree.frame.id.clone(), parent.clone());
        }
        self.on_frame_navigated(&tree.frame);
        for child in &tree.child_frames {
            self.load_frame_tree(child, Some(&tree.frame.id));
        }
    }

    /// Starts the event loop. Calling it again is a no-op.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }
        self.session.transport().start().await?;
        tasks.push(tokio::spawn(Self::event_loop(Arc::clone(&self))));
        info!(target: "dom-runtime", "frame manager event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        while let Some(task) = tasks.pop() {
            let _ = task.await;
        }
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "dom-runtime", "event loop entered");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.session.transport().next_event() => match event {
                    Some(event) => {
                        if self.session.owns(&event) {
                            self.handle_event(event).await;
                        }
                    }
                    None => {
                        warn!(target: "dom-runtime", "event stream ended; clearing execution contexts");
                        self.on_contexts_cleared();
                        break;
                    }
                },
            }
        }
        debug!(target: "dom-runtime", "event loop exiting");
    }

    /// Applies one browser event. Failures are logged; they never stop the loop.
    pub async fn handle_event(&self, event: TransportEvent) {
        let method = event.method.clone();
        if let Err(err) = self.process_event(event) {
            warn!(
                target: "dom-runtime",
                method = %method,
                error = %err,
                "failed to apply browser event"
            );
        }
    }

    fn process_event(&self, event: TransportEvent) -> Result<()> {
        cdp_metrics::record_event(&event.method);
        match event.method.as_str() {
            "Page.frameAttached" => {
                let params: FrameAttachedParams = decode(event.params)?;
                self.on_frame_attached(params.frame_id, params.parent_frame_id);
            }
            "Page.frameNavigated" => {
                let params: FrameNavigatedParams = decode(event.params)?;
                self.on_frame_navigated(&params.frame);
            }
            "Page.navigatedWithinDocument" => {
                let params: NavigatedWithinDocumentParams = decode(event.params)?;
                self.on_navigated_within_document(&params.frame_id, &params.url);
            }
            "Page.frameDetached" => {
                let params: FrameDetachedParams = decode(event.params)?;
                self.on_frame_detached(&params.frame_id, params.reason.as_deref());
            }
            "Page.frameStoppedLoading" => {
                let params: FrameStoppedLoadingParams = decode(event.params)?;
                self.on_frame_stopped_loading(&params.frame_id);
            }
            "Page.lifecycleEvent" => {
                let params: LifecycleEventParams = decode(event.params)?;
                self.on_lifecycle_event(&params);
            }
            "Runtime.executionContextCreated" => {
                let params: ExecutionContextCreatedParams = decode(event.params)?;
                self.on_context_created(params.context);
            }
            "Runtime.executionContextDestroyed" => {
                let params: ExecutionContextDestroyedParams = decode(event.params)?;
                self.on_context_destroyed(params.execution_context_id);
            }
            "Runtime.executionContextsCleared" => {
                self.on_contexts_cleared();
            }
            _ => {
                debug!(target: "dom-runtime", method = %event.method, "unhandled browser event");
            }
        }
        Ok(())
    }

    fn on_frame_attached(&self, frame_id: FrameId, parent_id: FrameId) {
        if self.frames.contains_key(&frame_id) {
            return;
        }
        let Some(parent) = self.frame(&parent_id) else {
            debug!(
                target: "dom-runtime",
                frame = %frame_id,
                parent = %parent_id,
                "frame attached under unknown parent"
            );
            return;
        };
        let frame = Frame::new(frame_id.clone(), Some(&parent), Arc::clone(&self.config));
        self.frames.insert(frame_id, Arc::clone(&frame));
        metrics::set_frame_count(self.frames.len());
        self.publish(FrameEvent::FrameAttached(frame));
    }

    fn on_frame_navigated(&self, payload: &FramePayload) {
        let is_main = payload.parent_id.is_none();
        let existing = if is_main {
            self.main_frame()
        } else {
            self.frame(&payload.id)
        };

        // A new document replaces the whole subtree.
        if let Some(frame) = &existing {
            for child in frame.child_frames() {
                self.remove_frames_recursively(&child);
            }
        }

        let frame = match existing {
            Some(frame) if is_main => {
                let previous = frame.id();
                if previous != payload.id {
                    self.frames
                        .remove_if(&previous, |_, known| Arc::ptr_eq(known, &frame));
                    frame.set_id(payload.id.clone());
                }
                self.frames.insert(payload.id.clone(), Arc::clone(&frame));
                frame
            }
            Some(frame) => frame,
            None if is_main => {
                let frame = Frame::new(payload.id.clone(), None, Arc::clone(&self.config));
                self.frames.insert(payload.id.clone(), Arc::clone(&frame));
                *self.main_frame.write() = Some(Arc::clone(&frame));
                frame
            }
            None => {
                debug!(
                    target: "dom-runtime",
                    frame = %payload.id,
                    "navigation for unknown child frame"
                );
                return;
            }
        };

        frame.navigated(payload);
        metrics::set_frame_count(self.frames.len());
        self.publish(FrameEvent::FrameNavigated(frame));
    }

    fn on_navigated_within_document(&self, frame_id: &FrameId, url: &str) {
        let Some(frame) = self.frame(frame_id) else {
            return;
        };
        frame.navigated_within_document(url);
        self.publish(FrameEvent::FrameNavigatedWithinDocument(Arc::clone(&frame)));
        self.publish(FrameEvent::FrameNavigated(frame));
    }

    fn on_frame_detached(&self, frame_id: &FrameId, reason: Option<&str>) {
        match reason {
            None | Some("remove") => {}
            Some(other) => {
                debug!(
                    target: "dom-runtime",
                    frame = %frame_id,
                    reason = other,
                    "frame detach does not remove the frame"
                );
                return;
            }
        }
        if let Some(frame) = self.frame(frame_id) {
            self.remove_frames_recursively(&frame);
        }
    }

    fn on_frame_stopped_loading(&self, frame_id: &FrameId) {
        let Some(frame) = self.frame(frame_id) else {
            return;
        };
        frame.on_loading_stopped();
        for name in ["DOMContentLoaded", "load"] {
            self.publish(FrameEvent::LifecycleEvent {
                frame: Arc::clone(&frame),
                name: name.to_string(),
            });
        }
    }

    fn on_lifecycle_event(&self, params: &LifecycleEventParams) {
        let Some(frame) = self.frame(&params.frame_id) else {
            return;
        };
        frame.on_lifecycle_event(&params.loader_id, &params.name);
        self.publish(FrameEvent::LifecycleEvent {
            frame,
            name: params.name.clone(),
        });
    }

    /// Detaches `root` and its subtree innermost first, then publishes one detach event per
    /// frame in the same order.
    fn remove_frames_recursively(&self, root: &Arc<Frame>) {
        let mut doomed = Vec::new();
        collect_post_order(root, &mut doomed);
        for frame in &doomed {
            frame.detach();
            self.frames
                .remove_if(&frame.id(), |_, known| Arc::ptr_eq(known, frame));
        }
        {
            let mut main = self.main_frame.write();
            if main
                .as_ref()
                .is_some_and(|current| doomed.iter().any(|frame| Arc::ptr_eq(frame, current)))
            {
                *main = None;
            }
        }
        metrics::set_frame_count(self.frames.len());
        for frame in doomed {
            self.publish(FrameEvent::FrameDetached(frame));
        }
    }

    fn on_context_created(&self, description: ExecutionContextDescription) {
        let aux = description.aux_data.unwrap_or_default();
        if aux.kind.as_deref() == Some("isolated") {
            self.isolated_worlds.insert(description.name.clone());
        }
        let frame = aux.frame_id.as_ref().and_then(|id| self.frame(id));
        let world = frame.as_ref().and_then(|frame| {
            if aux.is_default {
                Some(Arc::clone(frame.main_world()))
            } else if description.name == self.config.utility_world_name
                && !frame.secondary_world().has_context()
            {
                Some(Arc::clone(frame.secondary_world()))
            } else {
                None
            }
        });
        let owner = ContextOwner {
            frame: frame.as_ref().map(Arc::downgrade),
            world: world.as_ref().map(Arc::downgrade),
        };
        let context = ExecutionContext::new(
            description.id,
            self.session.clone(),
            owner,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            description.origin,
            description.name,
        );
        self.contexts.insert(description.id, context.clone());
        if let Some(world) = world {
            world.set_context(Some(context));
        }
    }

    fn on_context_destroyed(&self, id: ExecutionContextId) {
        if let Some((_, context)) = self.contexts.remove(&id) {
            if let Some(world) = context.world() {
                world.clear_context_if(&context);
            }
        }
    }

    fn on_contexts_cleared(&self) {
        let contexts: Vec<ExecutionContext> = self
            .contexts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.contexts.clear();
        for context in contexts {
            if let Some(world) = context.world() {
                world.clear_context_if(&context);
            }
        }
    }

    /// Makes sure every current and future frame has an isolated world named `name`.
    pub async fn ensure_isolated_world(&self, name: &str) -> Result<()> {
        if !self.isolated_worlds.insert(name.to_string()) {
            return Ok(());
        }
        let install = self
            .session
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({
                    "source": format!("//# sourceURL={}", self.config.evaluation_source_url),
                    "worldName": name,
                }),
            )
            .await;
        if let Err(err) = install {
            self.isolated_worlds.remove(name);
            return Err(err.into());
        }

        let frames = self.frames();
        let creations = frames.iter().map(|frame| {
            let session = self.session.clone();
            let params = json!({
                "frameId": frame.id(),
                "worldName": name,
                "grantUniveralAccess": true,
            });
            async move { session.send("Page.createIsolatedWorld", params).await }
        });
        for (frame, result) in frames.iter().zip(join_all(creations).await) {
            if let Err(err) = result {
                debug!(
                    target: "dom-runtime",
                    frame = %frame.id(),
                    world = name,
                    error = %err,
                    "isolated world creation failed"
                );
            }
        }
        Ok(())
    }

    fn publish(&self, event: FrameEvent) {
        debug!(
            target: "dom-runtime",
            event = event.kind(),
            frame = %event.frame().id(),
            "frame event"
        );
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn collect_post_order(frame: &Arc<Frame>, out: &mut Vec<Arc<Frame>>) {
    for child in frame.child_frames() {
        collect_post_order(&child, out);
    }
    out.push(Arc::clone(frame));
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T> {
    Ok(serde_json::from_value(params)?)
}
