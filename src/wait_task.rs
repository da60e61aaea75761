//! Wait tasks: poll a predicate inside the page until it is truthy or time runs out.
//!
//! Polling runs remotely. Each run is one `Runtime.callFunctionOn` round trip that settles
//! when the predicate passes (or the remote side observes the timeout), so polling costs no
//! extra protocol traffic. A task reruns whenever its world binds a new realm; superseded
//! runs are detected through a run counter and their results released.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DomError, Result};
use crate::execution::ExecutionContext;
use crate::handle::JsHandle;
use crate::metrics;
use crate::value::JsArg;
use crate::world::World;

/// Remote polling routine. Arguments: predicate source, whether it is a function, polling
/// mode (`"raf"`, `"mutation"` or an interval in ms), timeout in ms (0 disables), then the
/// predicate's own arguments.
const POLLING_ROUTINE: &str = r#"async function waitForPredicate(predicateBody, isFunction, polling, timeout, ...args) {
  const predicate = new Function('...args', isFunction
    ? 'return (' + predicateBody + ')(...args);'
    : 'return (' + predicateBody + ');');
  let timedOut = false;
  if (timeout) setTimeout(() => (timedOut = true), timeout);
  if (polling === 'raf') return await pollRaf();
  if (polling === 'mutation') return await pollMutation();
  if (typeof polling === 'number') return await pollInterval(polling);
  throw new Error('Unknown polling option: ' + polling);

  async function pollMutation() {
    const success = await predicate(...args);
    if (success) return success;
    let fulfill;
    const result = new Promise((resolve) => (fulfill = resolve));
    const observer = new MutationObserver(async () => {
      if (timedOut) {
        observer.disconnect();
        fulfill();
        return;
      }
      const success = await predicate(...args);
      if (success) {
        observer.disconnect();
        fulfill(success);
      }
    });
    observer.observe(document, { childList: true, subtree: true, attributes: true });
    if (timeout) {
      setTimeout(async () => {
        observer.disconnect();
        fulfill(await predicate(...args));
      }, timeout);
    }
    return result;
  }

  async function pollRaf() {
    let fulfill;
    const result = new Promise((resolve) => (fulfill = resolve));
    await onRaf();
    return result;

    async function onRaf() {
      if (timedOut) {
        fulfill();
        return;
      }
      const success = await predicate(...args);
      if (success) fulfill(success);
      else requestAnimationFrame(onRaf);
    }
  }

  async function pollInterval(pollInterval) {
    let fulfill;
    const result = new Promise((resolve) => (fulfill = resolve));
    await onTimeout();
    return result;

    async function onTimeout() {
      if (timedOut) {
        fulfill();
        return;
      }
      const success = await predicate(...args);
      if (success) fulfill(success);
      else setTimeout(onTimeout, pollInterval);
    }
  }
}"#;

/// Predicate behind selector and XPath waits. Resolves to the node, or to `true` when
/// waiting for a node to disappear.
pub(crate) const SELECTOR_PREDICATE: &str = r#"(query, isXPath, waitForVisible, waitForHidden) => {
  const node = isXPath
    ? document.evaluate(query, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue
    : document.querySelector(query);
  if (!node) return waitForHidden;
  if (!waitForVisible && !waitForHidden) return node;
  const element = node.nodeType === Node.TEXT_NODE ? node.parentElement : node;
  const style = window.getComputedStyle(element);
  const rect = element.getBoundingClientRect();
  const isVisible = !!style && style.visibility !== 'hidden' && !!(rect.top || rect.bottom || rect.width || rect.height);
  const success = waitForVisible === isVisible || waitForHidden === !isVisible;
  return success ? node : null;
}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateMode {
    Expression,
    Function,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polling {
    /// Re-check on every animation frame.
    AnimationFrame,
    /// Re-check on every DOM mutation.
    Mutation,
    /// Re-check on a fixed remote timer.
    Interval(Duration),
}

impl Polling {
    fn as_arg(&self) -> JsArg {
        match self {
            Polling::AnimationFrame => "raf".into(),
            Polling::Mutation => "mutation".into(),
            Polling::Interval(every) => JsArg::Json(json!(every.as_millis() as u64)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WaitTaskOptions {
    pub predicate: String,
    pub mode: PredicateMode,
    /// Used in diagnostics, e.g. "selector `#login`".
    pub title: String,
    pub polling: Polling,
    /// `Duration::ZERO` waits forever.
    pub timeout: Duration,
    pub args: Vec<JsArg>,
}

impl WaitTaskOptions {
    fn validate(&self) -> Result<()> {
        if self.predicate.trim().is_empty() {
            return Err(DomError::validation("wait predicate must not be empty"));
        }
        if let Polling::Interval(every) = self.polling {
            // The page timer only takes whole milliseconds.
            if every.as_millis() == 0 {
                return Err(DomError::validation(
                    "polling interval must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

/// Options for function and expression waits. A `None` timeout uses the runtime default.
#[derive(Clone, Copy, Debug)]
pub struct WaitForOptions {
    pub polling: Polling,
    pub timeout: Option<Duration>,
}

impl Default for WaitForOptions {
    fn default() -> Self {
        Self {
            polling: Polling::AnimationFrame,
            timeout: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WaitForSelectorOptions {
    /// Only match nodes that are rendered and not `visibility: hidden`.
    pub visible: bool,
    /// Succeed once the node is missing or hidden.
    pub hidden: bool,
    pub timeout: Option<Duration>,
}

impl WaitForSelectorOptions {
    /// Presence is mutation-driven; visibility changes need per-frame checks.
    pub(crate) fn polling(&self) -> Polling {
        if self.visible || self.hidden {
            Polling::AnimationFrame
        } else {
            Polling::Mutation
        }
    }
}

pub struct WaitTask {
    id: u64,
    world: Weak<World>,
    options: WaitTaskOptions,
    run_count: AtomicU64,
    terminated: AtomicBool,
    outcome: Mutex<Option<oneshot::Sender<Result<JsHandle>>>>,
    timer: CancellationToken,
}

impl fmt::Debug for WaitTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTask")
            .field("id", &self.id)
            .field("title", &self.options.title)
            .field("runs", &self.run_count.load(Ordering::SeqCst))
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Caller side of a spawned [`WaitTask`].
pub struct WaitHandle {
    task: Arc<WaitTask>,
    receiver: oneshot::Receiver<Result<JsHandle>>,
}

impl WaitHandle {
    pub fn task(&self) -> &Arc<WaitTask> {
        &self.task
    }

    pub async fn wait(mut self) -> Result<JsHandle> {
        match (&mut self.receiver).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DomError::WorldDetached { url: String::new() }),
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.task.abandon();
    }
}

impl WaitTask {
    /// Registers a task with `world`, arms its timer and starts the first run.
    pub fn spawn(world: &Arc<World>, options: WaitTaskOptions) -> Result<WaitHandle> {
        options.validate()?;
        let (sender, receiver) = oneshot::channel();
        let timeout = options.timeout;
        let task = Arc::new(WaitTask {
            id: world.next_task_id(),
            world: Arc::downgrade(world),
            options,
            run_count: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            outcome: Mutex::new(Some(sender)),
            timer: CancellationToken::new(),
        });
        world.register_task(task.id, Arc::clone(&task));
        if world.is_detached() {
            task.terminate(world.detached_error());
            return Ok(WaitHandle { task, receiver });
        }
        if !timeout.is_zero() {
            task.arm_timer(timeout);
        }
        task.rerun();
        Ok(WaitHandle { task, receiver })
    }

    pub fn title(&self) -> &str {
        &self.options.title
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.lock().is_none()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Starts a fresh run against the world's current realm. Earlier runs become stale.
    pub fn rerun(self: &Arc<Self>) {
        self.spawn_run(None);
    }

    /// Force-fails the task. No-op once it has settled.
    pub fn terminate(&self, error: DomError) {
        self.terminated.store(true, Ordering::SeqCst);
        let outcome = if error.is_timeout() {
            "timed_out"
        } else {
            "terminated"
        };
        self.finish(Err(error), outcome);
    }

    /// Drops an unsettled task whose caller stopped waiting. Runs already in flight discard
    /// their results.
    fn abandon(&self) {
        if self.settle("abandoned").is_none() {
            return;
        }
        debug!(
            target: "dom-runtime",
            title = %self.options.title,
            "wait caller went away, task dropped"
        );
    }

    fn spawn_run(self: &Arc<Self>, stale: Option<ExecutionContext>) {
        let abandoned = match self.outcome.lock().as_ref() {
            Some(sender) => sender.is_closed(),
            None => return,
        };
        if abandoned {
            self.abandon();
            return;
        }
        let run = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        let task = Arc::clone(self);
        tokio::spawn(async move { task.run(run, stale).await });
    }

    fn arm_timer(self: &Arc<Self>, timeout: Duration) {
        let task = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = task.timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let title = task.options.title.clone();
                    task.terminate(DomError::WaitTimeout { title, timeout });
                }
            }
        });
    }

    fn is_current(&self, run: u64) -> bool {
        !self.is_settled() && self.run_count.load(Ordering::SeqCst) == run
    }

    async fn run(self: Arc<Self>, run: u64, stale: Option<ExecutionContext>) {
        let Some(world) = self.world.upgrade() else {
            self.terminate(DomError::WorldDetached { url: String::new() });
            return;
        };
        let context = match &stale {
            Some(stale) => world.next_execution_context(stale).await,
            None => world.execution_context().await,
        };
        drop(world);
        let context = match context {
            Ok(context) => context,
            Err(err) => {
                self.terminate(err);
                return;
            }
        };
        if !self.is_current(run) {
            return;
        }

        let result = context
            .evaluate_function_handle::<JsHandle>(POLLING_ROUTINE, self.remote_args())
            .await;

        if !self.is_current(run) {
            if let Ok(Some(handle)) = result {
                handle.dispose().await;
            }
            return;
        }

        match result {
            Ok(Some(handle)) if handle.is_truthy() => self.finish(Ok(handle), "succeeded"),
            Ok(Some(handle)) => handle.dispose().await,
            Ok(None) => {}
            Err(err) if err.is_context_destroyed() => {
                debug!(
                    target: "dom-runtime",
                    title = %self.options.title,
                    "realm destroyed mid-wait, rerunning"
                );
                self.spawn_run(Some(context));
            }
            Err(err) if err.is_missing_context() => {
                debug!(
                    target: "dom-runtime",
                    title = %self.options.title,
                    "realm no longer exists, wait run dropped"
                );
            }
            Err(err) => self.finish(Err(err), "failed"),
        }
    }

    fn remote_args(&self) -> Vec<JsArg> {
        let timeout_ms = self.options.timeout.as_millis() as u64;
        let mut args = Vec::with_capacity(self.options.args.len() + 4);
        args.push(self.options.predicate.as_str().into());
        args.push((self.options.mode == PredicateMode::Function).into());
        args.push(self.options.polling.as_arg());
        args.push(JsArg::Json(json!(timeout_ms)));
        args.extend(self.options.args.iter().cloned());
        args
    }

    /// Takes the outcome sender, cancels the timer and unregisters from the world. `None` once
    /// the task has already settled.
    fn settle(&self, outcome: &'static str) -> Option<oneshot::Sender<Result<JsHandle>>> {
        let sender = self.outcome.lock().take()?;
        self.timer.cancel();
        if let Some(world) = self.world.upgrade() {
            world.unregister_task(self.id);
        }
        metrics::record_wait_outcome(outcome);
        Some(sender)
    }

    fn finish(&self, result: Result<JsHandle>, outcome: &'static str) {
        let Some(sender) = self.settle(outcome) else {
            if let Ok(handle) = result {
                handle.release_in_background();
            }
            return;
        };
        match sender.send(result) {
            Ok(()) => {}
            Err(Ok(handle)) => handle.release_in_background(),
            Err(Err(err)) => {
                debug!(
                    target: "dom-runtime",
                    title = %self.options.title,
                    error = %err,
                    "wait task settled after its caller went away"
                );
            }
        }
    }
}
