//! SoulBrowser DOM runtime
//!
//! Typed remote execution and frame lifecycle tracking on top of the DevTools protocol.
//! The [`FrameManager`] consumes a page session's browser events and maintains the frame
//! tree; each [`Frame`] owns a main and a secondary [`World`], and each world exposes the
//! realm ([`ExecutionContext`]) currently bound to it. Evaluations return typed remote
//! handles ([`JsHandle`], [`ElementHandle`]) that must be disposed; [`with_handle`] and
//! [`HandleGuard`] scope that.

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod frame;
pub mod frame_manager;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod telemetry;
pub mod value;
pub mod wait_task;
pub mod world;

pub use cdp_adapter::{CdpSession, CdpTransport, CommandTarget, ExecutionContextId, FrameId};
pub use config::RuntimeConfig;
pub use error::{DomError, Result};
pub use events::FrameEvent;
pub use execution::ExecutionContext;
pub use frame::Frame;
pub use frame_manager::FrameManager;
pub use handle::{with_handle, ElementHandle, HandleGuard, HandleKind, JsHandle, RemoteHandle};
pub use registry::{ElementKind, TypeRegistry};
pub use value::{JsArg, JsValue};
pub use wait_task::{Polling, PredicateMode, WaitForOptions, WaitForSelectorOptions, WaitTask};
pub use world::{World, WorldKind};
