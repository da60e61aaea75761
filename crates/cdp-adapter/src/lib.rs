//! SoulBrowser L0 CDP boundary.
//!
//! This crate owns everything the DOM runtime needs to know about the remote-debugging
//! protocol without owning the wire: the transport seam, session-scoped command dispatch,
//! typed payloads for the Runtime/DOM/Page domains, identifiers and adapter metrics.

pub mod error;
pub mod ids;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{AdapterError, AdapterErrorKind};
pub use ids::{ExecutionContextId, FrameId, RemoteObjectId};
pub use metrics::AdapterMetricsSnapshot;
pub use protocol::{CallArgument, ExceptionDetails, RemoteObject};
pub use session::CdpSession;
pub use transport::{CdpTransport, CommandTarget, NoopTransport, TransportEvent};
