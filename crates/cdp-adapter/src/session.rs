use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AdapterError;
use crate::metrics;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// Command channel bound to one protocol target (the browser or a flat page session).
#[derive(Clone)]
pub struct CdpSession {
    transport: Arc<dyn CdpTransport>,
    target: CommandTarget,
}

impl fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpSession")
            .field("target", &self.target)
            .finish()
    }
}

impl CdpSession {
    pub fn new(transport: Arc<dyn CdpTransport>, target: CommandTarget) -> Self {
        Self { transport, target }
    }

    pub fn target(&self) -> &CommandTarget {
        &self.target
    }

    pub fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    /// Whether an inbound event was emitted for this session.
    pub fn owns(&self, event: &TransportEvent) -> bool {
        match &self.target {
            CommandTarget::Browser => event.session_id.is_none(),
            CommandTarget::Session(id) => event.session_id.as_deref() == Some(id.as_str()),
        }
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let start = Instant::now();
        let result = self
            .transport
            .send_command(self.target.clone(), method, params)
            .await;
        metrics::record_command(method, start.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    /// Sends a command and decodes its result payload.
    pub async fn call<R>(&self, method: &str, params: Value) -> Result<R, AdapterError>
    where
        R: DeserializeOwned,
    {
        let value = self.send(method, params).await?;
        serde_json::from_value(value).map_err(AdapterError::payload)
    }
}
