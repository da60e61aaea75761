use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AdapterError, AdapterErrorKind};

/// Event pushed by the browser, already split into method, params and flat session id.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

impl TransportEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            session_id: None,
        }
    }

    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Wire-level seam. Implementations own connection management, message framing and
/// correlation of command responses; the runtime only sees methods, params and events.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("transport not available for method {method}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn noop_transport_rejects_commands() {
        let transport = NoopTransport;
        transport.start().await.expect("noop start");
        assert!(transport.next_event().await.is_none());
        let err = transport
            .send_command(CommandTarget::Browser, "Runtime.evaluate", json!({}))
            .await
            .expect_err("noop transport has no browser");
        assert_eq!(err.kind, AdapterErrorKind::Internal);
        assert!(err.mentions("Runtime.evaluate"));
    }
}
