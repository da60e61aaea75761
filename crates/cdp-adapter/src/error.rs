use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdapterErrorKind {
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("protocol error")]
    Protocol,
    #[error("malformed protocol payload")]
    Payload,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self { kind, hint: None }
    }

    /// Error response returned by the browser for a command (`{"error": {"message": ..}}`).
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Protocol).with_hint(message)
    }

    pub fn payload(err: serde_json::Error) -> Self {
        Self::new(AdapterErrorKind::Payload).with_hint(err.to_string())
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn message(&self) -> &str {
        self.hint.as_deref().unwrap_or_default()
    }

    /// Whether the browser-provided message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.message().contains(needle)
    }
}
