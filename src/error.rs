//! Error taxonomy of the DOM runtime.

use std::time::Duration;

use cdp_adapter::AdapterError;
use thiserror::Error;

const CONTEXT_DESTROYED: &str = "Execution context was destroyed";
const CONTEXT_NOT_FOUND: &str = "Cannot find context with specified id";
const REFERENCE_CHAIN_TOO_LONG: &str = "Object reference chain is too long";
const NOT_RETURNABLE_BY_VALUE: &str = "Object couldn't be returned by value";

#[derive(Debug, Error)]
pub enum DomError {
    /// The page script threw. `stack` holds one rendered line per call frame.
    #[error("Evaluation failed: {message}{}", render_stack(.stack))]
    EvaluationFailed { message: String, stack: Vec<String> },

    #[error("{type_name} belongs to a different execution context")]
    ContextMismatch { type_name: &'static str },

    #[error("{type_name} is disposed")]
    HandleDisposed { type_name: &'static str },

    #[error("execution context is not available in detached frame \"{url}\"")]
    WorldDetached { url: String },

    #[error("waiting for {title} failed: timeout {}ms exceeded", .timeout.as_millis())]
    WaitTimeout { title: String, timeout: Duration },

    #[error("{0}")]
    Validation(String),

    #[error("cannot adopt handle: {0}")]
    CrossWorldAdopt(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("malformed protocol payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DomError>;

fn render_stack(stack: &[String]) -> String {
    if stack.is_empty() {
        return String::new();
    }
    let mut rendered = String::new();
    for line in stack {
        rendered.push('\n');
        rendered.push_str(line);
    }
    rendered
}

impl DomError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// The realm went away while the call was in flight (navigation, reload).
    pub fn is_context_destroyed(&self) -> bool {
        self.mentions(CONTEXT_DESTROYED)
    }

    /// The call targeted a realm the browser no longer knows about.
    pub fn is_missing_context(&self) -> bool {
        self.mentions(CONTEXT_NOT_FOUND)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }

    fn mentions(&self, needle: &str) -> bool {
        match self {
            Self::Adapter(err) => err.mentions(needle),
            Self::EvaluationFailed { message, .. } => message.contains(needle),
            _ => false,
        }
    }
}

/// Browser refused to serialise a by-value result. Reported as a typed absent value
/// instead of an error.
pub(crate) fn unreturnable_reason(err: &AdapterError) -> Option<&str> {
    if err.mentions(REFERENCE_CHAIN_TOO_LONG) || err.mentions(NOT_RETURNABLE_BY_VALUE) {
        Some(err.message())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_realm_races() {
        let destroyed = DomError::from(AdapterError::protocol(
            "Execution context was destroyed.",
        ));
        assert!(destroyed.is_context_destroyed());
        assert!(!destroyed.is_missing_context());

        let missing = DomError::from(AdapterError::protocol(
            "Cannot find context with specified id",
        ));
        assert!(missing.is_missing_context());
        assert!(!DomError::validation("x").is_context_destroyed());
    }

    #[test]
    fn evaluation_failure_renders_stack_lines() {
        let err = DomError::EvaluationFailed {
            message: "ReferenceError: foo is not defined".into(),
            stack: vec!["    at <anonymous> (page.js:1:1)".into()],
        };
        assert_eq!(
            err.to_string(),
            "Evaluation failed: ReferenceError: foo is not defined\n    at <anonymous> (page.js:1:1)"
        );
    }

    #[test]
    fn timeout_message_names_title_and_budget() {
        let err = DomError::WaitTimeout {
            title: "selector `#login`".into(),
            timeout: Duration::from_millis(500),
        };
        assert_eq!(
            err.to_string(),
            "waiting for selector `#login` failed: timeout 500ms exceeded"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn detects_unreturnable_results() {
        let err = AdapterError::protocol("Object reference chain is too long");
        assert!(unreturnable_reason(&err).is_some());
        assert!(unreturnable_reason(&AdapterError::protocol("boom")).is_none());
    }
}
