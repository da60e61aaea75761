//! Typed payloads for the Runtime, DOM and Page domain messages the DOM runtime consumes.
//!
//! Only the fields the runtime reads are modelled; unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ExecutionContextId, FrameId, RemoteObjectId};

/// Mirror of `Runtime.RemoteObject`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

impl RemoteObject {
    /// Primitive values travel inline and have no remote identity to release.
    pub fn is_primitive(&self) -> bool {
        self.object_id.is_none()
    }

    pub fn is_node(&self) -> bool {
        self.subtype.as_deref() == Some("node")
    }

    pub fn is_null(&self) -> bool {
        self.subtype.as_deref() == Some("null")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
}

/// Mirror of `Runtime.ExceptionDetails`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub exception_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// Response shape shared by `Runtime.evaluate` and `Runtime.callFunctionOn`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// Mirror of `Runtime.CallArgument`. Exactly one field is expected to be set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<RemoteObjectId>,
}

impl CallArgument {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn unserializable(literal: impl Into<String>) -> Self {
        Self {
            unserializable_value: Some(literal.into()),
            ..Self::default()
        }
    }

    pub fn object(object_id: RemoteObjectId) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub enumerable: bool,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetPropertiesResponse {
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueryObjectsResponse {
    pub objects: RemoteObject,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    pub backend_node_id: i64,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DescribeNodeResponse {
    pub node: NodeDescription,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResolveNodeResponse {
    pub object: RemoteObject,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextAuxData {
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Mirror of `Runtime.ExecutionContextDescription`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: ExecutionContextId,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aux_data: Option<ExecutionContextAuxData>,
}

/// Mirror of `Page.Frame`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    pub id: FrameId,
    #[serde(default)]
    pub parent_id: Option<FrameId>,
    #[serde(default)]
    pub loader_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_fragment: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTree {
    pub frame: FramePayload,
    #[serde(default)]
    pub child_frames: Vec<FrameTree>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFrameTreeResponse {
    pub frame_tree: FrameTree,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedParams {
    pub frame_id: FrameId,
    pub parent_frame_id: FrameId,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FrameNavigatedParams {
    pub frame: FramePayload,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocumentParams {
    pub frame_id: FrameId,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedParams {
    pub frame_id: FrameId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStoppedLoadingParams {
    pub frame_id: FrameId,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventParams {
    pub frame_id: FrameId,
    #[serde(default)]
    pub loader_id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionContextCreatedParams {
    pub context: ExecutionContextDescription,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedParams {
    pub execution_context_id: ExecutionContextId,
}
