//! Typed operations
//!
//! An [`Operation`] binds an operation name (the bookmark the process waits
//! on) to request and response types, so callers use
//! [`WorkflowHost::call`](super::WorkflowHost::call) instead of raw JSON.
//!
//! # Example
//!
//! ```ignore
//! struct Approve;
//!
//! impl Operation for Approve {
//!     const NAME: &'static str = "Approve";
//!     type Request = ApprovalRequest;
//!     type Response = ApprovalReceipt;
//! }
//!
//! let receipt = host.call::<Approve>(request).await?;
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::OperationResponse;

/// Statically named operation with typed request and response
pub trait Operation {
    /// Operation (bookmark) name
    const NAME: &'static str;

    /// Request parameter
    type Request: Serialize + Send + 'static;

    /// Response parameter (`()` for operations without a response)
    type Response: DeserializeOwned;
}

/// Decode an operation response into the operation's response type
pub fn decode_response<O: Operation>(
    response: OperationResponse,
) -> Result<O::Response, serde_json::Error> {
    match response {
        OperationResponse::Value(value) => serde_json::from_value(value),
        OperationResponse::Void => serde_json::from_value(serde_json::Value::Null),
    }
}
