//! Wire envelopes and hub error payloads.
//!
//! Every frame exchanged with the hub is a JSON envelope. Outbound
//! requests carry `{controller, method, data}`; inbound frames add a
//! `type` discriminator (`REQUEST`/`RESPONSE`/`ERROR`). The `data`
//! field is itself a JSON-encoded string — payload bodies stay opaque
//! to the session core and are decoded only by the callback bound to
//! the matching action key.

use serde::{Deserialize, Serialize};

use crate::action::ActionKey;

/// Inbound frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// A request originated by the hub.
    Request,
    /// A response to a request this client sent.
    Response,
    /// A hub-reported application error for a request this client sent.
    Error,
}

/// Outbound wire envelope.
///
/// The controller is sent as its integer value — the hub expects an
/// int, never the enum name.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Wire value of the controller category.
    pub controller: i32,
    /// Method name.
    pub method: String,
    /// JSON-encoded payload body.
    pub data: String,
}

impl RequestEnvelope {
    /// Build an envelope for `key` around an already-encoded body.
    pub fn new(key: &ActionKey, data: String) -> Self {
        Self {
            controller: key.category().as_wire(),
            method: key.method().to_string(),
            data,
        }
    }
}

/// Inbound wire envelope, parsed from every received frame before
/// dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundHeader {
    /// Frame discriminator.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Wire value of the controller category.
    pub controller: i32,
    /// Method name.
    pub method: String,
    /// JSON-encoded body, empty when the frame has none.
    #[serde(default)]
    pub data: String,
}

impl InboundHeader {
    /// Parse a raw inbound frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Synthesize a RESPONSE header for `key`, used by the
    /// development-only fake-response path.
    pub fn fake_response(key: &ActionKey, data: String) -> Self {
        Self {
            kind: MessageType::Response,
            controller: key.category().as_wire(),
            method: key.method().to_string(),
            data,
        }
    }
}

/// Error codes reported by the hub in ERROR frames.
///
/// Unknown wire values map to [`HubErrorCode::Unknown`] so a hub
/// upgrade never breaks error delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubErrorCode {
    /// Unrecognized code.
    Unknown,
    /// Request was malformed or missing required fields.
    InvalidRequest,
    /// Session is not authorized for the requested method.
    Unauthorized,
    /// Requested entity does not exist.
    NotFound,
    /// Hub-side failure.
    InternalError,
    /// Client build is not accepted by the hub.
    VersionMismatch,
}

impl From<i32> for HubErrorCode {
    fn from(value: i32) -> Self {
        match value {
            1 => Self::InvalidRequest,
            2 => Self::Unauthorized,
            3 => Self::NotFound,
            4 => Self::InternalError,
            5 => Self::VersionMismatch,
            _ => Self::Unknown,
        }
    }
}

impl HubErrorCode {
    /// Human-readable description of the error code.
    #[must_use]
    pub fn error_text(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown error.",
            Self::InvalidRequest => "The request was malformed.",
            Self::Unauthorized => "The session is not authorized for this action.",
            Self::NotFound => "The requested entity was not found.",
            Self::InternalError => "The hub reported an internal error.",
            Self::VersionMismatch => "The client version is not accepted by the hub.",
        }
    }
}

/// Wire shape of an ERROR frame body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    error_message: String,
}

/// Hub-reported application error delivered to a bound error callback.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    /// Decoded error code.
    pub code: HubErrorCode,
    /// Human-readable message from the hub, may be empty.
    pub message: String,
    /// Undecoded body of the ERROR frame.
    pub raw_data: String,
}

impl ErrorPayload {
    /// Decode the `data` field of an ERROR frame.
    ///
    /// The raw body is always preserved in `raw_data` for callers that
    /// need hub-specific details this crate does not model.
    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        let body: ErrorBody = serde_json::from_str(data)?;
        Ok(Self {
            code: HubErrorCode::from(body.code),
            message: body.error_message,
            raw_data: data.to_string(),
        })
    }
}
