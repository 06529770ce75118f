//! Response orchestration: the uniform success/error envelope.
//!
//! Every request-pipeline path terminates here; no raw error ever crosses
//! the transport boundary. Error responses below 500 are logged at `warn`,
//! 500 and above at `error` and forwarded to the error reporter as a
//! breadcrumb (plus full capture when structured details are present).

use crate::context::ErrorReporter;
use crate::ids::RequestId;
use crate::pipeline::PipelineResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// Structured error carried inside a failure envelope.
///
/// `status_code` travels on the HTTP status line, not in the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip)]
    pub status_code: u16,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            user_message: None,
            details: None,
            status_code,
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = Some(user_message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Wire-level response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Unix epoch milliseconds at envelope construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ResponseEnvelope {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
            timestamp: Some(now_millis()),
            request_id: None,
        }
    }

    pub fn failure(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
            timestamp: Some(now_millis()),
            request_id: None,
        }
    }

    pub fn with_meta(mut self, meta: Option<Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

/// Turns envelopes into pipeline responses, owning the logging and
/// error-reporting side effects.
#[derive(Clone)]
pub struct Responder {
    reporter: Arc<dyn ErrorReporter>,
}

impl Responder {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { reporter }
    }

    /// Wrap success data, status 200.
    pub fn success(&self, request_id: RequestId, data: Value, meta: Option<Value>) -> PipelineResponse {
        let envelope = ResponseEnvelope::success(data)
            .with_meta(meta)
            .with_request_id(request_id);
        PipelineResponse::json(200, envelope_value(envelope))
    }

    /// Wrap a structured error. Logs at `warn` below 500; at `error` from
    /// 500 upward, with a reporter breadcrumb and, when details carry the
    /// original failure, a full capture.
    pub fn error(&self, request_id: RequestId, error: ErrorBody) -> PipelineResponse {
        let status = error.status_code;
        if status >= 500 {
            error!(
                request_id = %request_id,
                code = %error.code,
                status = status,
                message = %error.message,
                "Request failed"
            );
            self.reporter
                .breadcrumb("response", &format!("{} {}", error.code, error.message));
            if error.details.is_some() {
                self.reporter.capture(&error.message, error.details.as_ref());
            }
        } else {
            warn!(
                request_id = %request_id,
                code = %error.code,
                status = status,
                message = %error.message,
                "Request rejected"
            );
        }
        let envelope = ResponseEnvelope::failure(error).with_request_id(request_id);
        PipelineResponse::json(status, envelope_value(envelope))
    }
}

fn envelope_value(envelope: ResponseEnvelope) -> Value {
    serde_json::to_value(envelope).unwrap_or_else(|_| Value::Null)
}
