use hyper::StatusCode;
use serde::Serialize;

use crate::forwarder::ForwarderError;

/// The taxonomy of recoverable dispatch failures from §7, mapped 1:1 to a
/// client-facing status code.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request body exceeds the 10 MiB limit")]
    Oversize,
    #[error("no healthy backends available")]
    NoHealthyBackends,
    #[error("upstream request timed out")]
    UpstreamTimeout,
    #[error("upstream connection failed")]
    UpstreamNetwork,
    #[error("client disconnected before upstream responded")]
    UpstreamAborted,
    #[error("all failover attempts exhausted")]
    FailoverExhausted,
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::Oversize => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::UpstreamNetwork => StatusCode::BAD_GATEWAY,
            DispatchError::UpstreamAborted => StatusCode::from_u16(499).unwrap(),
            DispatchError::FailoverExhausted => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Maps the last observed forwarder error to the client status the
    /// failover-exhaustion row of §7 specifies: timeout -> 504, network ->
    /// 502, aborted -> 499, otherwise 503.
    pub fn from_last_forwarder_error(err: &ForwarderError) -> Self {
        match err {
            ForwarderError::Timeout => DispatchError::UpstreamTimeout,
            ForwarderError::Aborted => DispatchError::UpstreamAborted,
            ForwarderError::Connect(_) => DispatchError::UpstreamNetwork,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    timestamp: String,
}

pub fn error_body(err: &DispatchError) -> (StatusCode, String) {
    let status = err.status_code();
    let body = ErrorBody {
        error: err.to_string(),
        status: status.as_u16(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (status, serde_json::to_string(&body).unwrap_or_default())
}
