//! Command error codes and error type.

use mxws_upstream::ClientError;

use crate::types::ErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// The inbound frame is not JSON at all.
pub const M_NOT_JSON: &str = "M_NOT_JSON";
/// The envelope or a parameter is missing or has the wrong shape, or no
/// handler is registered for the method.
pub const M_BAD_JSON: &str = "M_BAD_JSON";
/// Anything else, including upstream failures without a Matrix error body.
pub const M_UNKNOWN: &str = "M_UNKNOWN";

/// Error returned by command handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Inbound frame failed to decode as JSON.
    #[error("{message}")]
    NotJson {
        /// Decoder message.
        message: String,
    },

    /// Required parameter missing or wrong type.
    #[error("{message}")]
    BadJson {
        /// Description of what is wrong.
        message: String,
    },

    /// Method not in the registry.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// The requested method name.
        method: String,
    },

    /// The homeserver call behind the command failed.
    #[error(transparent)]
    Upstream(#[from] ClientError),
}

impl RpcError {
    /// Shorthand for a [`RpcError::BadJson`].
    pub fn bad_json(message: impl Into<String>) -> Self {
        Self::BadJson {
            message: message.into(),
        }
    }

    /// Wire error code for this error.
    ///
    /// Upstream failures carrying a Matrix error keep the homeserver's code.
    pub fn code(&self) -> &str {
        match self {
            Self::NotJson { .. } => M_NOT_JSON,
            Self::BadJson { .. } | Self::UnknownMethod { .. } => M_BAD_JSON,
            Self::Upstream(err) => err
                .matrix_details()
                .map_or(M_UNKNOWN, |details| details.errcode.as_str()),
        }
    }

    /// Convert to the wire error body.
    pub fn to_error_body(&self) -> ErrorBody {
        if let Self::Upstream(err) = self {
            if let Some(details) = err.matrix_details() {
                return ErrorBody {
                    errcode: details.errcode.clone(),
                    error: details.error.clone(),
                };
            }
        }
        ErrorBody {
            errcode: self.code().to_owned(),
            error: self.to_string(),
        }
    }
}
