//! Failures raised while talking to the Conduit API.

use thiserror::Error;

/// Conduit error code returned for a missing or revoked API token.
pub const INVALID_AUTH_CODE: &str = "ERR-INVALID-AUTH";

/// A failed Conduit call or an unusable response.
///
/// Every variant aborts the current synchronization pass. None are retried.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// The request never produced an HTTP response.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status (other than 401/403).
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// The server rejected the API token.
    #[error("authentication rejected by {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    /// Conduit answered with an `error_code`.
    #[error("{endpoint} failed with {code}: {info}")]
    Api {
        endpoint: String,
        code: String,
        info: String,
    },

    /// Body was not JSON, or lacked the structure the caller needs.
    #[error("malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
}

impl ConduitError {
    pub fn malformed(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Map a Conduit `error_code`/`error_info` pair to an error.
    pub fn from_code(endpoint: impl Into<String>, code: String, info: Option<String>) -> Self {
        let endpoint = endpoint.into();
        let info = info.unwrap_or_default();
        if code == INVALID_AUTH_CODE {
            Self::Authentication {
                endpoint,
                message: info,
            }
        } else {
            Self::Api {
                endpoint,
                code,
                info,
            }
        }
    }

    #[inline]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_auth_code_is_authentication() {
        let err = ConduitError::from_code(
            "maniphest.search",
            INVALID_AUTH_CODE.to_string(),
            Some("API token \"api-x\" has the wrong length.".to_string()),
        );
        assert!(err.is_authentication());
        assert!(err.to_string().contains("maniphest.search"));
    }

    #[test]
    fn other_codes_are_api_errors() {
        let err = ConduitError::from_code("transaction.search", "ERR-CONDUIT-CORE".into(), None);
        assert!(matches!(err, ConduitError::Api { ref code, .. } if code == "ERR-CONDUIT-CORE"));
    }
}
