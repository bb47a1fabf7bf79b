//! Error types for migration operations.

use std::time::Duration;
use thiserror::Error;

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Missing or malformed configuration, detected before any remote call.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Either remote system answered with a non-2xx status.
    #[error("Remote API error ({status}): {message}")]
    RemoteApi {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Membership of a group holding a grant could not be fetched.
    #[error("Failed to resolve members of group '{group}': {source}")]
    GroupResolution {
        /// Source group name.
        group: String,
        /// Underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// A permission level has no mapping at the requested scope.
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    /// The source repository exposes no clone link tagged `http`.
    #[error("No http clone link found for repository '{0}'")]
    CloneLinkNotFound(String),

    /// Transport-level failure talking to a remote system.
    #[error("Network error: {0}")]
    Network(String),

    /// The overall run exceeded its configured timeout.
    #[error("Migration timed out after {0:?}")]
    Timeout(Duration),
}

impl MigrationError {
    /// Returns the HTTP status if this is a remote API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is a remote 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Errors carrying an HTTP status become `RemoteApi`; transport and body
/// decoding failures become `Network`.
impl From<reqwest::Error> for MigrationError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::RemoteApi {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => Self::Network(e.to_string()),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = MigrationError::RemoteApi {
            status: 404,
            message: "missing".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!MigrationError::Network("reset".to_string()).is_not_found());
    }

    #[test]
    fn test_group_resolution_message_names_group() {
        let err = MigrationError::GroupResolution {
            group: "devs".to_string(),
            source: Box::new(MigrationError::RemoteApi {
                status: 500,
                message: "boom".to_string(),
            }),
        };
        assert!(err.to_string().contains("devs"));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_error_maps_to_network() {
        // Nothing listens on port 9 locally.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(MigrationError::from(err), MigrationError::Network(_)));
    }
}
