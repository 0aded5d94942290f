//! Error taxonomy for request handling and medium access

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A required query argument was not supplied
    #[error("missing required argument `{0}`")]
    Argument(&'static str),

    /// The referenced path does not exist on the medium
    #[error("path not found: {0}")]
    Path(String),

    /// A directory was expected but something else was found
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The medium could not be attached at startup
    #[error("storage medium unavailable")]
    DeviceUnavailable,

    /// A single sector could not be read; recovered locally by the caller
    #[error("failed to read sector {index}: {source}")]
    SectorRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    /// Short plain-text reason sent to clients for request validation failures.
    ///
    /// Returns `None` for errors that are never surfaced as a reason string
    /// (they degrade to the diagnostic response or are handled locally).
    pub fn client_reason(&self) -> Option<&'static str> {
        match self {
            RecoveryError::Argument(_) => Some("BAD ARGS"),
            RecoveryError::Path(_) => Some("BAD PATH"),
            RecoveryError::NotADirectory(_) => Some("NOT DIR"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_reasons() {
        assert_eq!(RecoveryError::Argument("dir").client_reason(), Some("BAD ARGS"));
        assert_eq!(
            RecoveryError::Path("/nope".into()).client_reason(),
            Some("BAD PATH")
        );
        assert_eq!(
            RecoveryError::NotADirectory("/a.jpg".into()).client_reason(),
            Some("NOT DIR")
        );
        assert_eq!(RecoveryError::DeviceUnavailable.client_reason(), None);
    }

    #[test]
    fn test_sector_error_display() {
        let err = RecoveryError::SectorRead {
            index: 7,
            source: std::io::Error::new(std::io::ErrorKind::Other, "medium error"),
        };
        assert_eq!(err.to_string(), "failed to read sector 7: medium error");
    }
}
