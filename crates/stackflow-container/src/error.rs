use thiserror::Error;

/// How a failed runtime call should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection problems, timeouts, server-side errors: worth one retry
    Transient,
    /// Invalid spec, conflicts, missing images: retrying cannot help
    Permanent,
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(
        "cannot connect to the container runtime: {0}\n\nhint:\n  • check that Docker is running\n  • check that `docker ps` works for the current user"
    )]
    ConnectionFailed(String),

    #[error("container runtime call timed out: {0}")]
    Timeout(String),

    #[error(
        "image '{image}' not found\n\nhint:\n  • check the image name and tag\n  • pull it manually with: docker pull {image}"
    )]
    ImageNotFound { image: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid resource specification: {0}")]
    InvalidSpec(String),

    #[error("container runtime API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RuntimeError {
    pub fn class(&self) -> FailureClass {
        match self {
            RuntimeError::ConnectionFailed(_) | RuntimeError::Timeout(_) => FailureClass::Transient,
            RuntimeError::Api { status, .. } if *status >= 500 => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                400 => RuntimeError::InvalidSpec(message),
                404 => RuntimeError::NotFound(message),
                409 => RuntimeError::Conflict(message),
                status => RuntimeError::Api { status, message },
            },
            bollard::errors::Error::RequestTimeoutError => {
                RuntimeError::Timeout("request timed out".to_string())
            }
            other => {
                let message = other.to_string();
                if message.contains("Connection refused")
                    || message.contains("No such file or directory")
                    || message.contains("connection reset")
                {
                    RuntimeError::ConnectionFailed(message)
                } else {
                    RuntimeError::Api { status: 0, message }
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> RuntimeError {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: "boom".to_string(),
        }
        .into()
    }

    #[test]
    fn test_status_code_classification() {
        assert!(matches!(server_error(400), RuntimeError::InvalidSpec(_)));
        assert!(matches!(server_error(404), RuntimeError::NotFound(_)));
        assert!(matches!(server_error(409), RuntimeError::Conflict(_)));
        assert_eq!(server_error(409).class(), FailureClass::Permanent);
        assert_eq!(server_error(500).class(), FailureClass::Transient);
        assert_eq!(server_error(503).class(), FailureClass::Transient);
    }

    #[test]
    fn test_timeout_is_transient() {
        let err: RuntimeError = bollard::errors::Error::RequestTimeoutError.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_image_not_found_is_permanent() {
        let err = RuntimeError::ImageNotFound {
            image: "nope:1".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("docker pull nope:1"));
    }
}
