use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error(
        "variable `{name}` is required but has no value and no default\nhint: pass it explicitly or declare a default with ${{{name}:-value}}"
    )]
    UnresolvedVariable { name: String },

    #[error("invalid value for variable `{name}`: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("invalid pattern for variable `{name}`: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        StackError::MalformedManifest(message.into())
    }
}

impl From<serde_yaml::Error> for StackError {
    fn from(err: serde_yaml::Error) -> Self {
        StackError::MalformedManifest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
