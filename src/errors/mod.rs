//! Error types for the trafficplane control plane, built on `thiserror`.

/// Custom result type for trafficplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors (bad environment, unparseable settings)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Kubernetes API errors
    #[error("Kubernetes error: {context}")]
    Kubernetes {
        #[source]
        source: Box<kube::Error>,
        context: String,
    },

    /// xDS protocol errors
    #[error("xDS protocol error: {message}")]
    Xds {
        message: String,
        node_id: Option<String>,
    },

    /// gRPC transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn kubernetes(source: kube::Error, context: impl Into<String>) -> Self {
        Error::Kubernetes {
            source: Box::new(source),
            context: context.into(),
        }
    }

    pub fn xds(message: impl Into<String>, node_id: Option<String>) -> Self {
        Error::Xds {
            message: message.into(),
            node_id,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Error::kubernetes(source, "Kubernetes API request failed")
    }
}
