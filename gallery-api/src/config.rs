use serde::Deserialize;
use settings_store::ProjectId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener both bind {0}")]
    ListenerConflict(String),

    #[error("Legacy project is not a valid project id: {0:?}")]
    InvalidLegacyProject(String),
}

/// Settings API configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for the settings endpoints
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Project served by the legacy `/api/settings` endpoint.
    /// The endpoint responds 404 when unset.
    #[serde(default)]
    pub legacy_project: Option<String>,
}

impl Config {
    /// Validates the API configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.listener.conflicts_with(&self.admin_listener) {
            return Err(ValidationError::ListenerConflict(self.listener.address()));
        }

        if let Some(project) = &self.legacy_project
            && ProjectId::new(project.as_str()).is_err()
        {
            return Err(ValidationError::InvalidLegacyProject(project.clone()));
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    /// Whether both listeners would try to bind the same socket. A wildcard
    /// host claims the port on every interface.
    pub fn conflicts_with(&self, other: &Listener) -> bool {
        self.port == other.port
            && (self.host == other.host || self.is_wildcard() || other.is_wildcard())
    }

    fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "0.0.0.0" | "::" | "[::]" | "")
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
