use thiserror::Error;

pub type WizardResult<T> = Result<T, WizardError>;

#[derive(Error, Debug)]
pub enum WizardError {
    /// Broken step/field definitions. Raised while building a wizard, never
    /// while serving a request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Session store or downstream service failure. Not retried here.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// The journey was entered somewhere other than an entry point and has
    /// no history to return to.
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Session ended")]
    SessionEnded,

    #[error("Cookies required")]
    CookiesRequired,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WizardError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    /// HTTP status the error maps to when it escapes a request handler.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::MissingPrerequisite(_) | Self::SessionEnded | Self::CookiesRequired => 403,
            _ => 500,
        }
    }
}
