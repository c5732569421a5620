use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::cloud::ApiError;
use crate::provision::ProvisionStage;

/// A contradictory or missing option, detected before any remote call.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    /// Redacted JSON view of the configuration being bound, attached only
    /// when verbose instrumentation is active.
    pub snapshot: Option<String>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            snapshot: None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(snapshot) = &self.snapshot {
            write!(f, "\n -> driver config:\n{snapshot}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: ApiError,
    },

    #[error("{kind} not found: {reference}")]
    NotFound {
        kind: &'static str,
        reference: String,
    },

    #[error("no server to resolve: server ID was 0")]
    NoServer,

    #[error("action {command}[{id}] failed: {code}: {message}")]
    Action {
        id: i64,
        command: String,
        code: String,
        message: String,
    },

    #[error("{step}: {}", join_errors(.errors))]
    Actions { step: String, errors: Vec<Error> },

    #[error("server exceeded wait-for-running-timeout of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("remote key {key_id} does not match local key {}", .path.display())]
    KeyMismatch { key_id: i64, path: PathBuf },

    #[error("no IP address recorded for this machine")]
    NoAddress,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("ssh-keygen failed: {0}")]
    KeyGeneration(String),

    #[error("{0}")]
    Network(String),

    #[error("machine is not running (state: {0})")]
    NotRunning(crate::lifecycle::MachineState),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{stage}: {source}")]
    Provision {
        stage: ProvisionStage,
        #[source]
        source: Box<Error>,
    },
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wrap an error with the step that produced it.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }
}

impl<T> ResultExt<T> for std::result::Result<T, ApiError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Api {
            context: context.into(),
            source,
        })
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Io {
            context: context.into(),
            source,
        })
    }
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, reference: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            reference: reference.to_string(),
        }
    }

    /// Walk through context wrappers to the error that started it all.
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } | Self::Provision { source, .. } => source.root(),
            other => other,
        }
    }
}
