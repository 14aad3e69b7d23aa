use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the bridge to native callers.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid or unreachable search-path configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("module '{name}' not found on the search path")]
    ModuleNotFound { name: String },

    #[error("failed to read module '{name}' ({}): {source}", path.display())]
    ModuleRead {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile module '{name}': {message}")]
    ModuleCompile { name: String, message: String },

    #[error("failed to execute module '{name}': {message}")]
    ModuleExecute { name: String, message: String },

    #[error("module '{name}' redefines native entry '{entry}'")]
    ModuleRedefinesEntry { name: String, entry: String },

    #[error("invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("native function '{0}' is already registered")]
    DuplicateName(String),

    #[error("native registry is sealed; cannot register '{0}'")]
    AlreadySealed(String),

    #[error("entity {0} already has a live script link")]
    AlreadyLinked(i64),

    #[error("string '{0}' is not pinned")]
    UnpinUntracked(String),

    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("instance has not been bootstrapped")]
    NotBootstrapped,

    /// Runtime error raised by script code during a native-to-script call.
    #[error("script error in '{function}': {message}")]
    Script { function: String, message: String },
}

impl BridgeError {
    /// Whether this error is a caller contract violation.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            BridgeError::DuplicateName(_)
                | BridgeError::AlreadySealed(_)
                | BridgeError::AlreadyLinked(_)
                | BridgeError::UnpinUntracked(_)
                | BridgeError::CallDepthExceeded(_)
        )
    }

    pub fn is_load(&self) -> bool {
        matches!(
            self,
            BridgeError::ModuleNotFound { .. }
                | BridgeError::ModuleRead { .. }
                | BridgeError::ModuleCompile { .. }
                | BridgeError::ModuleExecute { .. }
                | BridgeError::ModuleRedefinesEntry { .. }
                | BridgeError::InvalidModuleName(_)
        )
    }

    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        BridgeError::NotFound { kind, key: key.into() }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
