use modelstore_protocol::{ProtocolError, Scope};
use modelstore_sinks::SinkError;
use thiserror::Error;

/// A failed harvest, tagged with the step that failed.
///
/// Any of these aborts the invocation before the sink is written.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Failed to load table schema")]
    Schema(#[source] ProtocolError),

    #[error("Failed to resolve cursor for {scope}")]
    Cursor {
        scope: Scope,
        #[source]
        source: SinkError,
    },

    #[error("Failed to list pipeline runs for {scope}")]
    Runs {
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to list pipeline contexts for {scope}")]
    Contexts {
        scope: Scope,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to list metric artifacts for run '{run_id}' (context {context})")]
    Artifacts {
        run_id: String,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to assemble records: {message}")]
    Assembly { message: String },

    #[error("Failed to append to {target}")]
    Sink {
        target: String,
        #[source]
        source: SinkError,
    },
}

impl HarvestError {
    /// Short name of the failing step, for logs and metrics labels.
    pub fn stage(&self) -> &'static str {
        match self {
            HarvestError::Schema(_) => "schema",
            HarvestError::Cursor { .. } => "cursor",
            HarvestError::Runs { .. } => "runs",
            HarvestError::Contexts { .. } => "contexts",
            HarvestError::Artifacts { .. } => "artifacts",
            HarvestError::Assembly { .. } => "assembly",
            HarvestError::Sink { .. } => "sink",
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
