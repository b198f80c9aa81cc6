use thiserror::Error;

/// Errors raised while building or running a phase pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown phase `{name}` (run with --list-phases to see the available phases)")]
    UnknownPhase { name: String },

    #[error("phase `{name}` is registered more than once")]
    DuplicatePhase { name: String },

    #[error("phase `{phase}` lists a prerequisite that is not an earlier phase of the same registry")]
    InvalidPrerequisite { phase: String },

    #[error("phase `{phase}` does not belong to this registry")]
    ForeignPhase { phase: String },

    #[error("phase `{phase}` requires phase `{prerequisite}` to have run first")]
    PrerequisiteNotMet { phase: String, prerequisite: String },

    #[error("lowering failed: {0}")]
    Lowering(String),

    #[error("session table has been closed")]
    SessionTableClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
